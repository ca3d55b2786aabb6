// Copyright (C) 2026 The Floe Catalog Authors
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{crate_version, CommandFactory, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use floe_catalog::check;
use floe_catalog::docs;
use floe_catalog::error::CatalogError;
use floe_catalog::library::lua::SandboxOptions;
use floe_catalog::package;

#[derive(Parser)]
#[clap(
    author = "The Floe Catalog Authors",
    version = crate_version!(),
    about = "Content tooling for the Floe sampler: packaging, checking and documentation."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Builds a distributable package ZIP from library and preset folders.
    Package {
        /// Library folders to include, each containing a floe.lua manifest.
        #[arg(long, num_args = 1..)]
        library_folders: Vec<PathBuf>,
        /// Preset folders to include under the package's Presets directory.
        #[arg(long, num_args = 1..)]
        presets_folders: Vec<PathBuf>,
        /// Existing packages to merge in; earlier packages win on clashes.
        #[arg(long, num_args = 1..)]
        input_packages: Vec<PathBuf>,
        /// Folder the package ZIP is written into.
        #[arg(long)]
        output_folder: PathBuf,
        /// Name of the package, used for the ZIP filename.
        #[arg(long)]
        package_name: String,
        /// Also write a JSON summary of the package's contents to this path.
        #[arg(long)]
        output_info_json: Option<PathBuf>,
    },
    /// Installs a package ZIP by extracting it into a folder.
    Install {
        /// The package ZIP to install.
        package: PathBuf,
        /// The folder to extract into, usually a configured scan folder.
        destination: PathBuf,
    },
    /// Verifies library and preset folders and prints a report.
    Check {
        /// Library folders to check.
        #[arg(long, num_args = 1..)]
        library_folders: Vec<PathBuf>,
        /// Preset folders to check.
        #[arg(long, num_args = 1..)]
        presets_folders: Vec<PathBuf>,
    },
    /// Generates the documentation JSON blob on stdout.
    Docs {
        /// On-disk cache of the latest-release metadata.
        #[arg(long, default_value = "release-cache.json")]
        release_cache: PathBuf,
        /// Refresh the release metadata over HTTPS before generating.
        #[arg(long)]
        refresh_release: bool,
    },
    /// Runs as an mdBook preprocessor (reads [context, book] on stdin).
    MdbookPreprocessor {
        /// mdBook invokes this with "supports <renderer>" as a capability probe.
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(error) => {
            error!(%error, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<ExitCode, CatalogError> {
    match command {
        Commands::Package {
            library_folders,
            presets_folders,
            input_packages,
            output_folder,
            package_name,
            output_info_json,
        } => {
            if library_folders.is_empty() && presets_folders.is_empty() && input_packages.is_empty()
            {
                eprintln!("nothing to package: pass --library-folders, --presets-folders or --input-packages");
                return Ok(ExitCode::from(2));
            }
            let output_path = output_folder.join(format!("{package_name}.zip"));
            let summary = package::build_package(
                &library_folders,
                &presets_folders,
                &input_packages,
                &output_path,
                &SandboxOptions::default(),
            )?;
            if let Some(info_path) = output_info_json {
                package::write_info_json(&summary, &info_path)?;
            }
            println!("Wrote {}", output_path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Install {
            package: package_path,
            destination,
        } => {
            package::install_package(&package_path, &destination)?;
            let issues = package::verify_checksums(&package_path, &destination)?;
            if !issues.is_empty() {
                for issue in &issues {
                    eprintln!("checksum issue: {issue:?}");
                }
                return Ok(ExitCode::FAILURE);
            }
            println!("Installed into {}", destination.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            library_folders,
            presets_folders,
        } => {
            if library_folders.is_empty() && presets_folders.is_empty() {
                eprintln!("nothing to check: pass --library-folders or --presets-folders");
                return Ok(ExitCode::from(2));
            }
            let report =
                check::check_all(&library_folders, &presets_folders, &SandboxOptions::default())?;
            check::print_report(&report);
            if report.has_errors() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Commands::Docs {
            release_cache,
            refresh_release,
        } => {
            let blob = docs::generate_blob(&docs::DocsContext {
                packager_help: package_help(),
                latest_release: docs::load_release_info(&release_cache, refresh_release)?,
            });
            let json = serde_json::to_string_pretty(&blob).map_err(|error| {
                CatalogError::Integrity(format!("could not serialise docs blob: {error}"))
            })?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::MdbookPreprocessor { args } => {
            if args.first().map(|arg| arg.as_str()) == Some("supports") {
                return Ok(ExitCode::SUCCESS);
            }
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .map_err(|error| CatalogError::io("stdin", error))?;
            let blob = docs::generate_blob(&docs::DocsContext {
                packager_help: package_help(),
                latest_release: None,
            });
            let book = docs::preprocess_book(&input, &blob)?;
            println!("{book}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// The packager's rendered help text, embedded in generated documentation.
fn package_help() -> String {
    let mut command = Cli::command();
    match command.find_subcommand_mut("package") {
        Some(subcommand) => subcommand.render_long_help().to_string(),
        None => String::new(),
    }
}
