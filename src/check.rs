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

//! The `check` subcommand: verifies library folders and preset folders the
//! same way the packager does, but reports every issue instead of stopping
//! at the first.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CatalogError;
use crate::library::{self, lua::SandboxOptions, LibraryId};
use crate::presets::{is_preset_path, read_preset_file};

/// Severity level for a verification issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A single verification issue found during checking.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub category: &'static str,
    /// The library or preset the issue belongs to.
    pub subject: String,
    pub message: String,
}

/// Result of verifying a set of content folders.
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub issues: Vec<Issue>,
    pub num_libraries: usize,
    pub num_presets: usize,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: VerificationReport) {
        self.issues.extend(other.issues);
        self.num_libraries += other.num_libraries;
        self.num_presets += other.num_presets;
    }
}

/// Checks a single library folder: the manifest must parse, every referenced
/// file must exist and a license document must be present.
pub fn check_library_folder(folder: &Path, sandbox: &SandboxOptions) -> VerificationReport {
    check_library_folder_inner(folder, sandbox).0
}

fn check_library_folder_inner(
    folder: &Path,
    sandbox: &SandboxOptions,
) -> (VerificationReport, Option<LibraryId>) {
    let mut report = VerificationReport {
        num_libraries: 1,
        ..VerificationReport::default()
    };
    let subject = crate::util::filename_display(folder).to_string();

    let library = match library::read(folder, sandbox) {
        Ok(library) => library,
        Err(error) => {
            report.issues.push(Issue {
                severity: Severity::Error,
                category: "manifest",
                subject,
                message: error.to_string(),
            });
            return (report, None);
        }
    };

    let mut referenced: BTreeSet<&str> = BTreeSet::new();
    for instrument in library.instruments.values() {
        for region in &instrument.regions {
            referenced.insert(&region.path);
        }
        if let Some(path) = &instrument.waveform_audio_path {
            referenced.insert(path);
        }
    }
    for ir in library.irs.values() {
        referenced.insert(&ir.path);
    }
    for path in [&library.background_image_path, &library.icon_image_path]
        .into_iter()
        .flatten()
    {
        referenced.insert(path);
    }
    for relative in referenced {
        if !folder.join(relative).is_file() {
            report.issues.push(Issue {
                severity: Severity::Error,
                category: "missing-file",
                subject: library.name.clone(),
                message: format!("manifest references \"{relative}\" which does not exist"),
            });
        }
    }

    match has_license_file(folder) {
        Ok(true) => {}
        Ok(false) => report.issues.push(Issue {
            severity: Severity::Warning,
            category: "license",
            subject: library.name.clone(),
            message: "no license file found (license.* or licence.*)".to_string(),
        }),
        Err(error) => report.issues.push(Issue {
            severity: Severity::Error,
            category: "license",
            subject: library.name.clone(),
            message: error.to_string(),
        }),
    }

    let id = library.library_id();
    (report, Some(id))
}

/// Checks every preset under a folder. References to libraries outside
/// `known_libraries` are warnings; unreadable presets are errors.
pub fn check_preset_folder(
    folder: &Path,
    known_libraries: &BTreeSet<LibraryId>,
) -> VerificationReport {
    let mut report = VerificationReport::default();
    let mut paths = Vec::new();
    collect_preset_paths(folder, &mut paths);
    for path in paths {
        report.num_presets += 1;
        let subject = crate::util::filename_display(&path).to_string();
        match read_preset_file(&path) {
            Ok(preset) => {
                for id in &preset.used_libraries {
                    if !known_libraries.contains(id) {
                        report.issues.push(Issue {
                            severity: Severity::Warning,
                            category: "missing-library",
                            subject: subject.clone(),
                            message: format!("preset uses library \"{id}\" which was not found"),
                        });
                    }
                }
            }
            Err(error) => report.issues.push(Issue {
                severity: Severity::Error,
                category: "preset",
                subject,
                message: error.to_string(),
            }),
        }
    }
    report
}

/// Checks library folders then preset folders against the libraries found.
pub fn check_all(
    library_folders: &[PathBuf],
    preset_folders: &[PathBuf],
    sandbox: &SandboxOptions,
) -> Result<VerificationReport, CatalogError> {
    let mut report = VerificationReport::default();
    let mut known: BTreeSet<LibraryId> = BTreeSet::new();
    for folder in library_folders {
        let (sub_report, id) = check_library_folder_inner(folder, sandbox);
        report.merge(sub_report);
        if let Some(id) = id {
            known.insert(id);
        }
    }
    for folder in preset_folders {
        report.merge(check_preset_folder(folder, &known));
    }
    Ok(report)
}

fn has_license_file(folder: &Path) -> Result<bool, CatalogError> {
    let read = fs::read_dir(folder).map_err(|error| CatalogError::io(folder, error))?;
    for entry in read {
        let entry = entry.map_err(|error| CatalogError::io(folder, error))?;
        let Some(stem) = entry.path().file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        if stem.eq_ignore_ascii_case("license") || stem.eq_ignore_ascii_case("licence") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn collect_preset_paths(folder: &Path, paths: &mut Vec<PathBuf>) {
    let Ok(read) = fs::read_dir(folder) else {
        return;
    };
    for entry in read.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_preset_paths(&path, paths);
        } else if is_preset_path(&path) {
            paths.push(path);
        }
    }
}

/// Prints a verification report grouped by subject.
pub fn print_report(report: &VerificationReport) {
    if report.is_clean() {
        println!(
            "\u{2705} {} library folder(s) and {} preset(s) passed verification.",
            report.num_libraries, report.num_presets
        );
        return;
    }

    let mut by_subject: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
    for issue in &report.issues {
        by_subject.entry(&issue.subject).or_default().push(issue);
    }

    for (subject, issues) in &by_subject {
        let has_errors = issues.iter().any(|i| i.severity == Severity::Error);
        let icon = if has_errors {
            "\u{274c}"
        } else {
            "\u{26a0}\u{fe0f} "
        };
        println!("{} {}", icon, subject);
        for issue in issues {
            let severity_icon = match issue.severity {
                Severity::Warning => "\u{26a0}\u{fe0f} ",
                Severity::Error => "\u{274c}",
            };
            println!("   {} [{}] {}", severity_icon, issue.category, issue.message);
        }
    }

    println!(
        "\nSummary: {} issue(s) found across {} subject(s).",
        report.issues.len(),
        by_subject.len()
    );
}
