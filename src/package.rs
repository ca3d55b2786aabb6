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

//! Building, installing and verifying library/preset package files.
//!
//! A package is a ZIP holding one directory tree per library, a `Presets/`
//! tree, generated About and Installation documents and a checksum entry
//! named `.floe-checksums`. Every manifest is fully parsed before packaging
//! so a broken library can never ship.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use xxhash_rust::xxh64::xxh64;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::CatalogError;
use crate::library::{self, lua::SandboxOptions, Library, LibraryFormat};
use crate::presets::is_preset_path;
use crate::util::normalise_separators;

/// Name of the checksum entry at the archive root.
pub const CHECKSUMS_FILENAME: &str = ".floe-checksums";

/// Directory prefix for preset content inside a package.
pub const PRESETS_PREFIX: &str = "Presets/";

const INSTALLATION_FILENAME: &str = "Installation.rtf";

#[derive(Debug, Clone, Serialize)]
pub struct LibrarySummary {
    pub name: String,
    pub author: String,
    pub num_instruments: usize,
    pub num_samples: usize,
}

/// What went into a built package; also the shape of `--output-info-json`.
#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub package_path: PathBuf,
    pub libraries: Vec<LibrarySummary>,
    pub num_presets: usize,
}

/// Builds a package ZIP at `output_path`.
///
/// Library folders are parsed and validated first; preset folders are added
/// under `Presets/`; finally any input packages are merged, first path wins.
pub fn build_package(
    library_folders: &[PathBuf],
    preset_folders: &[PathBuf],
    input_packages: &[PathBuf],
    output_path: &Path,
    sandbox: &SandboxOptions,
) -> Result<PackageSummary, CatalogError> {
    let mut entries: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut summary = PackageSummary {
        package_path: output_path.to_path_buf(),
        libraries: Vec::new(),
        num_presets: 0,
    };

    for folder in library_folders {
        let library = validate_library_folder(folder, sandbox)?;
        add_tree(&mut entries, folder, &format!("{}/", library.name))?;
        let about_name = format!("About {}.rtf", library.name);
        add_entry(&mut entries, about_name, about_document(&library).into_bytes());
        summary.libraries.push(LibrarySummary {
            num_instruments: library.instruments.len(),
            num_samples: library.num_audio_samples,
            name: library.name,
            author: library.author,
        });
    }

    for folder in preset_folders {
        summary.num_presets += add_preset_tree(&mut entries, folder, PRESETS_PREFIX)?;
    }

    for package in input_packages {
        merge_package(&mut entries, package)?;
    }

    add_entry(
        &mut entries,
        INSTALLATION_FILENAME.to_string(),
        installation_document(&summary).into_bytes(),
    );
    entries.insert(CHECKSUMS_FILENAME.to_string(), checksum_document(&entries).into_bytes());

    write_zip(output_path, &entries)?;
    info!(
        path = %output_path.display(),
        libraries = summary.libraries.len(),
        presets = summary.num_presets,
        entries = entries.len(),
        "built package"
    );
    Ok(summary)
}

/// Installs a package by extracting it under a scan folder. The checksum
/// entry is not materialised; everything else is copied as-is.
pub fn install_package(package_path: &Path, destination: &Path) -> Result<(), CatalogError> {
    let file = fs::File::open(package_path).map_err(|error| CatalogError::io(package_path, error))?;
    let mut archive =
        ZipArchive::new(file).map_err(|error| CatalogError::invalid(package_path, error.to_string()))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|error| CatalogError::invalid(package_path, error.to_string()))?;
        if entry.is_dir() || entry.name() == CHECKSUMS_FILENAME {
            continue;
        }
        let Some(relative) = entry.enclosed_name() else {
            return Err(CatalogError::invalid(
                package_path,
                format!("entry path escapes the destination: {}", entry.name()),
            ));
        };
        let target = destination.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|error| CatalogError::io(parent, error))?;
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|error| CatalogError::io(package_path, error))?;
        fs::write(&target, bytes).map_err(|error| CatalogError::io(&target, error))?;
    }
    info!(package = %package_path.display(), destination = %destination.display(), "installed package");
    Ok(())
}

/// One discrepancy found while verifying an installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumIssue {
    Missing { path: String },
    SizeMismatch { path: String, expected: u64, actual: u64 },
    HashMismatch { path: String },
}

/// Checks an installed folder against a package's checksum document.
pub fn verify_checksums(
    package_path: &Path,
    installed_root: &Path,
) -> Result<Vec<ChecksumIssue>, CatalogError> {
    let file = fs::File::open(package_path).map_err(|error| CatalogError::io(package_path, error))?;
    let mut archive =
        ZipArchive::new(file).map_err(|error| CatalogError::invalid(package_path, error.to_string()))?;
    let mut document = String::new();
    archive
        .by_name(CHECKSUMS_FILENAME)
        .map_err(|error| CatalogError::invalid(package_path, error.to_string()))?
        .read_to_string(&mut document)
        .map_err(|error| CatalogError::io(package_path, error))?;

    let mut issues = Vec::new();
    for line in document.lines() {
        let Some((hash_hex, rest)) = line.split_once("  ") else {
            return Err(CatalogError::invalid(package_path, format!("malformed checksum line: {line}")));
        };
        let Some((size_text, relative)) = rest.split_once("  ") else {
            return Err(CatalogError::invalid(package_path, format!("malformed checksum line: {line}")));
        };
        let expected_hash = u64::from_str_radix(hash_hex, 16)
            .map_err(|_| CatalogError::invalid(package_path, format!("bad hash in checksum line: {line}")))?;
        let expected_size: u64 = size_text
            .parse()
            .map_err(|_| CatalogError::invalid(package_path, format!("bad size in checksum line: {line}")))?;

        let on_disk = installed_root.join(relative);
        let bytes = match fs::read(&on_disk) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                issues.push(ChecksumIssue::Missing {
                    path: relative.to_string(),
                });
                continue;
            }
            Err(error) => return Err(CatalogError::io(&on_disk, error)),
        };
        if bytes.len() as u64 != expected_size {
            issues.push(ChecksumIssue::SizeMismatch {
                path: relative.to_string(),
                expected: expected_size,
                actual: bytes.len() as u64,
            });
        } else if xxh64(&bytes, 0) != expected_hash {
            issues.push(ChecksumIssue::HashMismatch {
                path: relative.to_string(),
            });
        }
    }
    if !issues.is_empty() {
        warn!(package = %package_path.display(), issues = issues.len(), "checksum verification failed");
    }
    Ok(issues)
}

/// Writes the `--output-info-json` summary.
pub fn write_info_json(summary: &PackageSummary, path: &Path) -> Result<(), CatalogError> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|error| CatalogError::invalid(path, error.to_string()))?;
    fs::write(path, json).map_err(|error| CatalogError::io(path, error))
}

/// Parses a library folder's manifest and confirms everything it references
/// exists on disk alongside a license document.
fn validate_library_folder(folder: &Path, sandbox: &SandboxOptions) -> Result<Library, CatalogError> {
    let library = library::read(folder, sandbox)?;
    if !matches!(library.format, LibraryFormat::Lua) {
        return Err(CatalogError::invalid(
            folder,
            "only script-manifest library folders can be packaged",
        ));
    }
    if !has_license_file(folder)? {
        return Err(CatalogError::invalid(
            folder,
            "library has no license file (a file named license.* or licence.* is required)",
        ));
    }

    let mut referenced: Vec<&str> = Vec::new();
    for instrument in library.instruments.values() {
        for region in &instrument.regions {
            referenced.push(&region.path);
        }
        if let Some(path) = &instrument.waveform_audio_path {
            referenced.push(path);
        }
    }
    for ir in library.irs.values() {
        referenced.push(&ir.path);
    }
    for path in [&library.background_image_path, &library.icon_image_path]
        .into_iter()
        .flatten()
    {
        referenced.push(path);
    }
    for relative in referenced {
        if !folder.join(relative).is_file() {
            return Err(CatalogError::invalid(
                folder,
                format!("manifest references a missing file: {relative}"),
            ));
        }
    }
    debug!(library = %library.name, folder = %folder.display(), "validated library for packaging");
    Ok(library)
}

fn has_license_file(folder: &Path) -> Result<bool, CatalogError> {
    let read = fs::read_dir(folder).map_err(|error| CatalogError::io(folder, error))?;
    for entry in read {
        let entry = entry.map_err(|error| CatalogError::io(folder, error))?;
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        if stem.eq_ignore_ascii_case("license") || stem.eq_ignore_ascii_case("licence") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_entry(entries: &mut BTreeMap<String, Vec<u8>>, name: String, bytes: Vec<u8>) {
    // First path wins.
    entries.entry(name).or_insert(bytes);
}

fn add_tree(
    entries: &mut BTreeMap<String, Vec<u8>>,
    root: &Path,
    prefix: &str,
) -> Result<(), CatalogError> {
    visit_files(root, &mut |path, relative| {
        let bytes = fs::read(path).map_err(|error| CatalogError::io(path, error))?;
        add_entry(entries, format!("{prefix}{relative}"), bytes);
        Ok(())
    })
}

fn add_preset_tree(
    entries: &mut BTreeMap<String, Vec<u8>>,
    root: &Path,
    prefix: &str,
) -> Result<usize, CatalogError> {
    let mut count = 0;
    visit_files(root, &mut |path, relative| {
        if !is_preset_path(path) {
            return Ok(());
        }
        let bytes = fs::read(path).map_err(|error| CatalogError::io(path, error))?;
        add_entry(entries, format!("{prefix}{relative}"), bytes);
        count += 1;
        Ok(())
    })?;
    Ok(count)
}

fn visit_files(
    root: &Path,
    callback: &mut dyn FnMut(&Path, &str) -> Result<(), CatalogError>,
) -> Result<(), CatalogError> {
    fn walk(
        root: &Path,
        folder: &Path,
        callback: &mut dyn FnMut(&Path, &str) -> Result<(), CatalogError>,
    ) -> Result<(), CatalogError> {
        let read = fs::read_dir(folder).map_err(|error| CatalogError::io(folder, error))?;
        for entry in read {
            let entry = entry.map_err(|error| CatalogError::io(folder, error))?;
            let path = entry.path();
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            if path.is_dir() {
                walk(root, &path, callback)?;
            } else if let Ok(relative) = path.strip_prefix(root) {
                let relative = normalise_separators(&relative.to_string_lossy());
                callback(&path, &relative)?;
            }
        }
        Ok(())
    }
    walk(root, root, callback)
}

fn merge_package(
    entries: &mut BTreeMap<String, Vec<u8>>,
    package_path: &Path,
) -> Result<(), CatalogError> {
    let file = fs::File::open(package_path).map_err(|error| CatalogError::io(package_path, error))?;
    let mut archive =
        ZipArchive::new(file).map_err(|error| CatalogError::invalid(package_path, error.to_string()))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|error| CatalogError::invalid(package_path, error.to_string()))?;
        if entry.is_dir() || entry.name() == CHECKSUMS_FILENAME {
            continue;
        }
        let name = entry.name().to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|error| CatalogError::io(package_path, error))?;
        add_entry(entries, name, bytes);
    }
    Ok(())
}

/// Lines of `xxh64-hex  size  path`, one per entry, in entry order.
fn checksum_document(entries: &BTreeMap<String, Vec<u8>>) -> String {
    let mut document = String::new();
    for (name, bytes) in entries {
        document.push_str(&format!("{:016x}  {}  {}\n", xxh64(bytes, 0), bytes.len(), name));
    }
    document
}

fn write_zip(path: &Path, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| CatalogError::io(parent, error))?;
    }
    let file = fs::File::create(path).map_err(|error| CatalogError::io(path, error))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer
            .start_file(name, options)
            .map_err(|error| CatalogError::invalid(path, error.to_string()))?;
        writer
            .write_all(bytes)
            .map_err(|error| CatalogError::io(path, error))?;
    }
    writer
        .finish()
        .map_err(|error| CatalogError::invalid(path, error.to_string()))?;
    Ok(())
}

fn rtf_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '\\' => escaped.push_str("\\\\"),
            '{' => escaped.push_str("\\{"),
            '}' => escaped.push_str("\\}"),
            other if other.is_ascii() => escaped.push(other),
            other => escaped.push_str(&format!("\\u{}?", other as u32)),
        }
    }
    escaped
}

fn rtf_document(paragraphs: &[String]) -> String {
    let mut body = String::new();
    for paragraph in paragraphs {
        body.push_str(&rtf_escape(paragraph));
        body.push_str("\\par ");
    }
    format!("{{\\rtf1\\ansi\\deff0{{\\fonttbl{{\\f0 Arial;}}}}\\f0\\fs24 {body}}}")
}

fn about_document(library: &Library) -> String {
    let mut paragraphs = vec![
        format!("{} by {}.", library.name, library.author),
    ];
    if let Some(tagline) = &library.tagline {
        paragraphs.push(tagline.clone());
    }
    if let Some(description) = &library.description {
        paragraphs.push(description.clone());
    }
    if let Some(url) = &library.url {
        paragraphs.push(format!("More information: {url}"));
    }
    paragraphs.push(format!(
        "{} instruments, {} audio files.",
        library.instruments.len(),
        library.num_audio_samples
    ));
    rtf_document(&paragraphs)
}

fn installation_document(summary: &PackageSummary) -> String {
    let mut paragraphs = vec![
        "Installation".to_string(),
        "Open Floe and use Install Package, or extract this archive into one of your \
         configured library folders."
            .to_string(),
    ];
    for library in &summary.libraries {
        paragraphs.push(format!("Included library: {} by {}.", library.name, library.author));
    }
    if summary.num_presets > 0 {
        paragraphs.push(format!(
            "Includes {} presets; place the Presets directory inside one of your preset folders.",
            summary.num_presets
        ));
    }
    rtf_document(&paragraphs)
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use super::*;
    use crate::testutil::write_test_library;

    fn write_preset(folder: &Path, name: &str) {
        fs::create_dir_all(folder).unwrap();
        let json = serde_json::json!({
            "author": "Tester",
            "tags": ["warm"],
            "used_libraries": ["Test Lib - Tester"],
        });
        fs::write(folder.join(format!("{name}.floe-preset")), json.to_string()).unwrap();
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|index| archive.by_index(index).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_build_package_layout() {
        let dir = tempdir().unwrap();
        let library = write_test_library(dir.path(), "Test Lib", "Tester").unwrap();
        let presets = dir.path().join("my-presets");
        write_preset(&presets, "Soft");

        let output = dir.path().join("out/Test Lib Package.zip");
        let summary = build_package(
            &[library],
            &[presets],
            &[],
            &output,
            &SandboxOptions::default(),
        )
        .unwrap();

        assert_eq!(1, summary.libraries.len());
        assert_eq!("Test Lib", summary.libraries[0].name);
        assert_eq!(1, summary.num_presets);

        let names = entry_names(&output);
        assert!(names.contains(&"Test Lib/floe.lua".to_string()));
        assert!(names.contains(&"Test Lib/Samples/a.wav".to_string()));
        assert!(names.contains(&"Test Lib/License.txt".to_string()));
        assert!(names.contains(&"Presets/Soft.floe-preset".to_string()));
        assert!(names.contains(&"About Test Lib.rtf".to_string()));
        assert!(names.contains(&INSTALLATION_FILENAME.to_string()));
        assert!(names.contains(&CHECKSUMS_FILENAME.to_string()));
    }

    #[test]
    fn test_missing_license_is_refused() {
        let dir = tempdir().unwrap();
        let library = write_test_library(dir.path(), "Test Lib", "Tester").unwrap();
        fs::remove_file(library.join("License.txt")).unwrap();
        let output = dir.path().join("out.zip");
        let result = build_package(&[library], &[], &[], &output, &SandboxOptions::default());
        assert!(matches!(result, Err(CatalogError::InvalidInput { .. })));
    }

    #[test]
    fn test_missing_referenced_file_is_refused() {
        let dir = tempdir().unwrap();
        let library = write_test_library(dir.path(), "Test Lib", "Tester").unwrap();
        fs::remove_file(library.join("Samples/a.wav")).unwrap();
        let output = dir.path().join("out.zip");
        let result = build_package(&[library], &[], &[], &output, &SandboxOptions::default());
        match result {
            Err(CatalogError::InvalidInput { message, .. }) => {
                assert!(message.contains("missing file"), "{message}");
            }
            other => panic!("expected invalid input, got {other:?}"),
        }
    }

    #[test]
    fn test_install_and_verify_round_trip() {
        let dir = tempdir().unwrap();
        let library = write_test_library(dir.path(), "Test Lib", "Tester").unwrap();
        let output = dir.path().join("out.zip");
        build_package(&[library], &[], &[], &output, &SandboxOptions::default()).unwrap();

        let installed = dir.path().join("installed");
        install_package(&output, &installed).unwrap();
        assert!(installed.join("Test Lib/floe.lua").is_file());
        assert!(!installed.join(CHECKSUMS_FILENAME).exists());
        assert!(verify_checksums(&output, &installed).unwrap().is_empty());

        // Corrupting a file shows up as a hash mismatch of the same size.
        let target = installed.join("Test Lib/License.txt");
        let mut bytes = fs::read(&target).unwrap();
        if let Some(first) = bytes.first_mut() {
            *first = first.wrapping_add(1);
        }
        fs::write(&target, bytes).unwrap();
        let issues = verify_checksums(&output, &installed).unwrap();
        assert_eq!(
            vec![ChecksumIssue::HashMismatch {
                path: "Test Lib/License.txt".to_string()
            }],
            issues
        );

        fs::remove_file(&target).unwrap();
        let issues = verify_checksums(&output, &installed).unwrap();
        assert_eq!(
            vec![ChecksumIssue::Missing {
                path: "Test Lib/License.txt".to_string()
            }],
            issues
        );
    }

    #[test]
    fn test_merge_input_packages_first_path_wins() {
        let dir = tempdir().unwrap();

        let mut first_entries = BTreeMap::new();
        first_entries.insert("Presets/Shared.floe-preset".to_string(), b"first".to_vec());
        let first = dir.path().join("first.zip");
        write_zip(&first, &first_entries).unwrap();

        let mut second_entries = BTreeMap::new();
        second_entries.insert("Presets/Shared.floe-preset".to_string(), b"second".to_vec());
        second_entries.insert("Presets/Extra.floe-preset".to_string(), b"extra".to_vec());
        let second = dir.path().join("second.zip");
        write_zip(&second, &second_entries).unwrap();

        let output = dir.path().join("merged.zip");
        build_package(
            &[],
            &[],
            &[first, second],
            &output,
            &SandboxOptions::default(),
        )
        .unwrap();

        let mut archive = ZipArchive::new(fs::File::open(&output).unwrap()).unwrap();
        let mut shared = String::new();
        archive
            .by_name("Presets/Shared.floe-preset")
            .unwrap()
            .read_to_string(&mut shared)
            .unwrap();
        assert_eq!("first", shared);
        assert!(archive.by_name("Presets/Extra.floe-preset").is_ok());
    }

    #[test]
    fn test_info_json() {
        let dir = tempdir().unwrap();
        let summary = PackageSummary {
            package_path: dir.path().join("pkg.zip"),
            libraries: vec![LibrarySummary {
                name: "Test Lib".to_string(),
                author: "Tester".to_string(),
                num_instruments: 1,
                num_samples: 1,
            }],
            num_presets: 2,
        };
        let path = dir.path().join("info.json");
        write_info_json(&summary, &path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!("Test Lib", value["libraries"][0]["name"]);
        assert_eq!(2, value["num_presets"]);
    }
}
