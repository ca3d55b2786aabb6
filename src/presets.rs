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

//! Preset files and folders: a metadata-only view of serialised engine state.
//!
//! Two formats exist: native presets are JSON and carry their metadata
//! directly; legacy Mirage presets are a binary blob from which the same
//! fields are recovered. Audio is never decoded here.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use xxhash_rust::xxh64::xxh64;

use crate::error::CatalogError;
use crate::library::LibraryId;
use crate::util;

pub mod server;

pub const FLOE_PRESET_EXTENSION: &str = "floe-preset";
pub const MIRAGE_PRESET_EXTENSION: &str = "mirage";

/// Subfolder nesting cap within a preset scan folder.
pub const MAX_PRESET_FOLDER_DEPTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresetFormat {
    Floe,
    Mirage,
}

impl PresetFormat {
    pub const ALL: [PresetFormat; 2] = [PresetFormat::Floe, PresetFormat::Mirage];

    pub fn index(&self) -> usize {
        match self {
            PresetFormat::Floe => 0,
            PresetFormat::Mirage => 1,
        }
    }

    /// The format a file extension implies, if it is a preset extension at
    /// all.
    pub fn from_extension(extension: &str) -> Option<PresetFormat> {
        match extension {
            FLOE_PRESET_EXTENSION => Some(PresetFormat::Floe),
            MIRAGE_PRESET_EXTENSION => Some(PresetFormat::Mirage),
            _ => None,
        }
    }
}

/// True if this path names a file we would scan as a preset.
pub fn is_preset_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(PresetFormat::from_extension)
        .is_some()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetMetadata {
    pub author: Option<String>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
}

/// One preset file, metadata only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    /// The file stem.
    pub name: String,
    pub metadata: PresetMetadata,
    pub used_libraries: BTreeSet<LibraryId>,
    /// XXH64 of the whole file.
    pub file_hash: u64,
    pub file_extension: String,
    pub format: PresetFormat,
}

impl Preset {
    pub fn used_library_authors(&self) -> BTreeSet<&str> {
        self.used_libraries
            .iter()
            .map(|id| id.author.as_str())
            .collect()
    }
}

/// All presets directly inside one directory of a scan folder.
#[derive(Debug)]
pub struct PresetFolder {
    pub scan_folder: PathBuf,
    pub abbreviated_scan_folder: String,
    /// Subpath below the scan folder with `/` separators; empty at the root.
    pub folder: String,
    /// Sorted by name.
    pub presets: Vec<Preset>,
    pub used_tags: BTreeSet<String>,
    pub used_libraries: BTreeSet<LibraryId>,
    pub used_library_authors: BTreeSet<String>,
    /// Names appearing more than once. Surfaced to the UI, never rejected.
    pub duplicate_names: Vec<String>,
}

impl PresetFolder {
    pub fn new(scan_folder: PathBuf, folder: String, mut presets: Vec<Preset>) -> PresetFolder {
        presets.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.file_extension.cmp(&b.file_extension))
        });

        let mut used_tags = BTreeSet::new();
        let mut used_libraries = BTreeSet::new();
        let mut used_library_authors = BTreeSet::new();
        let mut duplicate_names = Vec::new();
        for (index, preset) in presets.iter().enumerate() {
            used_tags.extend(preset.metadata.tags.iter().cloned());
            for id in &preset.used_libraries {
                used_library_authors.insert(id.author.clone());
                used_libraries.insert(id.clone());
            }
            if index > 0 && presets[index - 1].name == preset.name {
                if duplicate_names.last() != Some(&preset.name) {
                    duplicate_names.push(preset.name.clone());
                }
            }
        }

        let abbreviated_scan_folder = util::abbreviate_path(&scan_folder);
        PresetFolder {
            scan_folder,
            abbreviated_scan_folder,
            folder,
            presets,
            used_tags,
            used_libraries,
            used_library_authors,
            duplicate_names,
        }
    }

    /// The name shown for this folder: the last subpath component, or the
    /// abbreviated scan folder at the root.
    pub fn display_name(&self) -> &str {
        match self.folder.rsplit('/').next() {
            Some(last) if !last.is_empty() => last,
            _ => &self.abbreviated_scan_folder,
        }
    }

    /// `scan_folder + folder + name + extension`.
    pub fn full_path_for_preset(&self, preset: &Preset) -> PathBuf {
        let mut path = self.scan_folder.clone();
        for part in self.folder.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.push(format!("{}.{}", preset.name, preset.file_extension));
        path
    }

    /// Index of the preset whose full path equals `path`, comparing normalised
    /// separators exactly.
    pub fn match_full_preset_path(&self, path: &Path) -> Option<usize> {
        let wanted = util::normalise_separators(&path.to_string_lossy());
        self.presets.iter().position(|preset| {
            let full = self.full_path_for_preset(preset);
            util::normalise_separators(&full.to_string_lossy()) == wanted
        })
    }
}

/// Reads one preset file: bytes, hash, then format-specific metadata decode.
pub fn read_preset_file(path: &Path) -> Result<Preset, CatalogError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string();
    let format = PresetFormat::from_extension(&extension).ok_or_else(|| {
        CatalogError::invalid(path, "not a preset file extension")
    })?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let bytes = fs::read(path).map_err(|e| CatalogError::io(path, e))?;
    let file_hash = xxh64(&bytes, 0);

    let (metadata, used_libraries) = match format {
        PresetFormat::Floe => decode_floe_metadata(path, &bytes)?,
        PresetFormat::Mirage => decode_mirage_metadata(path, &bytes)?,
    };

    Ok(Preset {
        name,
        metadata,
        used_libraries,
        file_hash,
        file_extension: extension,
        format,
    })
}

/// The metadata-bearing subset of a native preset file. Everything else in
/// the JSON (the engine state itself) is ignored here.
#[derive(Debug, Deserialize)]
struct FloePresetFile {
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    used_libraries: Vec<String>,
}

fn decode_floe_metadata(
    path: &Path,
    bytes: &[u8],
) -> Result<(PresetMetadata, BTreeSet<LibraryId>), CatalogError> {
    let file: FloePresetFile = serde_json::from_slice(bytes)
        .map_err(|e| CatalogError::invalid(path, format!("invalid preset JSON: {}", e)))?;
    let mut used_libraries = BTreeSet::new();
    for id_string in &file.used_libraries {
        if let Some(id) = parse_library_id(id_string) {
            used_libraries.insert(id);
        }
    }
    Ok((
        PresetMetadata {
            author: file.author,
            description: file.description,
            tags: file.tags.into_iter().collect(),
        },
        used_libraries,
    ))
}

/// `"<name> - <author>"`, split on the last separator so names containing
/// `" - "` still parse.
fn parse_library_id(s: &str) -> Option<LibraryId> {
    let (name, author) = s.rsplit_once(" - ")?;
    if name.is_empty() || author.is_empty() {
        return None;
    }
    Some(LibraryId {
        author: author.to_string(),
        name: name.to_string(),
    })
}

const MIRAGE_MAGIC: &[u8; 4] = b"MIRG";

// Record tags used by legacy Mirage preset metadata.
const MIRAGE_TAG_AUTHOR: u8 = 1;
const MIRAGE_TAG_DESCRIPTION: u8 = 2;
const MIRAGE_TAG_TAG: u8 = 3;
const MIRAGE_TAG_LIBRARY: u8 = 4;

/// A Mirage preset is a sequence of `{tag: u8, len: u32 LE, bytes}` records
/// after the magic. Unknown tags are skipped; truncated trailing records end
/// the scan.
fn decode_mirage_metadata(
    path: &Path,
    bytes: &[u8],
) -> Result<(PresetMetadata, BTreeSet<LibraryId>), CatalogError> {
    if bytes.len() < 4 || &bytes[..4] != MIRAGE_MAGIC {
        return Err(CatalogError::invalid(path, "not a Mirage preset"));
    }

    let mut metadata = PresetMetadata::default();
    let mut used_libraries = BTreeSet::new();
    let mut pos = 4;
    while pos + 5 <= bytes.len() {
        let tag = bytes[pos];
        let mut len_buf = [0u8; 4];
        len_buf.copy_from_slice(&bytes[pos + 1..pos + 5]);
        let len = u32::from_le_bytes(len_buf) as usize;
        pos += 5;
        if pos + len > bytes.len() {
            break;
        }
        let payload = String::from_utf8_lossy(&bytes[pos..pos + len]).into_owned();
        pos += len;
        match tag {
            MIRAGE_TAG_AUTHOR => metadata.author = Some(payload),
            MIRAGE_TAG_DESCRIPTION => metadata.description = Some(payload),
            MIRAGE_TAG_TAG => {
                metadata.tags.insert(payload);
            }
            MIRAGE_TAG_LIBRARY => {
                if let Some(id) = parse_library_id(&payload) {
                    used_libraries.insert(id);
                }
            }
            _ => {}
        }
    }
    Ok((metadata, used_libraries))
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    pub(crate) fn floe_preset_json(
        author: &str,
        tags: &[&str],
        used_libraries: &[&str],
    ) -> String {
        serde_json::json!({
            "author": author,
            "tags": tags,
            "used_libraries": used_libraries,
            "engine_state": {"params": [0.1, 0.2]},
        })
        .to_string()
    }

    pub(crate) fn mirage_preset_bytes(author: &str, library: &str) -> Vec<u8> {
        let mut bytes = MIRAGE_MAGIC.to_vec();
        for (tag, payload) in [(MIRAGE_TAG_AUTHOR, author), (MIRAGE_TAG_LIBRARY, library)] {
            bytes.push(tag);
            bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            bytes.extend_from_slice(payload.as_bytes());
        }
        bytes
    }

    #[test]
    fn test_read_floe_preset() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Warm Pad.floe-preset");
        fs::write(
            &path,
            floe_preset_json("Sam", &["pad", "warm"], &["Arctic Strings - FrozenPlain"]),
        )?;

        let preset = read_preset_file(&path)?;
        assert_eq!("Warm Pad", preset.name);
        assert_eq!(PresetFormat::Floe, preset.format);
        assert_eq!(Some("Sam".to_string()), preset.metadata.author);
        assert!(preset.metadata.tags.contains("warm"));
        assert_eq!(1, preset.used_libraries.len());
        let id = preset.used_libraries.iter().next().unwrap();
        assert_eq!("Arctic Strings", id.name);
        assert_eq!("FrozenPlain", id.author);
        assert_ne!(0, preset.file_hash);
        Ok(())
    }

    #[test]
    fn test_read_mirage_preset() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Old Glory.mirage");
        fs::write(&path, mirage_preset_bytes("Mike", "Wraith - FrozenPlain"))?;

        let preset = read_preset_file(&path)?;
        assert_eq!(PresetFormat::Mirage, preset.format);
        assert_eq!(Some("Mike".to_string()), preset.metadata.author);
        assert_eq!(1, preset.used_libraries.len());
        Ok(())
    }

    #[test]
    fn test_mirage_truncated_record_tolerated() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.mirage");
        let mut bytes = mirage_preset_bytes("Mike", "Wraith - FrozenPlain");
        bytes.push(MIRAGE_TAG_TAG);
        bytes.extend_from_slice(&100u32.to_le_bytes()); // claims more than remains
        bytes.extend_from_slice(b"short");
        fs::write(&path, bytes)?;

        let preset = read_preset_file(&path)?;
        assert_eq!(Some("Mike".to_string()), preset.metadata.author);
        assert!(preset.metadata.tags.is_empty());
        Ok(())
    }

    #[test]
    fn test_library_id_with_separator_in_name() {
        let id = parse_library_id("Lost - And Found - FrozenPlain").unwrap();
        assert_eq!("Lost - And Found", id.name);
        assert_eq!("FrozenPlain", id.author);
        assert!(parse_library_id("no separator").is_none());
    }

    #[test]
    fn test_full_path_round_trip() {
        let presets = vec![
            Preset {
                name: "B".to_string(),
                metadata: Default::default(),
                used_libraries: Default::default(),
                file_hash: 1,
                file_extension: FLOE_PRESET_EXTENSION.to_string(),
                format: PresetFormat::Floe,
            },
            Preset {
                name: "A".to_string(),
                metadata: Default::default(),
                used_libraries: Default::default(),
                file_hash: 2,
                file_extension: MIRAGE_PRESET_EXTENSION.to_string(),
                format: PresetFormat::Mirage,
            },
        ];
        let folder = PresetFolder::new(
            PathBuf::from("/scan/root"),
            "Pads/Soft".to_string(),
            presets,
        );

        // Sorted by name.
        assert_eq!("A", folder.presets[0].name);
        for (index, preset) in folder.presets.iter().enumerate() {
            let full = folder.full_path_for_preset(preset);
            assert_eq!(Some(index), folder.match_full_preset_path(&full));
        }
        assert_eq!(None, folder.match_full_preset_path(Path::new("/nope/x.floe-preset")));
    }

    #[test]
    fn test_duplicate_names_surfaced() {
        let make = |name: &str, ext: &str, format| Preset {
            name: name.to_string(),
            metadata: Default::default(),
            used_libraries: Default::default(),
            file_hash: 0,
            file_extension: ext.to_string(),
            format,
        };
        let folder = PresetFolder::new(
            PathBuf::from("/scan"),
            String::new(),
            vec![
                make("Same", FLOE_PRESET_EXTENSION, PresetFormat::Floe),
                make("Same", MIRAGE_PRESET_EXTENSION, PresetFormat::Mirage),
                make("Other", FLOE_PRESET_EXTENSION, PresetFormat::Floe),
            ],
        );
        assert_eq!(3, folder.presets.len(), "duplicates are kept");
        assert_eq!(vec!["Same".to_string()], folder.duplicate_names);
    }

    #[test]
    fn test_folder_display_name() {
        let root = PresetFolder::new(PathBuf::from("/home/user/Presets"), String::new(), vec![]);
        assert_eq!(root.abbreviated_scan_folder, root.display_name());
        let nested = PresetFolder::new(
            PathBuf::from("/home/user/Presets"),
            "Pads/Soft".to_string(),
            vec![],
        );
        assert_eq!("Soft", nested.display_name());
    }
}
