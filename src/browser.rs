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

//! Browser-facing views over the catalogue: filtering, iteration and
//! keyboard-navigation state.
//!
//! The filter engine is shared between the instrument and preset browsers;
//! items implement `BrowserItem` so the engine never sees the concrete
//! catalogue types.

use std::collections::HashSet;

use xxhash_rust::xxh64::xxh64;

use crate::favourites;
use crate::folders::{FolderTree, NodeId};
use crate::libraries::server::LibrariesSnapshot;
use crate::library::LibraryId;
use crate::presets::server::PresetsSnapshot;
use crate::presets::PresetFormat;

pub mod filter;
pub mod nav;

/// Library name of the synthesised waveform pseudo-library.
pub const WAVEFORMS_LIBRARY_NAME: &str = "Waveforms";

/// The categories a browser can filter on. Folder, library, author and tag
/// are shared; preset type and preset author only apply to the preset
/// browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterCategory {
    Folder,
    Library,
    LibraryAuthor,
    Tag,
    PresetType,
    PresetAuthor,
}

impl FilterCategory {
    pub const ALL: [FilterCategory; 6] = [
        FilterCategory::Folder,
        FilterCategory::Library,
        FilterCategory::LibraryAuthor,
        FilterCategory::Tag,
        FilterCategory::PresetType,
        FilterCategory::PresetAuthor,
    ];
}

/// Anything the filter engine can evaluate. `matches` answers whether the
/// item matches one selected filter value of one category; folder values are
/// matched against the whole ancestor chain by the implementor.
pub trait BrowserItem {
    fn name(&self) -> &str;
    fn is_favourite(&self) -> bool;
    fn matches(&self, category: FilterCategory, value_hash: u64) -> bool;
}

/// Filter-value hash of a library.
pub fn library_filter_hash(id: &LibraryId) -> u64 {
    xxh64(id.to_string().as_bytes(), 0)
}

/// Filter-value hash of any plain string value (author, tag, preset type).
pub fn string_filter_hash(value: &str) -> u64 {
    xxh64(value.as_bytes(), 0)
}

/// Filter-value hash of a preset format, for the preset-type filter.
pub fn preset_type_filter_hash(format: PresetFormat) -> u64 {
    string_filter_hash(match format {
        PresetFormat::Floe => "floe",
        PresetFormat::Mirage => "mirage",
    })
}

/// Hashes of a folder node and all of its ancestors. An item matches a
/// folder filter value when the value appears anywhere in the chain, so
/// selecting a folder includes its subfolders.
fn folder_chain_hashes(tree: &FolderTree, node: NodeId) -> Vec<u64> {
    let mut hashes = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        hashes.push(tree.hash(id));
        current = tree.parent(id);
    }
    hashes
}

/// One instrument of a libraries snapshot, flattened for the filter engine.
#[derive(Debug, Clone)]
pub struct InstrumentEntry {
    pub library_id: LibraryId,
    pub name: String,
    /// Favourites identity, `favourites::instrument_hash`.
    pub hash: u64,
    pub favourite: bool,
    library_hash: u64,
    library_author_hash: u64,
    folder_hashes: Vec<u64>,
    tag_hashes: Vec<u64>,
}

/// Flattens a snapshot into one entry per instrument, in each library's
/// sorted order. `favourite_hashes` comes from the favourites store.
pub fn instrument_entries(
    snapshot: &LibrariesSnapshot,
    favourite_hashes: &HashSet<u64>,
) -> Vec<InstrumentEntry> {
    let mut entries = Vec::new();
    for library in &snapshot.libraries {
        let id = library.library_id();
        let library_hash = library_filter_hash(&id);
        let library_author_hash = string_filter_hash(&library.author);
        for name in &library.sorted_instruments {
            let Some(instrument) = library.instruments.get(name) else {
                continue;
            };
            let hash = favourites::instrument_hash(&id, name);
            entries.push(InstrumentEntry {
                library_id: id.clone(),
                name: name.clone(),
                hash,
                favourite: favourite_hashes.contains(&hash),
                library_hash,
                library_author_hash,
                folder_hashes: instrument
                    .folder
                    .map(|node| folder_chain_hashes(&library.instrument_folders, node))
                    .unwrap_or_default(),
                tag_hashes: instrument
                    .tags
                    .iter()
                    .map(|tag| string_filter_hash(tag))
                    .collect(),
            });
        }
    }
    entries
}

impl BrowserItem for InstrumentEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_favourite(&self) -> bool {
        self.favourite
    }

    fn matches(&self, category: FilterCategory, value_hash: u64) -> bool {
        match category {
            FilterCategory::Folder => self.folder_hashes.contains(&value_hash),
            FilterCategory::Library => self.library_hash == value_hash,
            FilterCategory::LibraryAuthor => self.library_author_hash == value_hash,
            FilterCategory::Tag => self.tag_hashes.contains(&value_hash),
            FilterCategory::PresetType | FilterCategory::PresetAuthor => false,
        }
    }
}

/// One preset of a presets snapshot, flattened for the filter engine. The
/// indices locate the preset back in the snapshot.
#[derive(Debug, Clone)]
pub struct PresetEntry {
    pub folder_index: usize,
    pub preset_index: usize,
    pub name: String,
    /// Favourites identity, `favourites::preset_hash`.
    pub hash: u64,
    pub favourite: bool,
    preset_type_hash: u64,
    author_hash: Option<u64>,
    folder_hashes: Vec<u64>,
    library_hashes: Vec<u64>,
    library_author_hashes: Vec<u64>,
    tag_hashes: Vec<u64>,
}

/// Flattens a snapshot into one entry per preset, in folder order.
pub fn preset_entries(
    snapshot: &PresetsSnapshot,
    favourite_hashes: &HashSet<u64>,
) -> Vec<PresetEntry> {
    let mut entries = Vec::new();
    for (folder_index, folder) in snapshot.folders.iter().enumerate() {
        let folder_hashes =
            folder_chain_hashes(&snapshot.folder_tree, snapshot.folder_nodes[folder_index]);
        for (preset_index, preset) in folder.presets.iter().enumerate() {
            let hash = favourites::preset_hash(&preset.name);
            entries.push(PresetEntry {
                folder_index,
                preset_index,
                name: preset.name.clone(),
                hash,
                favourite: favourite_hashes.contains(&hash),
                preset_type_hash: preset_type_filter_hash(preset.format),
                author_hash: preset
                    .metadata
                    .author
                    .as_deref()
                    .map(string_filter_hash),
                folder_hashes: folder_hashes.clone(),
                library_hashes: preset
                    .used_libraries
                    .iter()
                    .map(library_filter_hash)
                    .collect(),
                library_author_hashes: preset
                    .used_libraries
                    .iter()
                    .map(|id| string_filter_hash(&id.author))
                    .collect(),
                tag_hashes: preset
                    .metadata
                    .tags
                    .iter()
                    .map(|tag| string_filter_hash(tag))
                    .collect(),
            });
        }
    }
    entries
}

impl BrowserItem for PresetEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_favourite(&self) -> bool {
        self.favourite
    }

    fn matches(&self, category: FilterCategory, value_hash: u64) -> bool {
        match category {
            FilterCategory::Folder => self.folder_hashes.contains(&value_hash),
            FilterCategory::Library => self.library_hashes.contains(&value_hash),
            FilterCategory::LibraryAuthor => self.library_author_hashes.contains(&value_hash),
            FilterCategory::Tag => self.tag_hashes.contains(&value_hash),
            FilterCategory::PresetType => self.preset_type_hash == value_hash,
            FilterCategory::PresetAuthor => self.author_hash == Some(value_hash),
        }
    }
}

/// The built-in oscillator shapes exposed to the instrument browser as a
/// pseudo-library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformType {
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

impl WaveformType {
    pub const ALL: [WaveformType; 4] = [
        WaveformType::Sine,
        WaveformType::Triangle,
        WaveformType::Sawtooth,
        WaveformType::Square,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WaveformType::Sine => "Sine",
            WaveformType::Triangle => "Triangle",
            WaveformType::Sawtooth => "Sawtooth",
            WaveformType::Square => "Square",
        }
    }
}

/// One waveform entry in the instrument browser. Filtered by the same rules
/// as a real library item: its library is "Waveforms", its folder is the
/// pseudo-library root.
#[derive(Debug, Clone)]
pub struct WaveformItem {
    pub waveform: WaveformType,
    pub favourite: bool,
}

impl WaveformItem {
    pub fn library_id() -> LibraryId {
        LibraryId {
            author: "Floe".to_string(),
            name: WAVEFORMS_LIBRARY_NAME.to_string(),
        }
    }

    pub fn folder_hash() -> u64 {
        string_filter_hash(WAVEFORMS_LIBRARY_NAME)
    }
}

/// The four waveform items, in fixed order.
pub fn waveform_items() -> Vec<WaveformItem> {
    WaveformType::ALL
        .iter()
        .map(|&waveform| WaveformItem {
            waveform,
            favourite: false,
        })
        .collect()
}

impl BrowserItem for WaveformItem {
    fn name(&self) -> &str {
        self.waveform.name()
    }

    fn is_favourite(&self) -> bool {
        self.favourite
    }

    fn matches(&self, category: FilterCategory, value_hash: u64) -> bool {
        match category {
            FilterCategory::Folder => value_hash == WaveformItem::folder_hash(),
            FilterCategory::Library => value_hash == library_filter_hash(&WaveformItem::library_id()),
            FilterCategory::LibraryAuthor => value_hash == string_filter_hash("Floe"),
            FilterCategory::Tag | FilterCategory::PresetType | FilterCategory::PresetAuthor => {
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;
    use crate::library::{self, lua::SandboxOptions};
    use crate::presets::{Preset, PresetFolder, PresetMetadata};
    use crate::testutil::write_test_library;

    #[test]
    fn test_instrument_entries_from_parsed_library() {
        let dir = tempdir().unwrap();
        let root = write_test_library(dir.path(), "Test Lib", "Tester").unwrap();
        let library = library::read(&root, &SandboxOptions::default()).unwrap();
        let id = library.library_id();
        let snapshot = LibrariesSnapshot {
            libraries: vec![Arc::new(library)],
        };

        let mut favourite_hashes = HashSet::new();
        favourite_hashes.insert(favourites::instrument_hash(&id, "Keys"));
        let entries = instrument_entries(&snapshot, &favourite_hashes);
        assert_eq!(1, entries.len());
        let entry = &entries[0];
        assert_eq!("Keys", entry.name);
        assert!(entry.favourite);
        assert!(entry.matches(FilterCategory::Library, library_filter_hash(&id)));
        assert!(entry.matches(FilterCategory::LibraryAuthor, string_filter_hash("Tester")));
        assert!(entry.matches(FilterCategory::Tag, string_filter_hash("piano")));
        assert!(!entry.matches(FilterCategory::Tag, string_filter_hash("brass")));
        assert!(!entry.matches(FilterCategory::PresetType, preset_type_filter_hash(PresetFormat::Floe)));
    }

    #[test]
    fn test_preset_entries_match_folder_ancestors() {
        let preset = Preset {
            name: "Soft".to_string(),
            metadata: PresetMetadata {
                author: Some("Tester".to_string()),
                description: None,
                tags: ["warm"].iter().map(|s| s.to_string()).collect(),
            },
            used_libraries: [LibraryId {
                author: "Tester".to_string(),
                name: "Test Lib".to_string(),
            }]
            .into_iter()
            .collect(),
            file_hash: 1,
            file_extension: "floe-preset".to_string(),
            format: PresetFormat::Floe,
        };
        let folder = PresetFolder::new(PathBuf::from("/presets"), "Pads".to_string(), vec![preset]);

        let mut tree = FolderTree::new("");
        let node = tree
            .find_or_insert_parts(tree.root(), &["presets", "Pads"], 12)
            .unwrap();
        let parent = tree.parent(node).unwrap();
        let snapshot = PresetsSnapshot {
            folders: vec![Arc::new(folder)],
            folder_nodes: vec![node],
            folder_tree: tree,
            used_tags: Default::default(),
            used_libraries: Default::default(),
            authors: Default::default(),
            has_preset_type: [true, false],
        };

        let entries = preset_entries(&snapshot, &HashSet::new());
        assert_eq!(1, entries.len());
        let entry = &entries[0];
        assert_eq!((0, 0), (entry.folder_index, entry.preset_index));
        // Both the folder itself and its ancestor match.
        assert!(entry.matches(FilterCategory::Folder, snapshot.folder_tree.hash(node)));
        assert!(entry.matches(FilterCategory::Folder, snapshot.folder_tree.hash(parent)));
        assert!(entry.matches(FilterCategory::PresetType, preset_type_filter_hash(PresetFormat::Floe)));
        assert!(!entry.matches(FilterCategory::PresetType, preset_type_filter_hash(PresetFormat::Mirage)));
        assert!(entry.matches(FilterCategory::PresetAuthor, string_filter_hash("Tester")));
        assert!(entry.matches(
            FilterCategory::Library,
            library_filter_hash(&LibraryId {
                author: "Tester".to_string(),
                name: "Test Lib".to_string(),
            })
        ));
    }

    #[test]
    fn test_waveforms_filter_like_a_library() {
        let items = waveform_items();
        assert_eq!(4, items.len());
        for item in &items {
            assert!(item.matches(
                FilterCategory::Library,
                library_filter_hash(&WaveformItem::library_id())
            ));
            assert!(item.matches(FilterCategory::Folder, WaveformItem::folder_hash()));
            assert!(!item.matches(FilterCategory::Tag, string_filter_hash("piano")));
        }
    }
}
