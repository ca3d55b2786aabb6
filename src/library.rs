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

//! The sample-library model and its two manifest readers.
//!
//! A library is described either by a sandboxed `floe.lua` manifest or by a
//! legacy binary `.mdata` file. Both produce the same `Library` shape; the
//! shared `bookkeeping` pass derives folders, sort order, loop overviews,
//! round-robin groups and overlap checks after either reader finishes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use xxhash_rust::xxh64::Xxh64;

use crate::error::CatalogError;
use crate::folders::{FolderTree, NodeId};

pub mod bookkeeping;
pub mod lua;
pub mod mdata;
pub mod schema;

/// Author and name fields are bounded so ids stay usable as keys everywhere.
pub const MAX_NAME_BYTES: usize = 64;

/// Folder depth enforced when attaching instruments and IRs to a library tree.
pub const MAX_FOLDER_DEPTH: usize = 4;

/// At most this many round-robin sequence groups per instrument and trigger
/// event.
pub const MAX_ROUND_ROBIN_GROUPS: usize = 64;

/// The two resource kinds a library folder tree can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Instrument,
    Ir,
}

/// What triggers a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerEvent {
    NoteOn,
    NoteOff,
}

impl TriggerEvent {
    pub const ALL: [TriggerEvent; 2] = [TriggerEvent::NoteOn, TriggerEvent::NoteOff];
}

/// Half-open MIDI key range, `[0, 128)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub start: u8,
    pub end: u8,
}

impl KeyRange {
    pub const FULL: KeyRange = KeyRange { start: 0, end: 128 };

    pub fn overlaps(&self, other: &KeyRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Half-open velocity range over `[0, 100]`; an end of 101 covers the full
/// velocity span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VelocityRange {
    pub start: u8,
    pub end: u8,
}

impl VelocityRange {
    pub const FULL: VelocityRange = VelocityRange { start: 0, end: 101 };

    pub fn overlaps(&self, other: &VelocityRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopMode {
    Standard,
    PingPong,
}

impl LoopMode {
    pub const ALL: [LoopMode; 2] = [LoopMode::Standard, LoopMode::PingPong];

    pub fn index(&self) -> usize {
        match self {
            LoopMode::Standard => 0,
            LoopMode::PingPong => 1,
        }
    }
}

/// A loop baked into the region by the library author. Negative frame values
/// count from the end of the file; an end frame of 0 means end-of-file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuiltinLoop {
    pub start_frame: i64,
    pub end_frame: i64,
    pub crossfade_frames: u32,
    pub mode: LoopMode,
    pub lock_loop_points: bool,
    pub lock_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopRequirement {
    #[default]
    Default,
    AlwaysLoop,
    NeverLoop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeytrackRequirement {
    #[default]
    Default,
    Always,
    Never,
}

/// Trigger criteria of a region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionTrigger {
    pub event: TriggerEvent,
    pub key_range: KeyRange,
    pub velocity_range: VelocityRange,
    /// Position in a round-robin cycle, if this region takes part in one.
    pub round_robin_index: Option<u32>,
    /// Named round-robin sequencing group; resolved to a dense index by
    /// bookkeeping.
    pub round_robin_group: Option<String>,
    /// Dense index into the instrument's per-event sequence group table.
    /// Derived; never set by the manifest.
    pub round_robin_group_index: Option<usize>,
    /// Crossfade into neighbouring velocity layers proportionally to overlap.
    pub feather_overlapping_velocity_layers: bool,
    /// Named group for deriving the key range from root keys.
    pub auto_map_key_range_group: Option<String>,
}

/// Loop configuration of a region.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegionLoop {
    pub builtin: Option<BuiltinLoop>,
    pub requirement: LoopRequirement,
}

/// Audio preprocessing applied to a region before playback.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionAudioProps {
    pub gain_db: f32,
    pub tune_cents: f32,
    pub start_offset_frames: u32,
    pub fade_in_frames: u32,
}

impl Default for RegionAudioProps {
    fn default() -> Self {
        RegionAudioProps {
            gain_db: 0.0,
            tune_cents: 0.0,
            start_offset_frames: 0,
            fade_in_frames: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegionPlayback {
    pub keytrack_requirement: KeytrackRequirement,
}

/// Timbre layering: a second crossfade axis parallel to velocity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimbreLayering {
    /// Sub-range of `[0, 100]` this region occupies on the timbre axis.
    pub layer_range: Option<(u8, u8)>,
}

/// A single audio file's mapping: the unit the sampler triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Library-relative path of the audio file.
    pub path: String,
    pub root_key: u8,
    pub trigger: RegionTrigger,
    pub loop_: RegionLoop,
    pub audio_props: RegionAudioProps,
    pub playback: RegionPlayback,
    pub timbre_layering: TimbreLayering,
}

/// Per-instrument loop summary derived from the regions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoopOverview {
    pub has_loops: bool,
    pub has_non_loops: bool,
    /// Set iff every loop is in the same mode.
    pub all_loops_mode: Option<LoopMode>,
    /// Indexed by `LoopMode::index`: true iff no loop is mode-locked to a
    /// different mode.
    pub all_loops_convertible_to_mode: [bool; 2],
    pub user_defined_loops_allowed: bool,
    /// Legacy flag: every region demands looping.
    pub all_regions_require_looping: bool,
}

/// One round-robin equivalence class of an instrument and trigger event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRobinGroup {
    /// The manifest-supplied group name; `None` for the implicit unnamed group.
    pub name: Option<String>,
    pub max_rr_pos: u32,
}

/// A named set of regions within a library.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub name: String,
    /// Node in the library's instrument folder tree. Filled by bookkeeping for
    /// instruments without an explicit folder.
    pub folder: Option<NodeId>,
    /// Manifest-supplied folder subpath, if any.
    pub folder_path: Option<String>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
    /// Audio file shown as this instrument's waveform in pickers.
    pub waveform_audio_path: Option<String>,
    pub regions: Vec<Region>,
    // Derived by bookkeeping.
    pub loop_overview: LoopOverview,
    pub uses_timbre_layering: bool,
    /// Sequence groups per trigger event, densely indexed.
    pub round_robin_groups: BTreeMap<TriggerEvent, Vec<RoundRobinGroup>>,
}

/// A single audio file and gain, used by a convolution effect.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub name: String,
    pub path: String,
    pub folder: Option<NodeId>,
    pub folder_path: Option<String>,
    pub tags: BTreeSet<String>,
    pub description: Option<String>,
    pub gain_db: f32,
}

/// Attribution required when redistributing one of the library's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttribution {
    pub title: String,
    pub license_name: String,
    pub license_url: String,
    pub attributed_to: String,
    pub attribution_url: Option<String>,
}

/// Which manifest format produced a library.
#[derive(Debug, Clone)]
pub enum LibraryFormat {
    Lua,
    Mdata(mdata::MdataSpecifics),
}

/// Stable identity of a library: `"<name> - <author>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryId {
    pub author: String,
    pub name: String,
}

impl std::fmt::Display for LibraryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.name, self.author)
    }
}

/// A named, authored collection of instruments and impulse responses described
/// by one manifest.
#[derive(Debug)]
pub struct Library {
    pub name: String,
    pub author: String,
    /// Derived identity string if the manifest didn't set one.
    pub id: String,
    pub tagline: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub minor_version: u32,
    pub background_image_path: Option<String>,
    pub icon_image_path: Option<String>,
    pub required_floe_version: Option<String>,

    pub instruments: BTreeMap<String, Instrument>,
    pub irs: BTreeMap<String, ImpulseResponse>,

    /// One folder tree per resource type, shared by everything of that type.
    pub instrument_folders: FolderTree,
    pub ir_folders: FolderTree,
    /// Names in depth-first order, alphabetic within a folder.
    pub sorted_instruments: Vec<String>,
    pub sorted_irs: Vec<String>,

    /// Relative library path → attribution document entry.
    pub files_requiring_attribution: BTreeMap<String, FileAttribution>,

    pub num_audio_samples: usize,
    pub num_regions: usize,

    /// The library folder (Lua) or the `.mdata` file itself.
    pub path: PathBuf,
    /// XXH64 of every `.lua` file under the root, or of the MDATA stream.
    pub content_hash: u64,
    pub format: LibraryFormat,
}

impl Library {
    pub fn library_id(&self) -> LibraryId {
        LibraryId {
            author: self.author.clone(),
            name: self.name.clone(),
        }
    }

    /// Produces a byte reader for a library-relative path, backed by the
    /// filesystem for Lua libraries or by a slice of the MDATA blob.
    pub fn create_file_reader(
        &self,
        relative_path: &str,
    ) -> Result<Box<dyn Read + Send + Sync>, CatalogError> {
        match &self.format {
            LibraryFormat::Lua => {
                if !crate::util::path_is_contained(relative_path) {
                    return Err(CatalogError::invalid(
                        &self.path,
                        format!("path escapes the library folder: {}", relative_path),
                    ));
                }
                let full = self.path.join(relative_path);
                let file = File::open(&full).map_err(|e| CatalogError::io(&full, e))?;
                Ok(Box::new(file))
            }
            LibraryFormat::Mdata(specifics) => specifics.file_reader(&self.path, relative_path),
        }
    }

    pub fn folder_tree(&self, resource_type: ResourceType) -> &FolderTree {
        match resource_type {
            ResourceType::Instrument => &self.instrument_folders,
            ResourceType::Ir => &self.ir_folders,
        }
    }
}

/// Reads a library from disk, multiplexing on the format: a directory is a Lua
/// library (containing `floe.lua`), a `.mdata` file is a legacy library.
pub fn read(path: &Path, options: &lua::SandboxOptions) -> Result<Library, CatalogError> {
    if path.is_dir() {
        lua::read_lua(path, options)
    } else if path.extension().is_some_and(|ext| ext == "mdata") {
        mdata::read_mdata(path)
    } else {
        Err(CatalogError::NotFound(format!(
            "{} is neither a library folder nor an .mdata file",
            path.display()
        )))
    }
}

/// True if this directory entry looks like a library: a directory containing a
/// `floe.lua`, or a file named `*.mdata`.
pub fn is_library_path(path: &Path) -> bool {
    if path.is_dir() {
        path.join(lua::MANIFEST_FILENAME).is_file()
    } else {
        path.extension().is_some_and(|ext| ext == "mdata")
    }
}

/// XXH64 over the contents of every `.lua` file under the library root, in
/// sorted directory order, skipping dot-files. Stable across runs; sensitive
/// to any single-byte change.
pub fn lua_hash(root: &Path) -> Result<u64, CatalogError> {
    let mut hasher = Xxh64::new(0);
    hash_lua_dir(root, &mut hasher)?;
    Ok(hasher.digest())
}

fn hash_lua_dir(dir: &Path, hasher: &mut Xxh64) -> Result<(), CatalogError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| CatalogError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            !path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
        })
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            hash_lua_dir(&path, hasher)?;
        } else if path.extension().is_some_and(|ext| ext == "lua") {
            let bytes = fs::read(&path).map_err(|e| CatalogError::io(&path, e))?;
            hasher.update(&bytes);
        }
    }
    Ok(())
}

/// XXH64 of an entire MDATA file.
pub fn mdata_hash(path: &Path) -> Result<u64, CatalogError> {
    let bytes = fs::read(path).map_err(|e| CatalogError::io(path, e))?;
    Ok(xxhash_rust::xxh64::xxh64(&bytes, 0))
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    #[test]
    fn test_lua_hash_sensitivity() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("floe.lua"), b"return nil")?;
        fs::write(dir.path().join("extra.lua"), b"-- extra")?;
        fs::write(dir.path().join(".hidden.lua"), b"ignored")?;
        fs::write(dir.path().join("sample.wav"), b"not lua")?;

        let first = lua_hash(dir.path())?;
        let again = lua_hash(dir.path())?;
        assert_eq!(first, again, "hash must be stable across runs");

        // Non-lua and dot-file changes don't affect the hash.
        fs::write(dir.path().join("sample.wav"), b"different")?;
        fs::write(dir.path().join(".hidden.lua"), b"changed")?;
        assert_eq!(first, lua_hash(dir.path())?);

        // A one-byte change to a manifest file does.
        fs::write(dir.path().join("extra.lua"), b"-- extrb")?;
        assert_ne!(first, lua_hash(dir.path())?);
        Ok(())
    }

    #[test]
    fn test_key_and_velocity_overlap() {
        let a = KeyRange { start: 0, end: 64 };
        let b = KeyRange { start: 63, end: 128 };
        let c = KeyRange {
            start: 64,
            end: 128,
        };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));

        let lo = VelocityRange { start: 0, end: 50 };
        let hi = VelocityRange {
            start: 50,
            end: 101,
        };
        assert!(!lo.overlaps(&hi));
    }

    #[test]
    fn test_library_id_display() {
        let id = LibraryId {
            author: "FrozenPlain".to_string(),
            name: "Arctic Strings".to_string(),
        };
        assert_eq!("Arctic Strings - FrozenPlain", id.to_string());
    }
}
