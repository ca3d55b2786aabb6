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

//! Read-only support for legacy `.mdata` libraries.
//!
//! An MDATA file is a single binary blob: a string pool, a file table, a
//! library info block and a trailing data pool holding the audio files
//! themselves. The format is long frozen; we only ever read it, and the parts
//! of the library model it cannot express stay at their defaults.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::CatalogError;
use crate::folders::FolderTree;
use crate::library::{
    bookkeeping, BuiltinLoop, ImpulseResponse, Instrument, KeyRange, Library, LibraryFormat,
    LoopMode, Region, RegionAudioProps, RegionLoop, RegionPlayback, RegionTrigger, TimbreLayering,
    TriggerEvent, VelocityRange, MAX_NAME_BYTES,
};

const MAGIC: &[u8; 4] = b"MDAT";
const SUPPORTED_VERSION: u32 = 1;
const NO_VALUE: u32 = u32::MAX;

/// Extent of one embedded file within the data pool.
#[derive(Debug, Clone, Copy)]
struct FileRange {
    offset: u64,
    size: u64,
}

/// The parts of an MDATA library that outlive parsing: the raw blob and the
/// table mapping library-relative paths into it.
#[derive(Debug, Clone)]
pub struct MdataSpecifics {
    blob: Arc<Vec<u8>>,
    data_pool_offset: u64,
    files: BTreeMap<String, FileRange>,
}

impl MdataSpecifics {
    /// A reader over one embedded file. The blob stays shared; nothing is
    /// copied.
    pub fn file_reader(
        &self,
        library_path: &Path,
        relative_path: &str,
    ) -> Result<Box<dyn Read + Send + Sync>, CatalogError> {
        let range = self.files.get(relative_path).ok_or_else(|| {
            CatalogError::NotFound(format!(
                "{} has no embedded file '{}'",
                library_path.display(),
                relative_path
            ))
        })?;
        let start = (self.data_pool_offset + range.offset) as usize;
        let end = start + range.size as usize;
        if end > self.blob.len() {
            return Err(CatalogError::Integrity(format!(
                "embedded file '{}' extends past the end of {}",
                relative_path,
                library_path.display()
            )));
        }
        Ok(Box::new(BlobReader {
            blob: Arc::clone(&self.blob),
            pos: start,
            end,
        }))
    }
}

struct BlobReader {
    blob: Arc<Vec<u8>>,
    pos: usize,
    end: usize,
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let available = &self.blob[self.pos..self.end];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Reads a whole `.mdata` library. The returned library has gone through the
/// same bookkeeping pass as a Lua one.
pub fn read_mdata(path: &Path) -> Result<Library, CatalogError> {
    let blob = fs::read(path).map_err(|e| CatalogError::io(path, e))?;
    let content_hash = xxhash_rust::xxh64::xxh64(&blob, 0);
    let blob = Arc::new(blob);

    let mut cursor = Cursor {
        bytes: &blob,
        pos: 0,
        path,
    };

    if cursor.take(4)? != MAGIC {
        return Err(CatalogError::invalid(path, "not an MDATA file"));
    }
    let version = cursor.u32()?;
    if version != SUPPORTED_VERSION {
        return Err(CatalogError::invalid(
            path,
            format!("unsupported MDATA version {}", version),
        ));
    }

    let pool_len = cursor.u32()? as usize;
    let string_pool = cursor.take(pool_len)?;
    debug!(
        path = %path.display(),
        string_pool_bytes = pool_len,
        "parsing mdata library"
    );

    let string = |offset: u32| -> Result<String, CatalogError> {
        let offset = offset as usize;
        if offset >= string_pool.len() {
            return Err(CatalogError::Integrity(format!(
                "{}: string offset {} outside the pool",
                path.display(),
                offset
            )));
        }
        let tail = &string_pool[offset..];
        let len = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8(tail[..len].to_vec()).map_err(|_| {
            CatalogError::Integrity(format!(
                "{}: string at offset {} is not UTF-8",
                path.display(),
                offset
            ))
        })
    };
    let optional_string = |offset: u32| -> Result<Option<String>, CatalogError> {
        if offset == NO_VALUE {
            Ok(None)
        } else {
            string(offset).map(Some)
        }
    };

    // File table: library-relative path plus extent in the data pool.
    let file_count = cursor.u32()?;
    let mut file_paths = Vec::with_capacity(file_count as usize);
    let mut files = BTreeMap::new();
    for _ in 0..file_count {
        let file_path = string(cursor.u32()?)?;
        let offset = cursor.u64()?;
        let size = cursor.u64()?;
        file_paths.push(file_path.clone());
        files.insert(file_path, FileRange { offset, size });
    }

    let file_path_at = |index: u32| -> Result<String, CatalogError> {
        file_paths
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                CatalogError::Integrity(format!(
                    "{}: file index {} outside the table",
                    path.display(),
                    index
                ))
            })
    };

    // Library info block.
    let name = string(cursor.u32()?)?;
    let author = string(cursor.u32()?)?;
    let minor_version = cursor.u32()?;
    for (what, value) in [("name", &name), ("author", &author)] {
        if value.is_empty() || value.len() > MAX_NAME_BYTES {
            return Err(CatalogError::Integrity(format!(
                "{}: library {} must be 1 to {} bytes",
                path.display(),
                what,
                MAX_NAME_BYTES
            )));
        }
    }

    let mut instruments = BTreeMap::new();
    let instrument_count = cursor.u32()?;
    for _ in 0..instrument_count {
        let instrument_name = string(cursor.u32()?)?;
        let folder_path = optional_string(cursor.u32()?)?;
        let region_count = cursor.u32()?;
        let mut regions = Vec::with_capacity(region_count as usize);
        for _ in 0..region_count {
            regions.push(read_region(&mut cursor, &file_path_at)?);
        }
        instruments.insert(
            instrument_name.clone(),
            Instrument {
                name: instrument_name,
                folder: None,
                folder_path,
                description: None,
                tags: Default::default(),
                waveform_audio_path: None,
                regions,
                loop_overview: Default::default(),
                uses_timbre_layering: false,
                round_robin_groups: BTreeMap::new(),
            },
        );
    }

    let mut irs = BTreeMap::new();
    let ir_count = cursor.u32()?;
    for _ in 0..ir_count {
        let ir_name = string(cursor.u32()?)?;
        let folder_path = optional_string(cursor.u32()?)?;
        let ir_path = file_path_at(cursor.u32()?)?;
        irs.insert(
            ir_name.clone(),
            ImpulseResponse {
                name: ir_name,
                path: ir_path,
                folder: None,
                folder_path,
                tags: Default::default(),
                description: None,
                gain_db: 0.0,
            },
        );
    }

    // Everything after the structured part is the data pool.
    let data_pool_offset = cursor.pos as u64;
    for range in files.values() {
        if data_pool_offset + range.offset + range.size > blob.len() as u64 {
            return Err(CatalogError::Integrity(format!(
                "{}: file table extends past the end of the blob",
                path.display()
            )));
        }
    }

    let mut library = Library {
        name,
        author,
        id: String::new(),
        tagline: None,
        description: None,
        url: None,
        minor_version,
        background_image_path: None,
        icon_image_path: None,
        required_floe_version: None,
        instruments,
        irs,
        instrument_folders: FolderTree::new(""),
        ir_folders: FolderTree::new(""),
        sorted_instruments: Vec::new(),
        sorted_irs: Vec::new(),
        files_requiring_attribution: BTreeMap::new(),
        num_audio_samples: 0,
        num_regions: 0,
        path: path.to_path_buf(),
        content_hash,
        format: LibraryFormat::Mdata(MdataSpecifics {
            blob: Arc::clone(&blob),
            data_pool_offset,
            files,
        }),
    };
    bookkeeping::post_read_bookkeeping(&mut library)?;
    Ok(library)
}

fn read_region(
    cursor: &mut Cursor<'_>,
    file_path_at: &impl Fn(u32) -> Result<String, CatalogError>,
) -> Result<Region, CatalogError> {
    let file_index = cursor.u32()?;
    let root_key = cursor.u8()?;
    let low_key = cursor.u8()?;
    let high_key = cursor.u8()?; // inclusive
    let low_velocity = cursor.u8()?;
    let high_velocity = cursor.u8()?;
    let rr_index = cursor.u32()?;
    let builtin = if cursor.u8()? != 0 {
        let start_frame = cursor.i64()?;
        let end_frame = cursor.i64()?;
        let crossfade_frames = cursor.u32()?;
        let ping_pong = cursor.u8()? != 0;
        Some(BuiltinLoop {
            start_frame,
            end_frame,
            crossfade_frames,
            mode: if ping_pong {
                LoopMode::PingPong
            } else {
                LoopMode::Standard
            },
            lock_loop_points: false,
            lock_mode: false,
        })
    } else {
        None
    };

    if root_key > 127 || high_key > 127 || low_key > high_key {
        return Err(CatalogError::Integrity(format!(
            "{}: region key values out of range",
            cursor.path.display()
        )));
    }
    if low_velocity > 127 || high_velocity > 127 || low_velocity > high_velocity {
        return Err(CatalogError::Integrity(format!(
            "{}: region velocity values out of range",
            cursor.path.display()
        )));
    }

    Ok(Region {
        path: file_path_at(file_index)?,
        root_key,
        trigger: RegionTrigger {
            event: TriggerEvent::NoteOn,
            key_range: KeyRange {
                start: low_key,
                end: high_key + 1,
            },
            velocity_range: midi_velocity_range(low_velocity, high_velocity),
            round_robin_index: if rr_index == NO_VALUE {
                None
            } else {
                Some(rr_index)
            },
            round_robin_group: None,
            round_robin_group_index: None,
            feather_overlapping_velocity_layers: false,
            auto_map_key_range_group: None,
        },
        loop_: RegionLoop {
            builtin,
            requirement: Default::default(),
        },
        audio_props: RegionAudioProps::default(),
        playback: RegionPlayback::default(),
        timbre_layering: TimbreLayering::default(),
    })
}

/// MDATA stores MIDI velocities; the model uses `[0, 101)`. Go through the
/// shared 0..=1000 mapping so the bucketing matches the Lua reader's.
fn midi_velocity_range(low: u8, high: u8) -> VelocityRange {
    let (start, end) = bookkeeping::map_midi_velocity_range(low, high);
    VelocityRange {
        start: (start / 10) as u8,
        end: (end / 10 + 1).min(101) as u8,
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CatalogError> {
        if self.pos + n > self.bytes.len() {
            return Err(CatalogError::Integrity(format!(
                "{}: truncated at byte {}",
                self.path.display(),
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CatalogError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CatalogError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, CatalogError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn i64(&mut self) -> Result<i64, CatalogError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }
}
