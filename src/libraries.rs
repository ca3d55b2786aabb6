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

//! Loaded sample-library resources: decoded audio, the audio cache and the
//! instrument/IR views handed to callers.
//!
//! Decoding happens on the library server thread (see `server`); the types
//! here are the shared, immutable results.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use crate::error::CatalogError;
use crate::library::{Library, LibraryId};

pub mod server;

/// One fully decoded audio file, interleaved f32.
#[derive(Debug)]
pub struct AudioData {
    pub interleaved: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.interleaved.len() / self.channels as usize
        }
    }

    pub fn memory_size(&self) -> usize {
        self.interleaved.len() * std::mem::size_of::<f32>()
    }
}

/// An instrument plus every region's decoded audio, parallel by index. Handed
/// out only once all entries are decoded.
#[derive(Debug, Clone)]
pub struct LoadedInstrument {
    pub library: Arc<Library>,
    pub instrument_name: String,
    pub audio_datas: Vec<Arc<AudioData>>,
}

#[derive(Debug, Clone)]
pub struct LoadedIr {
    pub library: Arc<Library>,
    pub ir_name: String,
    pub audio: Arc<AudioData>,
}

/// Decodes a whole audio stream to interleaved f32. The reader does not need
/// to be seekable; `extension` is only a probe hint.
pub fn decode_audio(
    reader: Box<dyn Read + Send + Sync>,
    extension: Option<&str>,
    display_path: &str,
) -> Result<AudioData, CatalogError> {
    let source = ReadOnlySource::new(reader);
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let invalid = |e: &dyn std::fmt::Display| {
        CatalogError::invalid(display_path, format!("unable to decode audio: {}", e))
    };

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| invalid(&e))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| invalid(&"no audio track"))?;
    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| invalid(&"sample rate not specified"))?;

    let mut decoder = get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| invalid(&e))?;

    let mut channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut interleaved = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            // Some decoders signal EOF with a decode error on the final
            // packet.
            Err(SymphoniaError::DecodeError(_)) => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(invalid(&e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(invalid(&e)),
        };
        if channels == 0 {
            channels = decoded.spec().channels.count() as u16;
        }
        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec())
        });
        if decoded.capacity() > buf.capacity() / channels.max(1) as usize {
            *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        }
        buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buf.samples());
    }

    if channels == 0 || interleaved.is_empty() {
        return Err(invalid(&"stream contains no audio"));
    }
    Ok(AudioData {
        interleaved,
        channels,
        sample_rate,
    })
}

/// Decodes one library-relative audio path via the library's own reader.
pub fn decode_library_audio(
    library: &Library,
    relative_path: &str,
) -> Result<AudioData, CatalogError> {
    let reader = library.create_file_reader(relative_path)?;
    let extension = relative_path.rsplit('.').next();
    let display = format!("{}:{}", library.path.display(), relative_path);
    decode_audio(reader, extension, &display)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AudioCacheKey {
    pub library_id: LibraryId,
    pub path: String,
}

struct CacheEntry {
    data: Arc<AudioData>,
    last_used: u64,
}

/// Decoded-audio cache. Entries are evicted oldest-first, but only once no
/// caller holds a reference, and only while the total size exceeds the
/// watermark.
pub struct AudioCache {
    entries: HashMap<AudioCacheKey, CacheEntry>,
    watermark_bytes: usize,
    clock: u64,
}

impl AudioCache {
    pub fn new(watermark_bytes: usize) -> AudioCache {
        AudioCache {
            entries: HashMap::new(),
            watermark_bytes,
            clock: 0,
        }
    }

    pub fn get(&mut self, key: &AudioCacheKey) -> Option<Arc<AudioData>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = clock;
            Arc::clone(&entry.data)
        })
    }

    pub fn insert(&mut self, key: AudioCacheKey, data: Arc<AudioData>) {
        self.clock += 1;
        self.entries.insert(
            key,
            CacheEntry {
                data,
                last_used: self.clock,
            },
        );
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.values().map(|e| e.data.memory_size()).sum()
    }

    /// Drops unreferenced entries, oldest first, until at or below the
    /// watermark. Entries still referenced elsewhere are never dropped.
    pub fn evict(&mut self) {
        let mut total = self.total_bytes();
        if total <= self.watermark_bytes {
            return;
        }
        let mut evictable: Vec<(AudioCacheKey, u64)> = self
            .entries
            .iter()
            .filter(|(_, entry)| Arc::strong_count(&entry.data) == 1)
            .map(|(key, entry)| (key.clone(), entry.last_used))
            .collect();
        evictable.sort_by_key(|(_, last_used)| *last_used);

        for (key, _) in evictable {
            if total <= self.watermark_bytes {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                total -= entry.data.memory_size();
                debug!(path = %key.path, "evicted cached audio");
            }
        }
    }
}
