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
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::CatalogError;

/// Entries beyond this size indicate a corrupt or hostile file.
const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// How often the background probe re-reads the on-disk modification time.
const PROBE_INTERVAL: Duration = Duration::from_secs(3);

/// Result of a lookup. `Found` borrows the value list; values within an id are
/// ordered newest-first because both loading and adding prepend.
#[derive(Debug, PartialEq, Eq)]
pub enum GetResult<'a> {
    NotFound,
    Found(&'a [Vec<u8>]),
}

/// A multi-value key/value table persisted to a single locked file, shared
/// across processes. Every mutation rewrites the whole file under an exclusive
/// lock; a low-frequency probe notices foreign writes so the next operation
/// reloads before applying.
pub struct PersistentStore {
    path: PathBuf,
    table: HashMap<u64, Vec<Vec<u8>>>,
    /// Modification time (microseconds since epoch) of the state we loaded.
    cached_mtime_micros: u64,
    /// Latest on-disk modification time observed by the probe thread.
    on_disk_mtime_micros: Arc<AtomicU64>,
    probe_stop: Arc<AtomicBool>,
    probe: Option<JoinHandle<()>>,
}

impl PersistentStore {
    /// Opens (or creates the notion of) a store at `path`. A missing file is
    /// treated as an empty table; it is created on the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Result<PersistentStore, CatalogError> {
        let path = path.into();
        let (table, mtime) = load_table(&path)?;

        let on_disk_mtime_micros = Arc::new(AtomicU64::new(mtime));
        let probe_stop = Arc::new(AtomicBool::new(false));
        let probe = {
            let path = path.clone();
            let on_disk = Arc::clone(&on_disk_mtime_micros);
            let stop = Arc::clone(&probe_stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(PROBE_INTERVAL);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Some(mtime) = stat_mtime_micros(&path) {
                        on_disk.store(mtime, Ordering::Relaxed);
                    }
                }
            })
        };

        Ok(PersistentStore {
            path,
            table,
            cached_mtime_micros: mtime,
            on_disk_mtime_micros,
            probe_stop,
            probe: Some(probe),
        })
    }

    /// Looks up all values stored under `id`.
    pub fn get(&mut self, id: u64) -> Result<GetResult<'_>, CatalogError> {
        self.reload_if_stale()?;
        Ok(match self.table.get(&id) {
            Some(values) => GetResult::Found(values),
            None => GetResult::NotFound,
        })
    }

    /// Returns true if `id` holds a value byte-equal to `bytes`.
    pub fn contains(&mut self, id: u64, bytes: &[u8]) -> Result<bool, CatalogError> {
        Ok(match self.get(id)? {
            GetResult::Found(values) => values.iter().any(|v| v == bytes),
            GetResult::NotFound => false,
        })
    }

    /// Adds a value under `id` (prepended to the id's list) and writes the
    /// table through to disk.
    pub fn add_value(&mut self, id: u64, bytes: &[u8]) -> Result<(), CatalogError> {
        self.reload_if_stale()?;
        self.table.entry(id).or_default().insert(0, bytes.to_vec());
        self.save()
    }

    /// Removes the single value matching `bytes` if supplied, otherwise removes
    /// the id entirely. Writes through to disk.
    pub fn remove_value(&mut self, id: u64, bytes: Option<&[u8]>) -> Result<(), CatalogError> {
        self.reload_if_stale()?;
        match bytes {
            Some(bytes) => {
                if let Some(values) = self.table.get_mut(&id) {
                    if let Some(pos) = values.iter().position(|v| v == bytes) {
                        values.remove(pos);
                    }
                    if values.is_empty() {
                        self.table.remove(&id);
                    }
                }
            }
            None => {
                self.table.remove(&id);
            }
        }
        self.save()
    }

    /// Ids present in the table, in no particular order.
    pub fn ids(&mut self) -> Result<Vec<u64>, CatalogError> {
        self.reload_if_stale()?;
        Ok(self.table.keys().copied().collect())
    }

    /// Forces one probe iteration. Mostly useful in tests, where waiting for
    /// the 3 second cadence is not an option.
    pub fn probe_now(&self) {
        if let Some(mtime) = stat_mtime_micros(&self.path) {
            self.on_disk_mtime_micros.store(mtime, Ordering::Relaxed);
        }
    }

    fn reload_if_stale(&mut self) -> Result<(), CatalogError> {
        let on_disk = self.on_disk_mtime_micros.load(Ordering::Relaxed);
        if on_disk > self.cached_mtime_micros {
            debug!(
                path = %self.path.display(),
                "Store file changed on disk. Reloading before applying."
            );
            let (table, mtime) = load_table(&self.path)?;
            self.table = table;
            self.cached_mtime_micros = mtime;
        }
        Ok(())
    }

    fn save(&mut self) -> Result<(), CatalogError> {
        let bytes = serialise_table(&self.table);

        // Hold the exclusive lock across open+write+close so racing processes
        // each produce a complete snapshot, never an interleaving.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| CatalogError::io(&self.path, e))?;
        file.lock().map_err(|e| CatalogError::io(&self.path, e))?;
        let result = write_locked(&file, &bytes);
        if let Err(e) = file.unlock() {
            warn!(path = %self.path.display(), err = %e, "Failed to unlock store file.");
        }
        result.map_err(|e| CatalogError::io(&self.path, e))?;

        if let Some(mtime) = stat_mtime_micros(&self.path) {
            self.cached_mtime_micros = mtime;
            self.on_disk_mtime_micros.store(mtime, Ordering::Relaxed);
        }
        Ok(())
    }
}

fn write_locked(mut file: &File, bytes: &[u8]) -> std::io::Result<()> {
    file.set_len(0)?;
    file.write_all(bytes)?;
    file.flush()
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        self.probe_stop.store(true, Ordering::Relaxed);
        // The probe sleeps in PROBE_INTERVAL slices; detach rather than stall
        // the caller for up to a full interval.
        drop(self.probe.take());
    }
}

/// Serialises the table as a concatenation of `{id: u64 LE, size: u32 LE, bytes}`
/// chunks, one per value, values of an id contiguous.
pub(crate) fn serialise_table(table: &HashMap<u64, Vec<Vec<u8>>>) -> Vec<u8> {
    let mut out = Vec::new();
    for (id, values) in table {
        for value in values {
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&(value.len() as u32).to_le_bytes());
            out.extend_from_slice(value);
        }
    }
    out
}

/// Rebuilds a table from chunk bytes. Each parsed value is prepended to its
/// id's list; malformed trailing bytes are discarded and the valid prefix kept.
pub(crate) fn parse_table(bytes: &[u8]) -> HashMap<u64, Vec<Vec<u8>>> {
    let mut table: HashMap<u64, Vec<Vec<u8>>> = HashMap::new();
    let mut offset = 0usize;
    while bytes.len() - offset >= 12 {
        let id = u64::from_le_bytes(bytes[offset..offset + 8].try_into().expect("sliced 8"));
        let size =
            u32::from_le_bytes(bytes[offset + 8..offset + 12].try_into().expect("sliced 4"))
                as usize;
        let start = offset + 12;
        if start + size > bytes.len() {
            warn!(
                trailing = bytes.len() - offset,
                "Discarding malformed trailing bytes in store file."
            );
            break;
        }
        table
            .entry(id)
            .or_default()
            .insert(0, bytes[start..start + size].to_vec());
        offset = start + size;
    }
    if offset < bytes.len() && bytes.len() - offset < 12 {
        warn!(
            trailing = bytes.len() - offset,
            "Discarding malformed trailing bytes in store file."
        );
    }
    table
}

fn load_table(path: &Path) -> Result<(HashMap<u64, Vec<Vec<u8>>>, u64), CatalogError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((HashMap::new(), 0));
        }
        Err(e) => return Err(CatalogError::io(path, e)),
    };

    let metadata = file.metadata().map_err(|e| CatalogError::io(path, e))?;
    if metadata.len() > MAX_FILE_SIZE {
        return Err(CatalogError::invalid(
            path,
            format!("store file exceeds {} bytes", MAX_FILE_SIZE),
        ));
    }

    file.lock_shared().map_err(|e| CatalogError::io(path, e))?;
    let mut bytes = Vec::with_capacity(metadata.len() as usize);
    let read = file.read_to_end(&mut bytes);
    let _ = file.unlock();
    read.map_err(|e| CatalogError::io(path, e))?;

    Ok((parse_table(&bytes), stat_mtime_micros(path).unwrap_or(0)))
}

fn stat_mtime_micros(path: &Path) -> Option<u64> {
    let mtime = fs::metadata(path).ok()?.modified().ok()?;
    Some(
        mtime
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_micros() as u64,
    )
}
