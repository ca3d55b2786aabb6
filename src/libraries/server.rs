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

//! The sample-library server: same skeleton as the preset server, plus lazy
//! audio decoding behind a refcounted cache.
//!
//! Manifests are parsed on the server thread; callers hold `Arc<Library>`
//! handles that stay valid across republishes. Audio is decoded only when an
//! instrument or IR is requested, and replies arrive over a channel so the
//! caller never blocks on the decode.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::CatalogError;
use crate::libraries::{
    decode_library_audio, AudioCache, AudioCacheKey, AudioData, LoadedInstrument, LoadedIr,
};
use crate::library::{self, lua::SandboxOptions, Library, LibraryId};
use crate::signal::{WakeReason, WorkSignaller};

/// Sentinel meaning "no reader is pinning any version".
pub const NO_VERSION: u64 = u64::MAX;

const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// How deep below a scan folder we look for library roots.
const MAX_DISCOVERY_DEPTH: usize = 4;

/// Unreferenced decoded audio beyond this total is dropped after each load.
const AUDIO_CACHE_WATERMARK: usize = 256 * 1024 * 1024;

/// An immutable view of every successfully parsed library.
#[derive(Debug)]
pub struct LibrariesSnapshot {
    /// Sorted by library id.
    pub libraries: Vec<Arc<Library>>,
}

impl LibrariesSnapshot {
    pub fn find(&self, id: &LibraryId) -> Option<&Arc<Library>> {
        self.libraries.iter().find(|l| &l.library_id() == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Pending,
    Scanning,
    Scanned,
}

enum LoadRequest {
    Instrument {
        library_id: LibraryId,
        name: String,
        reply: Sender<Result<LoadedInstrument, CatalogError>>,
    },
    Ir {
        library_id: LibraryId,
        name: String,
        reply: Sender<Result<LoadedIr, CatalogError>>,
    },
}

struct ServerState {
    extra_scan_folders: Vec<PathBuf>,
    folder_states: HashMap<PathBuf, ScanState>,
    snapshot: Arc<LibrariesSnapshot>,
    load_requests: Vec<LoadRequest>,
}

struct Shared {
    state: Mutex<ServerState>,
    published_version: AtomicU64,
    version_in_use: AtomicU64,
    /// Cleared by the tag-builder UI so a live-saved manifest does not cycle
    /// the loaded instrument.
    watching_enabled: AtomicBool,
    signaller: WorkSignaller,
}

/// Handle to the library server thread. Dropping it asks the thread to exit
/// and joins it.
pub struct LibraryServer {
    shared: Arc<Shared>,
    always_scan_folder: PathBuf,
    thread: Option<thread::JoinHandle<()>>,
}

impl LibraryServer {
    pub fn spawn(always_scan_folder: PathBuf, sandbox: SandboxOptions) -> LibraryServer {
        let shared = Arc::new(Shared {
            state: Mutex::new(ServerState {
                extra_scan_folders: Vec::new(),
                folder_states: HashMap::new(),
                snapshot: Arc::new(LibrariesSnapshot {
                    libraries: Vec::new(),
                }),
                load_requests: Vec::new(),
            }),
            published_version: AtomicU64::new(0),
            version_in_use: AtomicU64::new(NO_VERSION),
            watching_enabled: AtomicBool::new(true),
            signaller: WorkSignaller::new(),
        });
        shared.signaller.signal();

        let thread = {
            let shared = Arc::clone(&shared);
            let always = always_scan_folder.clone();
            thread::spawn(move || run(shared, always, sandbox))
        };
        LibraryServer {
            shared,
            always_scan_folder,
            thread: Some(thread),
        }
    }

    pub fn set_extra_scan_folders(&self, folders: Vec<PathBuf>) {
        {
            let mut state = self.shared.state.lock();
            state.extra_scan_folders = folders;
        }
        self.shared.signaller.signal();
    }

    pub fn request_rescan(&self) {
        {
            let mut state = self.shared.state.lock();
            for scan_state in state.folder_states.values_mut() {
                *scan_state = ScanState::Pending;
            }
        }
        self.shared.signaller.signal();
    }

    /// Enables or disables reacting to filesystem watch events. Explicit
    /// rescans always work.
    pub fn set_watching_enabled(&self, enabled: bool) {
        self.shared.watching_enabled.store(enabled, Ordering::Release);
    }

    pub fn watching_enabled(&self) -> bool {
        self.shared.watching_enabled.load(Ordering::Acquire)
    }

    pub fn published_version(&self) -> u64 {
        self.shared.published_version.load(Ordering::Acquire)
    }

    /// Pins the current version and returns the snapshot.
    pub fn begin_read_libraries(&self) -> LibrariesReadGuard {
        let version = self.shared.published_version.load(Ordering::Acquire);
        self.shared.version_in_use.store(version, Ordering::Release);
        let snapshot = self.shared.state.lock().snapshot.clone();
        LibrariesReadGuard {
            shared: Arc::clone(&self.shared),
            snapshot,
        }
    }

    /// A retained handle to one library; valid for as long as the caller
    /// holds it, even across republishes.
    pub fn find_library_retained(&self, id: &LibraryId) -> Option<Arc<Library>> {
        self.shared.state.lock().snapshot.find(id).cloned()
    }

    /// Queues an instrument load. Every region's audio is decoded (or served
    /// from cache) on the server thread; the receiver yields exactly one
    /// result.
    pub fn load_instrument(
        &self,
        library_id: LibraryId,
        name: impl Into<String>,
    ) -> Receiver<Result<LoadedInstrument, CatalogError>> {
        let (reply, receiver) = bounded(1);
        self.shared.state.lock().load_requests.push(LoadRequest::Instrument {
            library_id,
            name: name.into(),
            reply,
        });
        self.shared.signaller.signal();
        receiver
    }

    pub fn load_ir(
        &self,
        library_id: LibraryId,
        name: impl Into<String>,
    ) -> Receiver<Result<LoadedIr, CatalogError>> {
        let (reply, receiver) = bounded(1);
        self.shared.state.lock().load_requests.push(LoadRequest::Ir {
            library_id,
            name: name.into(),
            reply,
        });
        self.shared.signaller.signal();
        receiver
    }

    pub fn always_scan_folder(&self) -> &Path {
        &self.always_scan_folder
    }
}

impl Drop for LibraryServer {
    fn drop(&mut self) {
        self.shared.signaller.end();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("library server thread panicked");
            }
        }
    }
}

/// A pinned snapshot. Dereferences to `LibrariesSnapshot`.
pub struct LibrariesReadGuard {
    shared: Arc<Shared>,
    snapshot: Arc<LibrariesSnapshot>,
}

impl Deref for LibrariesReadGuard {
    type Target = LibrariesSnapshot;

    fn deref(&self) -> &LibrariesSnapshot {
        &self.snapshot
    }
}

impl Drop for LibrariesReadGuard {
    fn drop(&mut self) {
        self.shared.version_in_use.store(NO_VERSION, Ordering::Release);
    }
}

fn run(shared: Arc<Shared>, always_scan_folder: PathBuf, sandbox: SandboxOptions) {
    info!(
        scan_folder = %always_scan_folder.display(),
        "library server started"
    );
    // Parsed libraries and decoded audio are owned by the server thread.
    let mut parsed: HashMap<PathBuf, Arc<Library>> = HashMap::new();
    let mut owning_scan_folder: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut watchers: HashMap<PathBuf, Debouncer<notify::RecommendedWatcher>> = HashMap::new();
    let mut audio_cache = AudioCache::new(AUDIO_CACHE_WATERMARK);

    loop {
        let scan_folders = current_scan_folders(&shared, &always_scan_folder);

        let removed: Vec<PathBuf> = watchers
            .keys()
            .filter(|path| !scan_folders.contains(path))
            .cloned()
            .collect();
        let mut changed = false;
        for scan_folder in removed {
            watchers.remove(&scan_folder);
            shared.state.lock().folder_states.remove(&scan_folder);
            let orphaned: Vec<PathBuf> = owning_scan_folder
                .iter()
                .filter(|(_, owner)| **owner == scan_folder)
                .map(|(path, _)| path.clone())
                .collect();
            for path in orphaned {
                parsed.remove(&path);
                owning_scan_folder.remove(&path);
                changed = true;
            }
        }

        for scan_folder in &scan_folders {
            if !watchers.contains_key(scan_folder) {
                match watch_scan_folder(&shared, scan_folder) {
                    Ok(watcher) => {
                        watchers.insert(scan_folder.clone(), watcher);
                    }
                    Err(e) => warn!(
                        scan_folder = %scan_folder.display(),
                        error = %e,
                        "unable to watch library folder; explicit rescans still work"
                    ),
                }
            }

            let pending = {
                let mut state = shared.state.lock();
                let scan_state = state
                    .folder_states
                    .entry(scan_folder.clone())
                    .or_insert(ScanState::Pending);
                if *scan_state == ScanState::Pending {
                    *scan_state = ScanState::Scanning;
                    true
                } else {
                    false
                }
            };
            if !pending {
                continue;
            }

            if rescan_scan_folder(
                scan_folder,
                &sandbox,
                &mut parsed,
                &mut owning_scan_folder,
            ) {
                changed = true;
            }
            if let Some(state) = shared
                .state
                .lock()
                .folder_states
                .get_mut(scan_folder.as_path())
            {
                if *state == ScanState::Scanning {
                    *state = ScanState::Scanned;
                }
            }
        }

        if changed {
            publish(&shared, &parsed);
        }

        let requests = std::mem::take(&mut shared.state.lock().load_requests);
        for request in requests {
            serve_load_request(request, &parsed, &mut audio_cache);
        }
        audio_cache.evict();

        let more_pending = {
            let state = shared.state.lock();
            state
                .folder_states
                .values()
                .any(|s| *s == ScanState::Pending)
                || !state.load_requests.is_empty()
        };
        if more_pending {
            continue;
        }

        if shared.signaller.wait() == WakeReason::End {
            break;
        }
    }
    info!("library server stopped");
}

fn current_scan_folders(shared: &Shared, always: &Path) -> Vec<PathBuf> {
    let state = shared.state.lock();
    let mut folders = vec![always.to_path_buf()];
    for extra in &state.extra_scan_folders {
        if !folders.contains(extra) {
            folders.push(extra.clone());
        }
    }
    folders
}

fn watch_scan_folder(
    shared: &Arc<Shared>,
    scan_folder: &Path,
) -> Result<Debouncer<notify::RecommendedWatcher>, notify::Error> {
    let callback = {
        let shared = Arc::clone(shared);
        let scan_folder = scan_folder.to_path_buf();
        move |result: DebounceEventResult| match result {
            Ok(_) => {
                if !shared.watching_enabled.load(Ordering::Acquire) {
                    return;
                }
                shared
                    .state
                    .lock()
                    .folder_states
                    .insert(scan_folder.clone(), ScanState::Pending);
                shared.signaller.signal();
            }
            Err(e) => warn!(error = %e, "library folder watch error"),
        }
    };
    let mut debouncer = new_debouncer(WATCH_DEBOUNCE, callback)?;
    debouncer
        .watcher()
        .watch(scan_folder, RecursiveMode::Recursive)?;
    Ok(debouncer)
}

/// Finds library roots under a scan folder and (re)parses the ones whose
/// content hash changed. Returns true if the parsed set changed.
fn rescan_scan_folder(
    scan_folder: &Path,
    sandbox: &SandboxOptions,
    parsed: &mut HashMap<PathBuf, Arc<Library>>,
    owning_scan_folder: &mut HashMap<PathBuf, PathBuf>,
) -> bool {
    let mut discovered = Vec::new();
    discover_library_paths(scan_folder, 0, &mut discovered);
    debug!(
        scan_folder = %scan_folder.display(),
        libraries = discovered.len(),
        "scanned library folder"
    );

    let mut changed = false;

    // Drop parsed libraries whose path is gone from this scan folder.
    let vanished: Vec<PathBuf> = owning_scan_folder
        .iter()
        .filter(|(path, owner)| **owner == *scan_folder && !discovered.contains(path))
        .map(|(path, _)| path.clone())
        .collect();
    for path in vanished {
        parsed.remove(&path);
        owning_scan_folder.remove(&path);
        changed = true;
    }

    for path in discovered {
        // The content hash is authoritative: a touched mtime with identical
        // bytes does not re-parse, a changed file always does.
        let current_hash = if path.is_dir() {
            library::lua_hash(&path)
        } else {
            library::mdata_hash(&path)
        };
        let current_hash = match current_hash {
            Ok(hash) => hash,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to hash library");
                continue;
            }
        };
        if parsed
            .get(&path)
            .is_some_and(|library| library.content_hash == current_hash)
        {
            continue;
        }

        match library::read(&path, sandbox) {
            Ok(library) => {
                info!(
                    library = %library.library_id(),
                    path = %path.display(),
                    "loaded library"
                );
                parsed.insert(path.clone(), Arc::new(library));
                owning_scan_folder.insert(path, scan_folder.to_path_buf());
                changed = true;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unable to read library");
                // A broken edit keeps the previous good parse published.
            }
        }
    }
    changed
}

fn discover_library_paths(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "unable to read scan folder");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
        {
            continue;
        }
        if library::is_library_path(&path) {
            out.push(path);
        } else if path.is_dir() && depth < MAX_DISCOVERY_DEPTH {
            discover_library_paths(&path, depth + 1, out);
        }
    }
}

fn publish(shared: &Shared, parsed: &HashMap<PathBuf, Arc<Library>>) {
    let mut by_id: BTreeMap<LibraryId, Arc<Library>> = BTreeMap::new();
    for library in parsed.values() {
        by_id.insert(library.library_id(), Arc::clone(library));
    }
    let snapshot = Arc::new(LibrariesSnapshot {
        libraries: by_id.into_values().collect(),
    });

    let mut state = shared.state.lock();
    state.snapshot = Arc::clone(&snapshot);
    let version = shared.published_version.fetch_add(1, Ordering::Release) + 1;
    debug!(
        version,
        libraries = snapshot.libraries.len(),
        "published library snapshot"
    );
}

fn serve_load_request(
    request: LoadRequest,
    parsed: &HashMap<PathBuf, Arc<Library>>,
    audio_cache: &mut AudioCache,
) {
    match request {
        LoadRequest::Instrument {
            library_id,
            name,
            reply,
        } => {
            let result = load_instrument(&library_id, &name, parsed, audio_cache);
            let _ = reply.send(result);
        }
        LoadRequest::Ir {
            library_id,
            name,
            reply,
        } => {
            let result = load_ir(&library_id, &name, parsed, audio_cache);
            let _ = reply.send(result);
        }
    }
}

fn find_parsed<'a>(
    parsed: &'a HashMap<PathBuf, Arc<Library>>,
    id: &LibraryId,
) -> Result<&'a Arc<Library>, CatalogError> {
    parsed
        .values()
        .find(|library| &library.library_id() == id)
        .ok_or_else(|| CatalogError::NotFound(format!("library '{}' is not loaded", id)))
}

fn cached_audio(
    library: &Arc<Library>,
    relative_path: &str,
    audio_cache: &mut AudioCache,
) -> Result<Arc<AudioData>, CatalogError> {
    let key = AudioCacheKey {
        library_id: library.library_id(),
        path: relative_path.to_string(),
    };
    if let Some(audio) = audio_cache.get(&key) {
        return Ok(audio);
    }
    let audio = Arc::new(decode_library_audio(library, relative_path)?);
    audio_cache.insert(key, Arc::clone(&audio));
    Ok(audio)
}

fn load_instrument(
    library_id: &LibraryId,
    name: &str,
    parsed: &HashMap<PathBuf, Arc<Library>>,
    audio_cache: &mut AudioCache,
) -> Result<LoadedInstrument, CatalogError> {
    let library = find_parsed(parsed, library_id)?;
    let instrument = library.instruments.get(name).ok_or_else(|| {
        CatalogError::NotFound(format!("no instrument '{}' in '{}'", name, library_id))
    })?;

    let mut audio_datas = Vec::with_capacity(instrument.regions.len());
    for region in &instrument.regions {
        audio_datas.push(cached_audio(library, &region.path, audio_cache)?);
    }
    Ok(LoadedInstrument {
        library: Arc::clone(library),
        instrument_name: name.to_string(),
        audio_datas,
    })
}

fn load_ir(
    library_id: &LibraryId,
    name: &str,
    parsed: &HashMap<PathBuf, Arc<Library>>,
    audio_cache: &mut AudioCache,
) -> Result<LoadedIr, CatalogError> {
    let library = find_parsed(parsed, library_id)?;
    let ir = library
        .irs
        .get(name)
        .ok_or_else(|| CatalogError::NotFound(format!("no IR '{}' in '{}'", name, library_id)))?;
    let audio = cached_audio(library, &ir.path, audio_cache)?;
    Ok(LoadedIr {
        library: Arc::clone(library),
        ir_name: name.to_string(),
        audio,
    })
}
