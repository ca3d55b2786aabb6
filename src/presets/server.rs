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

//! The preset server: a dedicated worker thread that scans preset folders,
//! publishes immutable snapshots and retires old ones with epoch reclamation.
//!
//! One scan folder is always watched (the user's installation root); callers
//! can swap in extra scan folders at any time. Readers pin the published
//! version while they hold a snapshot so the server never frees folder data
//! out from under them.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::folders::{FolderTree, NodeId};
use crate::library::LibraryId;
use crate::presets::{is_preset_path, read_preset_file, Preset, PresetFolder};
use crate::presets::MAX_PRESET_FOLDER_DEPTH;
use crate::signal::{WakeReason, WorkSignaller};

/// Sentinel meaning "no reader is pinning any version".
pub const NO_VERSION: u64 = u64::MAX;

const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Everything a reader sees: an immutable, versioned view of the catalogue.
#[derive(Debug)]
pub struct PresetsSnapshot {
    /// Sorted by (display name, abbreviated scan folder).
    pub folders: Vec<Arc<PresetFolder>>,
    /// Folder-tree node per entry of `folders`, parallel by index.
    pub folder_nodes: Vec<NodeId>,
    pub folder_tree: FolderTree,
    pub used_tags: BTreeSet<String>,
    pub used_libraries: BTreeSet<LibraryId>,
    pub authors: BTreeSet<String>,
    /// Indexed by `PresetFormat::index`.
    pub has_preset_type: [bool; 2],
}

impl PresetsSnapshot {
    fn empty() -> PresetsSnapshot {
        PresetsSnapshot {
            folders: Vec::new(),
            folder_nodes: Vec::new(),
            folder_tree: FolderTree::new(""),
            used_tags: BTreeSet::new(),
            used_libraries: BTreeSet::new(),
            authors: BTreeSet::new(),
            has_preset_type: [false; 2],
        }
    }

    pub fn preset_count(&self) -> usize {
        self.folders.iter().map(|f| f.presets.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Pending,
    Scanning,
    Scanned,
}

/// Folders removed from the published snapshot, kept alive until no reader
/// can still be looking at the version that referenced them.
struct RetiredFolders {
    folders: Vec<Arc<PresetFolder>>,
    delete_after_version: u64,
}

struct ServerState {
    extra_scan_folders: Vec<PathBuf>,
    folder_states: HashMap<PathBuf, ScanState>,
    snapshot: Arc<PresetsSnapshot>,
    retired: Vec<RetiredFolders>,
}

struct Shared {
    state: Mutex<ServerState>,
    published_version: AtomicU64,
    version_in_use: AtomicU64,
    signaller: WorkSignaller,
}

/// Handle to the preset server thread. Dropping it asks the thread to exit
/// and joins it.
pub struct PresetServer {
    shared: Arc<Shared>,
    always_scan_folder: PathBuf,
    thread: Option<thread::JoinHandle<()>>,
}

impl PresetServer {
    /// Spawns the worker. `always_scan_folder` is scanned immediately and
    /// watched for as long as the server lives.
    pub fn spawn(always_scan_folder: PathBuf) -> PresetServer {
        let shared = Arc::new(Shared {
            state: Mutex::new(ServerState {
                extra_scan_folders: Vec::new(),
                folder_states: HashMap::new(),
                snapshot: Arc::new(PresetsSnapshot::empty()),
                retired: Vec::new(),
            }),
            published_version: AtomicU64::new(0),
            version_in_use: AtomicU64::new(NO_VERSION),
            signaller: WorkSignaller::new(),
        });
        shared.signaller.signal();

        let thread = {
            let shared = Arc::clone(&shared);
            let always = always_scan_folder.clone();
            thread::spawn(move || run(shared, always))
        };
        PresetServer {
            shared,
            always_scan_folder,
            thread: Some(thread),
        }
    }

    /// Replaces the set of extra scan folders. Folders no longer listed are
    /// dropped from the next snapshot.
    pub fn set_extra_scan_folders(&self, folders: Vec<PathBuf>) {
        {
            let mut state = self.shared.state.lock();
            state.extra_scan_folders = folders;
        }
        self.shared.signaller.signal();
    }

    /// Queues a rescan of every scan folder.
    pub fn request_rescan(&self) {
        {
            let mut state = self.shared.state.lock();
            for scan_state in state.folder_states.values_mut() {
                *scan_state = ScanState::Pending;
            }
        }
        self.shared.signaller.signal();
    }

    pub fn published_version(&self) -> u64 {
        self.shared.published_version.load(Ordering::Acquire)
    }

    /// Pins the current version and returns the snapshot. The pin is released
    /// when the guard drops; retired folder data outlives every pin that
    /// could reference it.
    pub fn begin_read_folders(&self) -> PresetsReadGuard {
        let version = self.shared.published_version.load(Ordering::Acquire);
        self.shared.version_in_use.store(version, Ordering::Release);
        let snapshot = self.shared.state.lock().snapshot.clone();
        PresetsReadGuard {
            shared: Arc::clone(&self.shared),
            snapshot,
        }
    }

    pub fn always_scan_folder(&self) -> &Path {
        &self.always_scan_folder
    }
}

impl Drop for PresetServer {
    fn drop(&mut self) {
        self.shared.signaller.end();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("preset server thread panicked");
            }
        }
    }
}

/// A pinned snapshot. Dereferences to `PresetsSnapshot`.
pub struct PresetsReadGuard {
    shared: Arc<Shared>,
    snapshot: Arc<PresetsSnapshot>,
}

impl Deref for PresetsReadGuard {
    type Target = PresetsSnapshot;

    fn deref(&self) -> &PresetsSnapshot {
        &self.snapshot
    }
}

impl Drop for PresetsReadGuard {
    fn drop(&mut self) {
        self.shared.version_in_use.store(NO_VERSION, Ordering::Release);
    }
}

fn run(shared: Arc<Shared>, always_scan_folder: PathBuf) {
    info!(
        scan_folder = %always_scan_folder.display(),
        "preset server started"
    );
    // The server thread owns the per-scan-folder results and the watchers;
    // only published snapshots are shared.
    let mut folders_by_scan_folder: HashMap<PathBuf, Vec<Arc<PresetFolder>>> = HashMap::new();
    let mut watchers: HashMap<PathBuf, Debouncer<notify::RecommendedWatcher>> = HashMap::new();

    loop {
        let scan_folders = current_scan_folders(&shared, &always_scan_folder);

        // Drop state for folders that were removed from the set.
        let removed: Vec<PathBuf> = folders_by_scan_folder
            .keys()
            .filter(|path| !scan_folders.contains(path))
            .cloned()
            .collect();
        let mut changed = !removed.is_empty();
        for path in removed {
            folders_by_scan_folder.remove(&path);
            watchers.remove(&path);
            shared.state.lock().folder_states.remove(&path);
        }

        for scan_folder in &scan_folders {
            if !watchers.contains_key(scan_folder) {
                match watch_scan_folder(&shared, scan_folder) {
                    Ok(watcher) => {
                        watchers.insert(scan_folder.clone(), watcher);
                    }
                    Err(e) => {
                        warn!(
                            scan_folder = %scan_folder.display(),
                            error = %e,
                            "unable to watch preset folder; explicit rescans still work"
                        );
                    }
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

            let folders = scan_scan_folder(scan_folder);
            debug!(
                scan_folder = %scan_folder.display(),
                folders = folders.len(),
                "scanned preset folder"
            );
            folders_by_scan_folder.insert(scan_folder.clone(), folders);
            changed = true;
            if let Some(state) = shared
                .state
                .lock()
                .folder_states
                .get_mut(scan_folder.as_path())
            {
                // A watch event during the scan resets it to Pending; keep
                // that so the next iteration rescans.
                if *state == ScanState::Scanning {
                    *state = ScanState::Scanned;
                }
            }
        }

        if changed {
            publish(&shared, &folders_by_scan_folder);
        }
        reclaim_retired(&shared, false);

        // Another pass if a watch event arrived while scanning.
        let more_pending = shared
            .state
            .lock()
            .folder_states
            .values()
            .any(|s| *s == ScanState::Pending);
        if more_pending {
            continue;
        }

        if shared.signaller.wait() == WakeReason::End {
            break;
        }
    }

    reclaim_retired(&shared, true);
    info!("preset server stopped");
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
                shared
                    .state
                    .lock()
                    .folder_states
                    .insert(scan_folder.clone(), ScanState::Pending);
                shared.signaller.signal();
            }
            Err(e) => warn!(error = %e, "preset folder watch error"),
        }
    };
    let mut debouncer = new_debouncer(WATCH_DEBOUNCE, callback)?;
    debouncer
        .watcher()
        .watch(scan_folder, RecursiveMode::Recursive)?;
    Ok(debouncer)
}

/// Reads every preset under a scan folder, grouped by containing directory.
/// Unreadable presets are logged and skipped; the rest of the folder still
/// publishes.
pub(crate) fn scan_scan_folder(scan_folder: &Path) -> Vec<Arc<PresetFolder>> {
    let mut presets_by_subpath: HashMap<String, Vec<Preset>> = HashMap::new();
    collect_presets(scan_folder, String::new(), 0, &mut presets_by_subpath);

    let mut folders: Vec<Arc<PresetFolder>> = presets_by_subpath
        .into_iter()
        .map(|(subpath, presets)| {
            Arc::new(PresetFolder::new(
                scan_folder.to_path_buf(),
                subpath,
                presets,
            ))
        })
        .collect();
    folders.sort_by(|a, b| a.folder.cmp(&b.folder));
    folders
}

fn collect_presets(
    dir: &Path,
    subpath: String,
    depth: usize,
    out: &mut HashMap<String, Vec<Preset>>,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "unable to read preset folder");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.starts_with('.') => name.to_string(),
            _ => continue,
        };
        if path.is_dir() {
            if depth < MAX_PRESET_FOLDER_DEPTH {
                let child_subpath = if subpath.is_empty() {
                    name
                } else {
                    format!("{}/{}", subpath, name)
                };
                collect_presets(&path, child_subpath, depth + 1, out);
            }
        } else if is_preset_path(&path) {
            match read_preset_file(&path) {
                Ok(preset) => out.entry(subpath.clone()).or_default().push(preset),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable preset"),
            }
        }
    }
}

fn publish(shared: &Shared, folders_by_scan_folder: &HashMap<PathBuf, Vec<Arc<PresetFolder>>>) {
    let all: Vec<Arc<PresetFolder>> = folders_by_scan_folder
        .values()
        .flat_map(|folders| folders.iter().cloned())
        .collect();
    let snapshot = Arc::new(build_snapshot(all));

    let mut state = shared.state.lock();
    let old_snapshot = std::mem::replace(&mut state.snapshot, Arc::clone(&snapshot));
    let old_version = shared.published_version.fetch_add(1, Ordering::Release);

    // Folders absent from the new snapshot cannot be freed until no reader is
    // pinned at or before the version that still referenced them.
    let dropped: Vec<Arc<PresetFolder>> = old_snapshot
        .folders
        .iter()
        .filter(|old| !snapshot.folders.iter().any(|new| Arc::ptr_eq(old, new)))
        .cloned()
        .collect();
    if !dropped.is_empty() {
        state.retired.push(RetiredFolders {
            folders: dropped,
            delete_after_version: old_version,
        });
    }
    debug!(
        version = old_version + 1,
        folders = snapshot.folders.len(),
        presets = snapshot.preset_count(),
        "published preset snapshot"
    );
}

pub(crate) fn build_snapshot(mut folders: Vec<Arc<PresetFolder>>) -> PresetsSnapshot {
    folders.sort_by(|a, b| {
        a.display_name()
            .cmp(b.display_name())
            .then_with(|| a.abbreviated_scan_folder.cmp(&b.abbreviated_scan_folder))
            .then_with(|| a.folder.cmp(&b.folder))
    });

    let mut folder_tree = FolderTree::new("");
    let mut folder_nodes = Vec::with_capacity(folders.len());
    let mut used_tags = BTreeSet::new();
    let mut used_libraries = BTreeSet::new();
    let mut authors = BTreeSet::new();
    let mut has_preset_type = [false; 2];

    for (index, folder) in folders.iter().enumerate() {
        let mut parts: Vec<&str> = vec![&folder.abbreviated_scan_folder];
        parts.extend(folder.folder.split('/').filter(|p| !p.is_empty()));
        // Depth is bounded by the scan recursion, so insertion cannot fail.
        let node = folder_tree
            .find_or_insert_parts(folder_tree.root(), &parts, MAX_PRESET_FOLDER_DEPTH + 1)
            .unwrap_or_else(|| folder_tree.root());
        folder_tree.set_user_data(node, index);
        folder_nodes.push(node);

        used_tags.extend(folder.used_tags.iter().cloned());
        used_libraries.extend(folder.used_libraries.iter().cloned());
        authors.extend(folder.used_library_authors.iter().cloned());
        for preset in &folder.presets {
            if let Some(author) = &preset.metadata.author {
                authors.insert(author.clone());
            }
            has_preset_type[preset.format.index()] = true;
        }
    }

    PresetsSnapshot {
        folders,
        folder_nodes,
        folder_tree,
        used_tags,
        used_libraries,
        authors,
        has_preset_type,
    }
}

/// Frees retired folders whose epoch has passed. When `block` is set (at
/// shutdown) this waits, yielding, until every reader lets go.
fn reclaim_retired(shared: &Shared, block: bool) {
    loop {
        let mut state = shared.state.lock();
        state.retired.retain(|retired| {
            let in_use = shared.version_in_use.load(Ordering::Acquire);
            !(in_use == NO_VERSION || in_use > retired.delete_after_version)
        });
        let remaining = state.retired.len();
        drop(state);

        if remaining == 0 || !block {
            return;
        }
        thread::yield_now();
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::time::Instant;

    use crate::presets::test::{floe_preset_json, mirage_preset_bytes};
    use crate::presets::{PresetFormat, FLOE_PRESET_EXTENSION};

    use super::*;

    fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn write_fixture_tree(root: &Path) {
        fs::create_dir_all(root.join("Pads")).expect("mkdir");
        fs::write(
            root.join("Init.floe-preset"),
            floe_preset_json("Sam", &["init"], &["Core - Floe"]),
        )
        .expect("write");
        fs::write(
            root.join("Pads/Warm.floe-preset"),
            floe_preset_json("Sam", &["pad"], &["Arctic Strings - FrozenPlain"]),
        )
        .expect("write");
        fs::write(
            root.join("Pads/Legacy.mirage"),
            mirage_preset_bytes("Mike", "Wraith - FrozenPlain"),
        )
        .expect("write");
    }

    #[test]
    fn test_scan_groups_by_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_fixture_tree(dir.path());

        let folders = scan_scan_folder(dir.path());
        assert_eq!(2, folders.len());
        assert_eq!("", folders[0].folder);
        assert_eq!(1, folders[0].presets.len());
        assert_eq!("Pads", folders[1].folder);
        assert_eq!(2, folders[1].presets.len());
    }

    #[test]
    fn test_snapshot_aggregates_and_orders() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_fixture_tree(dir.path());

        let snapshot = build_snapshot(scan_scan_folder(dir.path()));
        assert!(snapshot.has_preset_type[PresetFormat::Floe.index()]);
        assert!(snapshot.has_preset_type[PresetFormat::Mirage.index()]);
        assert!(snapshot.used_tags.contains("pad"));
        assert!(snapshot.authors.contains("Sam"));
        assert!(snapshot.authors.contains("FrozenPlain"));
        assert_eq!(snapshot.folders.len(), snapshot.folder_nodes.len());

        // Node user data points back at the folder index.
        for (index, node) in snapshot.folder_nodes.iter().enumerate() {
            assert_eq!(Some(index), snapshot.folder_tree.user_data(*node));
        }

        // Deterministic ordering across rebuilds.
        let again = build_snapshot(scan_scan_folder(dir.path()));
        let names: Vec<&str> = snapshot.folders.iter().map(|f| f.display_name()).collect();
        let names_again: Vec<&str> = again.folders.iter().map(|f| f.display_name()).collect();
        assert_eq!(names, names_again);
    }

    #[test]
    fn test_server_publishes_and_rescans() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_fixture_tree(dir.path());

        let server = PresetServer::spawn(dir.path().to_path_buf());
        wait_for("initial scan", || {
            server.published_version() >= 1 && server.begin_read_folders().preset_count() == 3
        });

        fs::write(
            dir.path().join("Extra.floe-preset"),
            floe_preset_json("Sam", &[], &[]),
        )
        .expect("write");
        server.request_rescan();
        wait_for("rescan", || {
            server.begin_read_folders().preset_count() == 4
        });
    }

    #[test]
    fn test_extra_scan_folders_added_and_removed() {
        let always = tempfile::tempdir().expect("tempdir");
        let extra = tempfile::tempdir().expect("tempdir");
        fs::write(
            extra.path().join("Solo.floe-preset"),
            floe_preset_json("Ana", &[], &[]),
        )
        .expect("write");

        let server = PresetServer::spawn(always.path().to_path_buf());
        server.set_extra_scan_folders(vec![extra.path().to_path_buf()]);
        wait_for("extra folder scan", || {
            server.begin_read_folders().preset_count() == 1
        });

        server.set_extra_scan_folders(vec![]);
        wait_for("extra folder removal", || {
            server.begin_read_folders().preset_count() == 0
        });
    }

    #[test]
    fn test_read_guard_pins_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = PresetServer::spawn(dir.path().to_path_buf());
        wait_for("initial scan", || server.published_version() >= 1);

        let guard = server.begin_read_folders();
        assert_ne!(
            NO_VERSION,
            server.shared.version_in_use.load(Ordering::Acquire)
        );
        drop(guard);
        assert_eq!(
            NO_VERSION,
            server.shared.version_in_use.load(Ordering::Acquire)
        );
    }

    #[test]
    fn test_match_full_preset_path_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_fixture_tree(dir.path());

        for folder in scan_scan_folder(dir.path()) {
            for (index, preset) in folder.presets.iter().enumerate() {
                let full = folder.full_path_for_preset(preset);
                assert!(full.is_file(), "{} should exist", full.display());
                assert_eq!(Some(index), folder.match_full_preset_path(&full));
                assert_eq!(
                    FLOE_PRESET_EXTENSION == preset.file_extension,
                    preset.format == PresetFormat::Floe
                );
            }
        }
    }
}
