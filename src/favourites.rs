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

//! Favourites and one-shot tips, stored as multi-values in the persistent
//! store under well-known keys.
//!
//! Each favourite value is the 8-byte stable hash of the item. The v2 hashes
//! include the library identity so two libraries with an equally named
//! instrument do not collide; v1 hashed the bare name, which is why a
//! migration exists.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use xxhash_rust::xxh64::xxh64;

use crate::error::CatalogError;
use crate::library::{Library, LibraryId};
use crate::notifications::{ErrorNotifications, Notification};
use crate::store::{GetResult, PersistentStore};

const FAVOURITE_INSTRUMENT_V2_KEY: &str = "favourite-instrument-v2";
const FAVOURITE_IR_V2_KEY: &str = "favourite-ir-v2";
const FAVOURITE_PRESET_KEY: &str = "favourite-preset";
const LEGACY_FAVOURITE_INSTRUMENT_KEY: &str = "favourite-instrument";
const LEGACY_FAVOURITE_IR_KEY: &str = "favourite-ir";
const SHOWN_TIPS_KEY: &str = "shown-tips";

fn store_key(name: &str) -> u64 {
    xxh64(name.as_bytes(), 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavouriteKind {
    Instrument,
    Ir,
    Preset,
}

impl FavouriteKind {
    fn key(&self) -> u64 {
        store_key(match self {
            FavouriteKind::Instrument => FAVOURITE_INSTRUMENT_V2_KEY,
            FavouriteKind::Ir => FAVOURITE_IR_V2_KEY,
            FavouriteKind::Preset => FAVOURITE_PRESET_KEY,
        })
    }

    fn legacy_key(&self) -> Option<u64> {
        match self {
            FavouriteKind::Instrument => Some(store_key(LEGACY_FAVOURITE_INSTRUMENT_KEY)),
            FavouriteKind::Ir => Some(store_key(LEGACY_FAVOURITE_IR_KEY)),
            FavouriteKind::Preset => None,
        }
    }
}

/// Stable hash of an instrument within a library. Survives file moves but not
/// renames.
pub fn instrument_hash(library_id: &LibraryId, instrument_name: &str) -> u64 {
    xxh64(format!("{}/{}", library_id, instrument_name).as_bytes(), 0)
}

pub fn ir_hash(library_id: &LibraryId, ir_name: &str) -> u64 {
    xxh64(format!("{}/{}", library_id, ir_name).as_bytes(), 0)
}

/// Stable hash of a preset, independent of its location and content.
pub fn preset_hash(preset_name: &str) -> u64 {
    xxh64(preset_name.as_bytes(), 0)
}

fn legacy_name_hash(name: &str) -> u64 {
    xxh64(name.as_bytes(), 0)
}

pub fn is_favourite(
    store: &mut PersistentStore,
    kind: FavouriteKind,
    item_hash: u64,
) -> Result<bool, CatalogError> {
    store.contains(kind.key(), &item_hash.to_le_bytes())
}

pub fn add_favourite(
    store: &mut PersistentStore,
    kind: FavouriteKind,
    item_hash: u64,
) -> Result<(), CatalogError> {
    if is_favourite(store, kind, item_hash)? {
        return Ok(());
    }
    store.add_value(kind.key(), &item_hash.to_le_bytes())
}

pub fn remove_favourite(
    store: &mut PersistentStore,
    kind: FavouriteKind,
    item_hash: u64,
) -> Result<(), CatalogError> {
    store.remove_value(kind.key(), Some(&item_hash.to_le_bytes()))
}

/// Returns the new state.
pub fn toggle_favourite(
    store: &mut PersistentStore,
    kind: FavouriteKind,
    item_hash: u64,
) -> Result<bool, CatalogError> {
    if is_favourite(store, kind, item_hash)? {
        remove_favourite(store, kind, item_hash)?;
        Ok(false)
    } else {
        add_favourite(store, kind, item_hash)?;
        Ok(true)
    }
}

fn hashes_at(store: &mut PersistentStore, key: u64) -> Result<HashSet<u64>, CatalogError> {
    let mut hashes = HashSet::new();
    if let GetResult::Found(values) = store.get(key)? {
        for value in values {
            if value.len() == 8 {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(value);
                hashes.insert(u64::from_le_bytes(buf));
            }
        }
    }
    Ok(hashes)
}

/// One-shot migration from the v1 name-only hashes. For every loaded library,
/// any instrument or IR whose legacy hash is present gets its v2 hash added;
/// the legacy keys are then deleted. Best effort: favourites of libraries
/// renamed before the migration ran are lost.
pub fn migrate_legacy_favourites(
    store: &mut PersistentStore,
    libraries: &[Arc<Library>],
) -> Result<(), CatalogError> {
    for kind in [FavouriteKind::Instrument, FavouriteKind::Ir] {
        let legacy_key = match kind.legacy_key() {
            Some(key) => key,
            None => continue,
        };
        let legacy = hashes_at(store, legacy_key)?;
        if legacy.is_empty() {
            continue;
        }
        info!(
            legacy_count = legacy.len(),
            kind = ?kind,
            "migrating legacy favourites"
        );

        let mut migrated = 0usize;
        for library in libraries {
            let id = library.library_id();
            let names: Vec<&String> = match kind {
                FavouriteKind::Instrument => library.instruments.keys().collect(),
                FavouriteKind::Ir => library.irs.keys().collect(),
                FavouriteKind::Preset => continue,
            };
            for name in names {
                if legacy.contains(&legacy_name_hash(name)) {
                    let stable = match kind {
                        FavouriteKind::Instrument => instrument_hash(&id, name),
                        FavouriteKind::Ir => ir_hash(&id, name),
                        FavouriteKind::Preset => continue,
                    };
                    add_favourite(store, kind, stable)?;
                    migrated += 1;
                }
            }
        }
        store.remove_value(legacy_key, None)?;
        debug!(migrated, kind = ?kind, "legacy favourites migrated");
    }
    Ok(())
}

/// Shows a tip once ever: if this tip id has not been recorded, raise a
/// notification and record it. Returns whether the tip was shown.
pub fn show_tip_if_needed(
    store: &mut PersistentStore,
    notifications: &ErrorNotifications,
    tip_id: &str,
    text: &str,
) -> Result<bool, CatalogError> {
    let hash = xxh64(tip_id.as_bytes(), 0);
    let key = store_key(SHOWN_TIPS_KEY);
    if store.contains(key, &hash.to_le_bytes())? {
        return Ok(false);
    }
    notifications.report(Notification {
        id: hash,
        title: "Tip".to_string(),
        message: Some(text.to_string()),
        error_code: None,
    });
    store.add_value(key, &hash.to_le_bytes())?;
    Ok(true)
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use crate::testutil::write_test_library;

    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> Result<PersistentStore, CatalogError> {
        PersistentStore::open(dir.path().join("store.floe"))
    }

    #[test]
    fn test_toggle_round_trip() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = open_store(&dir)?;
        let hash = preset_hash("Warm Pad");

        assert!(!is_favourite(&mut store, FavouriteKind::Preset, hash)?);
        assert!(toggle_favourite(&mut store, FavouriteKind::Preset, hash)?);
        assert!(is_favourite(&mut store, FavouriteKind::Preset, hash)?);
        assert!(!toggle_favourite(&mut store, FavouriteKind::Preset, hash)?);
        assert!(!is_favourite(&mut store, FavouriteKind::Preset, hash)?);
        Ok(())
    }

    #[test]
    fn test_add_is_idempotent() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = open_store(&dir)?;
        let hash = preset_hash("Warm Pad");

        add_favourite(&mut store, FavouriteKind::Preset, hash)?;
        add_favourite(&mut store, FavouriteKind::Preset, hash)?;
        remove_favourite(&mut store, FavouriteKind::Preset, hash)?;
        assert!(!is_favourite(&mut store, FavouriteKind::Preset, hash)?);
        Ok(())
    }

    #[test]
    fn test_kinds_do_not_collide() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = open_store(&dir)?;
        let hash = 42u64;

        add_favourite(&mut store, FavouriteKind::Instrument, hash)?;
        assert!(!is_favourite(&mut store, FavouriteKind::Ir, hash)?);
        assert!(!is_favourite(&mut store, FavouriteKind::Preset, hash)?);
        Ok(())
    }

    #[test]
    fn test_legacy_migration() -> Result<(), Box<dyn Error>> {
        let fixtures = tempfile::tempdir()?;
        let root = write_test_library(fixtures.path(), "Alpha", "Tester")?;
        let library = Arc::new(crate::library::read(
            &root,
            &crate::library::lua::SandboxOptions::default(),
        )?);

        let dir = tempfile::tempdir()?;
        let mut store = open_store(&dir)?;

        // The fixture library has an instrument called "Keys"; favourite it
        // the v1 way, plus a stale hash for something long gone.
        let legacy_key = store_key(LEGACY_FAVOURITE_INSTRUMENT_KEY);
        store.add_value(legacy_key, &legacy_name_hash("Keys").to_le_bytes())?;
        store.add_value(legacy_key, &legacy_name_hash("Gone").to_le_bytes())?;

        migrate_legacy_favourites(&mut store, &[Arc::clone(&library)])?;

        let stable = instrument_hash(&library.library_id(), "Keys");
        assert!(is_favourite(&mut store, FavouriteKind::Instrument, stable)?);
        assert!(matches!(store.get(legacy_key)?, GetResult::NotFound));

        // Running again is harmless.
        migrate_legacy_favourites(&mut store, &[library])?;
        Ok(())
    }

    #[test]
    fn test_show_tip_once() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let mut store = open_store(&dir)?;
        let notifications = ErrorNotifications::new();

        assert!(show_tip_if_needed(
            &mut store,
            &notifications,
            "browser.random",
            "Ctrl-click the dice for a filtered random pick."
        )?);
        assert_eq!(1, notifications.current().len());

        assert!(!show_tip_if_needed(
            &mut store,
            &notifications,
            "browser.random",
            "Ctrl-click the dice for a filtered random pick."
        )?);
        assert_eq!(1, notifications.current().len());
        Ok(())
    }
}
