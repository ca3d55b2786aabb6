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

//! Per-browser keyboard-navigation state: panel focus, item focus with a
//! ring history, section collapse, right-click menu capture and the
//! deferred end-of-frame action queue. Also the tag-builder side channel
//! that writes instrument tags back into a library folder.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write as _;
use std::path::Path;

use mlua::{Lua, LuaOptions, StdLib, Table, Value};
use tracing::{debug, info};

use crate::browser::FilterCategory;
use crate::browser::filter::{FilterMode, FilterState};
use crate::error::CatalogError;
use crate::libraries::server::LibraryServer;

/// How many recently focused items the ring history keeps; page-up and
/// page-down also jump by this many items.
pub const HISTORY_SIZE: usize = 8;

const INSTRUMENT_TAGS_FILENAME: &str = "instrument_tags.lua";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Panel {
    #[default]
    Filters,
    Items,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMove {
    Tab,
    Left,
    Right,
}

/// Absolute screen rectangle, captured by value so the menu can be redrawn
/// on later frames without touching the widget that opened it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Right-click menu state. Only copies are held; the hash identifies the
/// item the menu acts on.
#[derive(Debug, Clone, Copy)]
pub struct RightClickMenu {
    pub rect: Rect,
    pub item_hash: u64,
}

/// A mutation requested during a frame. Nothing is applied mid-frame;
/// actions queue up and run together at end-of-frame so every widget in the
/// frame sees the same filter state.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserAction {
    ToggleFilter { category: FilterCategory, hash: u64 },
    SetSearch(String),
    SetFilterMode(FilterMode),
    SetFavouritesOnly(bool),
    ClearFilters,
    SelectItem(u64),
    ToggleFavourite(u64),
}

/// Navigation state for one browser window.
#[derive(Debug, Default)]
pub struct BrowserNav {
    pub focused_panel: Panel,
    focused_item: [Option<u64>; 2],
    history: Vec<u64>,
    collapsed_sections: BTreeSet<String>,
    right_click: Option<RightClickMenu>,
    deferred: Vec<BrowserAction>,
}

impl BrowserNav {
    pub fn new() -> BrowserNav {
        BrowserNav::default()
    }

    /// Tab toggles between the two panels; Left and Right move towards the
    /// filters and items panels respectively.
    pub fn move_focus(&mut self, movement: FocusMove) {
        self.focused_panel = match (self.focused_panel, movement) {
            (Panel::Filters, FocusMove::Tab) => Panel::Items,
            (Panel::Items, FocusMove::Tab) => Panel::Filters,
            (_, FocusMove::Left) => Panel::Filters,
            (_, FocusMove::Right) => Panel::Items,
        };
    }

    pub fn focused_item(&self, panel: Panel) -> Option<u64> {
        self.focused_item[panel_key(panel)]
    }

    /// Moves focus within a panel and records items-panel visits in the
    /// ring history.
    pub fn focus_item(&mut self, panel: Panel, hash: u64) {
        self.focused_item[panel_key(panel)] = Some(hash);
        if panel == Panel::Items {
            self.history.retain(|&entry| entry != hash);
            self.history.push(hash);
            if self.history.len() > HISTORY_SIZE {
                self.history.remove(0);
            }
        }
    }

    /// Most recent first.
    pub fn history(&self) -> impl Iterator<Item = u64> + '_ {
        self.history.iter().rev().copied()
    }

    /// Page-up and page-down jump a whole history-page of items at once.
    pub fn page_jump(&self, item_count: usize, current: usize, forward: bool) -> usize {
        if item_count == 0 {
            return 0;
        }
        if forward {
            (current + HISTORY_SIZE).min(item_count - 1)
        } else {
            current.saturating_sub(HISTORY_SIZE)
        }
    }

    pub fn is_section_collapsed(&self, section: &str) -> bool {
        self.collapsed_sections.contains(section)
    }

    pub fn toggle_section_collapsed(&mut self, section: &str) {
        if !self.collapsed_sections.remove(section) {
            self.collapsed_sections.insert(section.to_string());
        }
    }

    pub fn collapsed_sections(&self) -> impl Iterator<Item = &str> {
        self.collapsed_sections.iter().map(|section| section.as_str())
    }

    /// Any right-click replaces whatever menu was open before.
    pub fn open_right_click(&mut self, rect: Rect, item_hash: u64) {
        self.right_click = Some(RightClickMenu { rect, item_hash });
    }

    pub fn close_right_click(&mut self) {
        self.right_click = None;
    }

    pub fn right_click(&self) -> Option<&RightClickMenu> {
        self.right_click.as_ref()
    }

    pub fn defer(&mut self, action: BrowserAction) {
        self.deferred.push(action);
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Runs the queued actions against the filter state. Actions the filter
    /// state cannot consume (selection, favourites) are returned in order
    /// for the caller to act on.
    pub fn apply_deferred(&mut self, state: &mut FilterState) -> Vec<BrowserAction> {
        let mut remaining = Vec::new();
        for action in self.deferred.drain(..) {
            match action {
                BrowserAction::ToggleFilter { category, hash } => state.toggle(category, hash),
                BrowserAction::SetSearch(search) => state.search = search,
                BrowserAction::SetFilterMode(mode) => state.mode = mode,
                BrowserAction::SetFavouritesOnly(on) => state.favourites_only = on,
                BrowserAction::ClearFilters => state.clear(),
                other => remaining.push(other),
            }
        }
        remaining
    }
}

fn panel_key(panel: Panel) -> usize {
    match panel {
        Panel::Filters => 0,
        Panel::Items => 1,
    }
}

/// The tag-builder side channel. While a panel is open the library server's
/// file watching is suspended so half-written tag files are never parsed;
/// the server picks the edit up after `close`.
pub struct TagBuilderSession<'a> {
    server: &'a LibraryServer,
    closed: bool,
}

impl<'a> TagBuilderSession<'a> {
    pub fn open(server: &'a LibraryServer) -> TagBuilderSession<'a> {
        server.set_watching_enabled(false);
        debug!("tag builder opened, file watching suspended");
        TagBuilderSession {
            server,
            closed: false,
        }
    }

    pub fn close(mut self) {
        self.closed = true;
        self.server.set_watching_enabled(true);
        self.server.request_rescan();
        debug!("tag builder closed, file watching resumed");
    }
}

impl Drop for TagBuilderSession<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.server.set_watching_enabled(true);
        }
    }
}

/// Reads the hidden per-library tag overrides, mapping instrument name to
/// its extra tags. A missing file is an empty map.
pub fn read_instrument_tags(
    library_root: &Path,
) -> Result<BTreeMap<String, BTreeSet<String>>, CatalogError> {
    let path = library_root.join("Lua").join(INSTRUMENT_TAGS_FILENAME);
    let code = match fs::read_to_string(&path) {
        Ok(code) => code,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BTreeMap::new());
        }
        Err(error) => return Err(CatalogError::io(&path, error)),
    };

    let lua = Lua::new_with(StdLib::NONE, LuaOptions::default())
        .map_err(|error| CatalogError::invalid(&path, error.to_string()))?;
    let value: Value = lua
        .load(&code)
        .set_name(INSTRUMENT_TAGS_FILENAME)
        .eval()
        .map_err(|error| CatalogError::invalid(&path, error.to_string()))?;
    let Value::Table(table) = value else {
        return Err(CatalogError::invalid(&path, "expected the file to return a table"));
    };

    let mut tags = BTreeMap::new();
    for pair in table.pairs::<String, Table>() {
        let (instrument, list) =
            pair.map_err(|error| CatalogError::invalid(&path, error.to_string()))?;
        let mut set = BTreeSet::new();
        for entry in list.sequence_values::<String>() {
            let tag = entry.map_err(|error| CatalogError::invalid(&path, error.to_string()))?;
            set.insert(tag);
        }
        tags.insert(instrument, set);
    }
    Ok(tags)
}

/// Writes the tag overrides back, creating `Lua/` if needed. The write goes
/// through a temporary file and a rename so a watcher never sees a partial
/// file.
pub fn write_instrument_tags(
    library_root: &Path,
    tags: &BTreeMap<String, BTreeSet<String>>,
) -> Result<(), CatalogError> {
    let folder = library_root.join("Lua");
    fs::create_dir_all(&folder).map_err(|error| CatalogError::io(&folder, error))?;
    let path = folder.join(INSTRUMENT_TAGS_FILENAME);

    let mut code = String::from("-- Maintained by the tag builder. Edits here may be overwritten.\nreturn {\n");
    for (instrument, set) in tags {
        code.push_str(&format!("    [{}] = {{", lua_quote(instrument)));
        let mut first = true;
        for tag in set {
            if !first {
                code.push_str(", ");
            }
            first = false;
            code.push_str(&lua_quote(tag));
        }
        code.push_str("},\n");
    }
    code.push_str("}\n");

    let mut temp = tempfile::NamedTempFile::new_in(&folder)
        .map_err(|error| CatalogError::io(&folder, error))?;
    temp.write_all(code.as_bytes())
        .map_err(|error| CatalogError::io(&path, error))?;
    temp.persist(&path)
        .map_err(|error| CatalogError::io(&path, error.error))?;
    info!(path = %path.display(), instruments = tags.len(), "wrote instrument tags");
    Ok(())
}

fn lua_quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
