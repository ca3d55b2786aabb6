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

//! The filter engine: selected filter values per category, three match
//! modes, free-text search and favourites-only. Also item iteration and
//! random selection over the filtered view.

use std::collections::HashSet;

use rand::Rng;

use crate::browser::{BrowserItem, FilterCategory};

/// The set of selected value hashes for one filter category.
#[derive(Debug, Clone, Default)]
pub struct SelectedHashes {
    hashes: HashSet<u64>,
}

impl SelectedHashes {
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_selected(&self, hash: u64) -> bool {
        self.hashes.contains(&hash)
    }

    pub fn select(&mut self, hash: u64) {
        self.hashes.insert(hash);
    }

    pub fn deselect(&mut self, hash: u64) {
        self.hashes.remove(&hash);
    }

    /// Toggles and returns whether the hash is now selected.
    pub fn toggle(&mut self, hash: u64) -> bool {
        if !self.hashes.remove(&hash) {
            self.hashes.insert(hash);
            true
        } else {
            false
        }
    }

    /// In single-selection mode a click replaces the previous selection.
    pub fn select_only(&mut self, hash: u64) {
        self.hashes.clear();
        self.hashes.insert(hash);
    }

    pub fn clear(&mut self) {
        self.hashes.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.hashes.iter().copied()
    }
}

/// How selected filter values combine.
///
/// Single keeps at most one value per category and requires every active
/// category to match. MultipleAnd requires the item to match every selected
/// value in every category. MultipleOr passes an item that matches any
/// selected value in any category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Single,
    MultipleAnd,
    MultipleOr,
}

/// The complete browser filter state. Cloneable so counters can be computed
/// against a variant with one category blanked out.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    pub folders: SelectedHashes,
    pub libraries: SelectedHashes,
    pub library_authors: SelectedHashes,
    pub tags: SelectedHashes,
    pub preset_types: SelectedHashes,
    pub preset_authors: SelectedHashes,
    pub search: String,
    pub favourites_only: bool,
    pub mode: FilterMode,
}

impl FilterState {
    pub fn selected(&self, category: FilterCategory) -> &SelectedHashes {
        match category {
            FilterCategory::Folder => &self.folders,
            FilterCategory::Library => &self.libraries,
            FilterCategory::LibraryAuthor => &self.library_authors,
            FilterCategory::Tag => &self.tags,
            FilterCategory::PresetType => &self.preset_types,
            FilterCategory::PresetAuthor => &self.preset_authors,
        }
    }

    pub fn selected_mut(&mut self, category: FilterCategory) -> &mut SelectedHashes {
        match category {
            FilterCategory::Folder => &mut self.folders,
            FilterCategory::Library => &mut self.libraries,
            FilterCategory::LibraryAuthor => &mut self.library_authors,
            FilterCategory::Tag => &mut self.tags,
            FilterCategory::PresetType => &mut self.preset_types,
            FilterCategory::PresetAuthor => &mut self.preset_authors,
        }
    }

    /// Applies a click on a filter value, honouring the current mode.
    pub fn toggle(&mut self, category: FilterCategory, hash: u64) {
        let mode = self.mode;
        let selected = self.selected_mut(category);
        match mode {
            FilterMode::Single => {
                if selected.is_selected(hash) {
                    selected.deselect(hash);
                } else {
                    selected.select_only(hash);
                }
            }
            FilterMode::MultipleAnd | FilterMode::MultipleOr => {
                selected.toggle(hash);
            }
        }
    }

    pub fn clear(&mut self) {
        for category in FilterCategory::ALL {
            self.selected_mut(category).clear();
        }
        self.search.clear();
        self.favourites_only = false;
    }

    /// Whether any category has a selection.
    pub fn any_selected(&self) -> bool {
        FilterCategory::ALL
            .iter()
            .any(|&category| !self.selected(category).is_empty())
    }

    pub fn is_active(&self) -> bool {
        self.any_selected() || !self.search.is_empty() || self.favourites_only
    }

    /// The core filter predicate: true when the item should be hidden.
    pub fn should_skip<I: BrowserItem>(&self, item: &I) -> bool {
        if !self.search.is_empty() {
            let name = item.name().to_lowercase();
            if !name.contains(&self.search.to_lowercase()) {
                return true;
            }
        }
        if self.favourites_only && !item.is_favourite() {
            return true;
        }
        if !self.any_selected() {
            return false;
        }
        match self.mode {
            // Every active category must have at least one matching value.
            FilterMode::Single => FilterCategory::ALL.iter().any(|&category| {
                let selected = self.selected(category);
                !selected.is_empty() && !selected.iter().any(|hash| item.matches(category, hash))
            }),
            // Every selected value everywhere must match.
            FilterMode::MultipleAnd => FilterCategory::ALL.iter().any(|&category| {
                self.selected(category)
                    .iter()
                    .any(|hash| !item.matches(category, hash))
            }),
            // Any selected value anywhere may match.
            FilterMode::MultipleOr => !FilterCategory::ALL.iter().any(|&category| {
                self.selected(category)
                    .iter()
                    .any(|hash| item.matches(category, hash))
            }),
        }
    }
}

/// `used` is the count of items matching a value given every other active
/// filter; `available` ignores the filter state entirely. Values with
/// `available == 0` are not shown at all; `used == 0` renders greyed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterValueCounts {
    pub used: usize,
    pub available: usize,
}

/// Counts how a single filter value relates to the item list. The value's
/// own category is blanked out when computing `used` so that selecting a
/// value never zeroes its siblings.
pub fn value_counts<I: BrowserItem>(
    items: &[I],
    state: &FilterState,
    category: FilterCategory,
    value_hash: u64,
) -> FilterValueCounts {
    let mut without = state.clone();
    without.selected_mut(category).clear();
    let mut counts = FilterValueCounts {
        used: 0,
        available: 0,
    };
    for item in items {
        if !item.matches(category, value_hash) {
            continue;
        }
        counts.available += 1;
        if !without.should_skip(item) {
            counts.used += 1;
        }
    }
    counts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Steps from `cursor` to the next unfiltered item, wrapping around at most
/// once. With no filters active this is plain next/previous, so stepping
/// forward then backward lands back on the cursor.
pub fn iterate<I: BrowserItem>(
    items: &[I],
    state: &FilterState,
    cursor: usize,
    direction: Direction,
) -> Option<usize> {
    if items.is_empty() {
        return None;
    }
    let len = items.len();
    let mut index = cursor % len;
    for _ in 0..len {
        index = match direction {
            Direction::Forward => (index + 1) % len,
            Direction::Backward => (index + len - 1) % len,
        };
        if !state.should_skip(&items[index]) {
            return Some(index);
        }
    }
    None
}

/// Picks one unfiltered item uniformly at random.
pub fn load_random<I: BrowserItem, R: Rng>(
    items: &[I],
    state: &FilterState,
    rng: &mut R,
) -> Option<usize> {
    let survivors = items
        .iter()
        .filter(|item| !state.should_skip(*item))
        .count();
    if survivors == 0 {
        return None;
    }
    let pick = rng.gen_range(0..survivors);
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| !state.should_skip(*item))
        .nth(pick)
        .map(|(index, _)| index)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::browser::string_filter_hash;

    #[derive(Debug)]
    struct Item {
        name: &'static str,
        favourite: bool,
        folder: u64,
        library: u64,
        tags: Vec<u64>,
    }

    impl Item {
        fn new(name: &'static str, folder: &str, library: &str, tags: &[&str]) -> Item {
            Item {
                name,
                favourite: false,
                folder: string_filter_hash(folder),
                library: string_filter_hash(library),
                tags: tags.iter().map(|tag| string_filter_hash(tag)).collect(),
            }
        }
    }

    impl BrowserItem for Item {
        fn name(&self) -> &str {
            self.name
        }

        fn is_favourite(&self) -> bool {
            self.favourite
        }

        fn matches(&self, category: FilterCategory, value_hash: u64) -> bool {
            match category {
                FilterCategory::Folder => self.folder == value_hash,
                FilterCategory::Library => self.library == value_hash,
                FilterCategory::Tag => self.tags.contains(&value_hash),
                _ => false,
            }
        }
    }

    fn items() -> Vec<Item> {
        vec![
            Item::new("Warm Keys", "Keys", "Lib A", &["warm", "piano"]),
            Item::new("Bright Keys", "Keys", "Lib A", &["bright", "piano"]),
            Item::new("Low Pad", "Pads", "Lib B", &["warm"]),
            Item::new("Air Pad", "Pads", "Lib B", &["bright"]),
        ]
    }

    #[test]
    fn test_no_filters_pass_everything() {
        let state = FilterState::default();
        assert!(items().iter().all(|item| !state.should_skip(item)));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let mut state = FilterState::default();
        state.search = "PAD".to_string();
        let names: Vec<&str> = items()
            .iter()
            .filter(|item| !state.should_skip(*item))
            .map(|item| item.name)
            .collect();
        assert_eq!(vec!["Low Pad", "Air Pad"], names);
    }

    #[test]
    fn test_single_mode_ands_across_categories() {
        let mut state = FilterState::default();
        state.mode = FilterMode::Single;
        state.toggle(FilterCategory::Library, string_filter_hash("Lib A"));
        state.toggle(FilterCategory::Tag, string_filter_hash("warm"));
        let names: Vec<&str> = items()
            .iter()
            .filter(|item| !state.should_skip(*item))
            .map(|item| item.name)
            .collect();
        assert_eq!(vec!["Warm Keys"], names);
    }

    #[test]
    fn test_single_mode_replaces_selection() {
        let mut state = FilterState::default();
        state.mode = FilterMode::Single;
        state.toggle(FilterCategory::Tag, string_filter_hash("warm"));
        state.toggle(FilterCategory::Tag, string_filter_hash("bright"));
        assert_eq!(1, state.tags.len());
        assert!(state.tags.is_selected(string_filter_hash("bright")));
    }

    #[test]
    fn test_multiple_and_requires_every_value() {
        let mut state = FilterState::default();
        state.mode = FilterMode::MultipleAnd;
        state.toggle(FilterCategory::Tag, string_filter_hash("warm"));
        state.toggle(FilterCategory::Tag, string_filter_hash("piano"));
        let names: Vec<&str> = items()
            .iter()
            .filter(|item| !state.should_skip(*item))
            .map(|item| item.name)
            .collect();
        assert_eq!(vec!["Warm Keys"], names);
    }

    #[test]
    fn test_multiple_or_passes_any_value() {
        let mut state = FilterState::default();
        state.mode = FilterMode::MultipleOr;
        state.toggle(FilterCategory::Tag, string_filter_hash("bright"));
        state.toggle(FilterCategory::Library, string_filter_hash("Lib B"));
        let names: Vec<&str> = items()
            .iter()
            .filter(|item| !state.should_skip(*item))
            .map(|item| item.name)
            .collect();
        assert_eq!(vec!["Bright Keys", "Low Pad", "Air Pad"], names);
    }

    #[test]
    fn test_favourites_only() {
        let mut all = items();
        all[2].favourite = true;
        let mut state = FilterState::default();
        state.favourites_only = true;
        let names: Vec<&str> = all
            .iter()
            .filter(|item| !state.should_skip(*item))
            .map(|item| item.name)
            .collect();
        assert_eq!(vec!["Low Pad"], names);
    }

    #[test]
    fn test_value_counts_ignore_own_category() {
        let mut state = FilterState::default();
        state.mode = FilterMode::Single;
        state.toggle(FilterCategory::Tag, string_filter_hash("warm"));
        let all = items();
        // Selecting "warm" must not zero out "bright".
        let bright = value_counts(&all, &state, FilterCategory::Tag, string_filter_hash("bright"));
        assert_eq!(FilterValueCounts { used: 2, available: 2 }, bright);
        // A library value is still narrowed by the tag selection.
        let lib_a = value_counts(
            &all,
            &state,
            FilterCategory::Library,
            string_filter_hash("Lib A"),
        );
        assert_eq!(FilterValueCounts { used: 1, available: 2 }, lib_a);
    }

    #[test]
    fn test_iterate_wraps_and_skips() {
        let all = items();
        let mut state = FilterState::default();
        state.toggle(FilterCategory::Library, string_filter_hash("Lib B"));
        // From the last Lib B item, forward wraps to the first.
        assert_eq!(Some(2), iterate(&all, &state, 3, Direction::Forward));
        assert_eq!(Some(3), iterate(&all, &state, 2, Direction::Forward));
        assert_eq!(Some(2), iterate(&all, &state, 3, Direction::Backward));
    }

    #[test]
    fn test_iterate_forward_then_backward_returns_to_cursor() {
        let all = items();
        let state = FilterState::default();
        for cursor in 0..all.len() {
            let forward = iterate(&all, &state, cursor, Direction::Forward)
                .unwrap();
            let back = iterate(&all, &state, forward, Direction::Backward).unwrap();
            assert_eq!(cursor, back);
        }
    }

    #[test]
    fn test_iterate_all_filtered_returns_none() {
        let all = items();
        let mut state = FilterState::default();
        state.search = "no such item".to_string();
        assert_eq!(None, iterate(&all, &state, 0, Direction::Forward));
    }

    #[test]
    fn test_load_random_is_uniform_over_survivors() {
        let all = items();
        let mut state = FilterState::default();
        state.toggle(FilterCategory::Library, string_filter_hash("Lib A"));
        let mut rng = StdRng::seed_from_u64(17);
        let mut histogram: HashMap<usize, usize> = HashMap::new();
        for _ in 0..2000 {
            let index = load_random(&all, &state, &mut rng).unwrap();
            assert!(index < 2, "picked a filtered-out item");
            *histogram.entry(index).or_default() += 1;
        }
        // Two survivors should each land near 1000 picks.
        for count in histogram.values() {
            assert!(*count > 800 && *count < 1200, "count {count} not uniform");
        }
    }

    #[test]
    fn test_load_random_empty_view() {
        let all = items();
        let mut state = FilterState::default();
        state.favourites_only = true;
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(None, load_random(&all, &state, &mut rng));
    }
}
