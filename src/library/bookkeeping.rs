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

//! Deterministic post-parse bookkeeping, shared by both manifest readers.
//!
//! Everything here is derived purely from the parsed library, so running the
//! pass twice produces the same result.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::CatalogError;
use crate::folders::{FolderTree, NodeId};
use crate::library::{
    Library, LoopMode, LoopOverview, LoopRequirement, RoundRobinGroup, TriggerEvent,
    MAX_FOLDER_DEPTH, MAX_ROUND_ROBIN_GROUPS,
};

/// Runs the whole pass. Folder trees, sort orders, ids, loop overviews,
/// round-robin groups, auto-mapped key ranges and overlap checks.
pub fn post_read_bookkeeping(library: &mut Library) -> Result<(), CatalogError> {
    if library.id.is_empty() {
        library.id = format!("{} - {}", library.name, library.author);
    }

    rebuild_folder_trees(library)?;
    build_sorted_spans(library);

    let library_path = library.path.clone();
    for instrument in library.instruments.values_mut() {
        auto_map_key_ranges(&mut instrument.regions);
        instrument.loop_overview = loop_overview(&instrument.regions);
        instrument.uses_timbre_layering = instrument
            .regions
            .iter()
            .any(|r| r.timbre_layering.layer_range.is_some());
        instrument.round_robin_groups =
            assign_round_robin_groups(&instrument.name, &mut instrument.regions)?;
        check_overlaps(&library_path, &instrument.name, &instrument.regions)?;
    }

    library.num_regions = library
        .instruments
        .values()
        .map(|i| i.regions.len())
        .sum();
    let mut distinct_paths: HashSet<&str> = HashSet::new();
    for instrument in library.instruments.values() {
        for region in &instrument.regions {
            distinct_paths.insert(region.path.as_str());
        }
    }
    library.num_audio_samples = distinct_paths.len();
    Ok(())
}

/// Root folder nodes are named `"<libname> - <author>"` and displayed as just
/// the library name; every instrument and IR chain terminates at its root.
fn rebuild_folder_trees(library: &mut Library) -> Result<(), CatalogError> {
    let root_name = format!("{} - {}", library.name, library.author);
    let display_name = library.name.clone();
    let path = library.path.clone();

    let mut instrument_folders = FolderTree::new(root_name.clone());
    instrument_folders.set_display_name(instrument_folders.root(), display_name.clone());
    for instrument in library.instruments.values_mut() {
        instrument.folder = Some(attach(
            &mut instrument_folders,
            instrument.folder_path.as_deref(),
            &path,
        )?);
    }
    instrument_folders.sort_tree(instrument_folders.root());

    let mut ir_folders = FolderTree::new(root_name);
    ir_folders.set_display_name(ir_folders.root(), display_name);
    for ir in library.irs.values_mut() {
        ir.folder = Some(attach(&mut ir_folders, ir.folder_path.as_deref(), &path)?);
    }
    ir_folders.sort_tree(ir_folders.root());

    library.instrument_folders = instrument_folders;
    library.ir_folders = ir_folders;
    Ok(())
}

fn attach(
    tree: &mut FolderTree,
    folder_path: Option<&str>,
    library_path: &std::path::Path,
) -> Result<NodeId, CatalogError> {
    match folder_path {
        None => Ok(tree.root()),
        Some(subpath) => {
            let parts: Vec<&str> = subpath.split('/').filter(|p| !p.is_empty()).collect();
            tree.find_or_insert_parts(tree.root(), &parts, MAX_FOLDER_DEPTH)
                .ok_or_else(|| {
                    CatalogError::invalid(
                        library_path,
                        format!(
                            "folder '{}' exceeds the maximum depth of {}",
                            subpath, MAX_FOLDER_DEPTH
                        ),
                    )
                })
        }
    }
}

/// Depth-first name spans: a folder's own items alphabetically, then each
/// child folder in sorted order.
fn build_sorted_spans(library: &mut Library) {
    fn by_folder<'a>(names: Vec<(Option<NodeId>, &'a String)>) -> HashMap<NodeId, Vec<&'a String>> {
        let mut map: HashMap<NodeId, Vec<&'a String>> = HashMap::new();
        for (folder, name) in names {
            if let Some(folder) = folder {
                map.entry(folder).or_default().push(name);
            }
        }
        map
    }

    let instrument_map = by_folder(
        library
            .instruments
            .values()
            .map(|i| (i.folder, &i.name))
            .collect(),
    );
    library.sorted_instruments =
        walk_sorted(&library.instrument_folders, library.instrument_folders.root(), &instrument_map);

    let ir_map = by_folder(library.irs.values().map(|ir| (ir.folder, &ir.name)).collect());
    library.sorted_irs = walk_sorted(&library.ir_folders, library.ir_folders.root(), &ir_map);
}

fn walk_sorted(
    tree: &FolderTree,
    node: NodeId,
    items: &HashMap<NodeId, Vec<&String>>,
) -> Vec<String> {
    let mut result = Vec::new();
    let mut own: Vec<&String> = items.get(&node).cloned().unwrap_or_default();
    own.sort();
    result.extend(own.into_iter().cloned());
    for child in tree.children(node) {
        result.extend(walk_sorted(tree, child, items));
    }
    result
}

fn loop_overview(regions: &[super::Region]) -> LoopOverview {
    let mut overview = LoopOverview {
        all_loops_convertible_to_mode: [true; 2],
        user_defined_loops_allowed: true,
        all_regions_require_looping: !regions.is_empty(),
        ..Default::default()
    };

    let mut modes: HashSet<LoopMode> = HashSet::new();
    let mut all_have_locked_loops = !regions.is_empty();
    let mut all_never_loop = !regions.is_empty();
    for region in regions {
        match &region.loop_.builtin {
            Some(builtin) => {
                overview.has_loops = true;
                modes.insert(builtin.mode);
                if builtin.lock_mode {
                    for mode in LoopMode::ALL {
                        if mode != builtin.mode {
                            overview.all_loops_convertible_to_mode[mode.index()] = false;
                        }
                    }
                }
                if !builtin.lock_loop_points {
                    all_have_locked_loops = false;
                }
            }
            None => {
                overview.has_non_loops = true;
                all_have_locked_loops = false;
            }
        }
        if region.loop_.requirement != LoopRequirement::NeverLoop {
            all_never_loop = false;
        }
        if region.loop_.requirement != LoopRequirement::AlwaysLoop {
            overview.all_regions_require_looping = false;
        }
    }

    if modes.len() == 1 {
        overview.all_loops_mode = modes.into_iter().next();
    }
    if all_have_locked_loops || all_never_loop {
        overview.user_defined_loops_allowed = false;
    }
    overview
}

/// Allocates a dense index per `(trigger_event, named group)` in order of
/// first appearance, bounded by `MAX_ROUND_ROBIN_GROUPS`, and records the
/// highest round-robin position seen per group.
fn assign_round_robin_groups(
    instrument_name: &str,
    regions: &mut [super::Region],
) -> Result<BTreeMap<TriggerEvent, Vec<RoundRobinGroup>>, CatalogError> {
    let mut groups: BTreeMap<TriggerEvent, Vec<RoundRobinGroup>> = BTreeMap::new();

    for region in regions.iter_mut() {
        region.trigger.round_robin_group_index = None;
        if region.trigger.round_robin_index.is_none()
            && region.trigger.round_robin_group.is_none()
        {
            continue;
        }
        let event_groups = groups.entry(region.trigger.event).or_default();
        let name = region.trigger.round_robin_group.clone();
        let index = match event_groups.iter().position(|g| g.name == name) {
            Some(index) => index,
            None => {
                if event_groups.len() >= MAX_ROUND_ROBIN_GROUPS {
                    return Err(CatalogError::ResourceLimit(format!(
                        "instrument '{}' has more than {} round-robin sequence groups",
                        instrument_name, MAX_ROUND_ROBIN_GROUPS
                    )));
                }
                event_groups.push(RoundRobinGroup {
                    name,
                    max_rr_pos: 0,
                });
                event_groups.len() - 1
            }
        };
        if let Some(pos) = region.trigger.round_robin_index {
            let group = &mut event_groups[index];
            group.max_rr_pos = group.max_rr_pos.max(pos);
        }
        region.trigger.round_robin_group_index = Some(index);
    }
    Ok(groups)
}

/// Derives key ranges from root keys for every named auto-map group: each
/// region covers from the previous region's end to halfway towards the next
/// root key, partitioning `[0, 128)` without gaps or overlaps.
fn auto_map_key_ranges(regions: &mut [super::Region]) {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, region) in regions.iter().enumerate() {
        if let Some(group) = &region.trigger.auto_map_key_range_group {
            groups.entry(group.clone()).or_default().push(index);
        }
    }

    for indices in groups.values_mut() {
        indices.sort_by_key(|&i| regions[i].root_key);
        let roots: Vec<u8> = indices.iter().map(|&i| regions[i].root_key).collect();
        for (pos, &index) in indices.iter().enumerate() {
            let start = if pos == 0 {
                0
            } else {
                regions[indices[pos - 1]].trigger.key_range.end
            };
            let end = if pos + 1 < roots.len() {
                let root = roots[pos] as u32;
                let next = roots[pos + 1] as u32;
                (root + (next - root) / 2 + 1) as u8
            } else {
                128
            };
            regions[index].trigger.key_range = super::KeyRange { start, end };
        }
    }
}

/// Maps the half-open MIDI velocity range `(low, high]` onto `[0, 1000]` with
/// uniform bucketing; adjacent MIDI ranges share endpoints exactly.
pub fn map_midi_velocity_range(low: u8, high: u8) -> (u16, u16) {
    let scale = |v: u8| -> u16 {
        ((v as f64 * 999.0 / 126.0).round() as u32).min(1000) as u16
    };
    (scale(low.saturating_sub(1)), scale(high))
}

/// Rejects any three regions that mutually overlap on the feathered-velocity
/// criteria or on the timbre-layer criteria. Axis-aligned boxes have the Helly
/// property, so pairwise overlap of a triple implies a common point.
fn check_overlaps(
    library_path: &std::path::Path,
    instrument_name: &str,
    regions: &[super::Region],
) -> Result<(), CatalogError> {
    let feathered: Vec<&super::Region> = regions
        .iter()
        .filter(|r| r.trigger.feather_overlapping_velocity_layers)
        .collect();
    check_triple_overlap(library_path, instrument_name, &feathered, "feathered", |a, b| {
        same_cycle(a, b)
            && a.trigger.key_range.overlaps(&b.trigger.key_range)
            && a.trigger.velocity_range.overlaps(&b.trigger.velocity_range)
    })?;

    let timbre: Vec<&super::Region> = regions
        .iter()
        .filter(|r| r.timbre_layering.layer_range.is_some())
        .collect();
    check_triple_overlap(library_path, instrument_name, &timbre, "timbre", |a, b| {
        let (Some((a_lo, a_hi)), Some((b_lo, b_hi))) =
            (a.timbre_layering.layer_range, b.timbre_layering.layer_range)
        else {
            return false;
        };
        same_cycle(a, b)
            && a.trigger.key_range.overlaps(&b.trigger.key_range)
            && a.trigger.velocity_range.overlaps(&b.trigger.velocity_range)
            && a_lo < b_hi
            && b_lo < a_hi
    })
}

fn same_cycle(a: &super::Region, b: &super::Region) -> bool {
    a.trigger.event == b.trigger.event
        && a.trigger.round_robin_index == b.trigger.round_robin_index
        && a.trigger.round_robin_group_index == b.trigger.round_robin_group_index
}

fn check_triple_overlap(
    library_path: &std::path::Path,
    instrument_name: &str,
    regions: &[&super::Region],
    what: &str,
    overlaps: impl Fn(&super::Region, &super::Region) -> bool,
) -> Result<(), CatalogError> {
    for i in 0..regions.len() {
        for j in i + 1..regions.len() {
            if !overlaps(regions[i], regions[j]) {
                continue;
            }
            for k in j + 1..regions.len() {
                if overlaps(regions[i], regions[k]) && overlaps(regions[j], regions[k]) {
                    let describe = |r: &super::Region| {
                        format!(
                            "{} (keys {}..{}, velocities {}..{})",
                            r.path,
                            r.trigger.key_range.start,
                            r.trigger.key_range.end,
                            r.trigger.velocity_range.start,
                            r.trigger.velocity_range.end
                        )
                    };
                    return Err(CatalogError::ResourceLimit(format!(
                        "{}: instrument '{}': more than 2 {} regions overlap: {}; {}; {}",
                        library_path.display(),
                        instrument_name,
                        what,
                        describe(regions[i]),
                        describe(regions[j]),
                        describe(regions[k]),
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use crate::error::CatalogError;
    use crate::folders::FolderTree;
    use crate::library::{
        BuiltinLoop, Instrument, KeyRange, Library, LibraryFormat, LoopMode, LoopRequirement,
        Region, RegionAudioProps, RegionLoop, RegionPlayback, RegionTrigger, TimbreLayering,
        TriggerEvent, VelocityRange,
    };

    use super::*;

    fn region(path: &str, root_key: u8) -> Region {
        Region {
            path: path.to_string(),
            root_key,
            trigger: RegionTrigger {
                event: TriggerEvent::NoteOn,
                key_range: KeyRange::FULL,
                velocity_range: VelocityRange::FULL,
                round_robin_index: None,
                round_robin_group: None,
                round_robin_group_index: None,
                feather_overlapping_velocity_layers: false,
                auto_map_key_range_group: None,
            },
            loop_: RegionLoop::default(),
            audio_props: RegionAudioProps::default(),
            playback: RegionPlayback::default(),
            timbre_layering: TimbreLayering::default(),
        }
    }

    fn instrument(name: &str, regions: Vec<Region>) -> Instrument {
        Instrument {
            name: name.to_string(),
            folder: None,
            folder_path: None,
            description: None,
            tags: Default::default(),
            waveform_audio_path: None,
            regions,
            loop_overview: Default::default(),
            uses_timbre_layering: false,
            round_robin_groups: BTreeMap::new(),
        }
    }

    fn library(instruments: Vec<Instrument>) -> Library {
        let mut map = BTreeMap::new();
        for instrument in instruments {
            map.insert(instrument.name.clone(), instrument);
        }
        Library {
            name: "Lib".to_string(),
            author: "Author".to_string(),
            id: String::new(),
            tagline: None,
            description: None,
            url: None,
            minor_version: 1,
            background_image_path: None,
            icon_image_path: None,
            required_floe_version: None,
            instruments: map,
            irs: BTreeMap::new(),
            instrument_folders: FolderTree::new(""),
            ir_folders: FolderTree::new(""),
            sorted_instruments: Vec::new(),
            sorted_irs: Vec::new(),
            files_requiring_attribution: BTreeMap::new(),
            num_audio_samples: 0,
            num_regions: 0,
            path: PathBuf::from("/tmp/lib"),
            content_hash: 0,
            format: LibraryFormat::Lua,
        }
    }

    #[test]
    fn test_velocity_mapping() {
        assert_eq!((0, 1000), map_midi_velocity_range(1, 127));
        assert_eq!((500, 1000), map_midi_velocity_range(64, 127));
        assert_eq!((0, 79), map_midi_velocity_range(1, 10));
        assert_eq!((79, 159), map_midi_velocity_range(11, 20));
        assert_eq!((951, 1000), map_midi_velocity_range(121, 127));
    }

    #[test]
    fn test_velocity_mapping_adjacent_ranges_share_endpoints() {
        let mut previous_end = 0;
        for low in (1..=121).step_by(10) {
            let high = (low + 9).min(127);
            let (start, end) = map_midi_velocity_range(low, high);
            assert_eq!(previous_end, start, "range ({}, {}]", low, high);
            previous_end = end;
        }
    }

    #[test]
    fn test_auto_map_two_roots() {
        let mut regions = vec![region("a.wav", 10), region("b.wav", 30)];
        for r in regions.iter_mut() {
            r.trigger.auto_map_key_range_group = Some("g".to_string());
        }
        auto_map_key_ranges(&mut regions);
        assert_eq!(KeyRange { start: 0, end: 21 }, regions[0].trigger.key_range);
        assert_eq!(
            KeyRange {
                start: 21,
                end: 128
            },
            regions[1].trigger.key_range
        );
    }

    #[test]
    fn test_auto_map_single_root() {
        let mut regions = vec![region("a.wav", 60)];
        regions[0].trigger.auto_map_key_range_group = Some("g".to_string());
        auto_map_key_ranges(&mut regions);
        assert_eq!(KeyRange::FULL, regions[0].trigger.key_range);
    }

    #[test]
    fn test_auto_map_partitions_without_gaps() {
        let roots = [3u8, 17, 42, 60, 88, 120];
        let mut regions: Vec<Region> = roots
            .iter()
            .map(|&root| {
                let mut r = region("x.wav", root);
                r.trigger.auto_map_key_range_group = Some("g".to_string());
                r
            })
            .collect();
        auto_map_key_ranges(&mut regions);

        regions.sort_by_key(|r| r.trigger.key_range.start);
        assert_eq!(0, regions[0].trigger.key_range.start);
        assert_eq!(128, regions.last().unwrap().trigger.key_range.end);
        for pair in regions.windows(2) {
            assert_eq!(pair[0].trigger.key_range.end, pair[1].trigger.key_range.start);
        }
    }

    #[test]
    fn test_loop_overview() {
        let builtin = BuiltinLoop {
            start_frame: 100,
            end_frame: 900,
            crossfade_frames: 10,
            mode: LoopMode::Standard,
            lock_loop_points: false,
            lock_mode: false,
        };

        let mut looped = region("a.wav", 60);
        looped.loop_.builtin = Some(builtin);
        let plain = region("b.wav", 62);

        let overview = loop_overview(&[looped.clone(), plain.clone()]);
        assert!(overview.has_loops);
        assert!(overview.has_non_loops);
        assert_eq!(Some(LoopMode::Standard), overview.all_loops_mode);
        assert!(overview.all_loops_convertible_to_mode[LoopMode::PingPong.index()]);
        assert!(overview.user_defined_loops_allowed);
        assert!(!overview.all_regions_require_looping);

        // A mode-locked loop is not convertible to the other mode.
        let mut locked = looped.clone();
        locked.loop_.builtin.as_mut().unwrap().lock_mode = true;
        let overview = loop_overview(&[locked]);
        assert!(!overview.all_loops_convertible_to_mode[LoopMode::PingPong.index()]);
        assert!(overview.all_loops_convertible_to_mode[LoopMode::Standard.index()]);

        // All regions locked-loop-points forbids user loops.
        let mut all_locked = looped.clone();
        all_locked.loop_.builtin.as_mut().unwrap().lock_loop_points = true;
        let overview = loop_overview(&[all_locked]);
        assert!(!overview.user_defined_loops_allowed);

        // All never-loop forbids user loops too.
        let mut never = plain.clone();
        never.loop_.requirement = LoopRequirement::NeverLoop;
        let overview = loop_overview(&[never]);
        assert!(!overview.user_defined_loops_allowed);

        // All always-loop sets the legacy flag.
        let mut always = plain;
        always.loop_.requirement = LoopRequirement::AlwaysLoop;
        let overview = loop_overview(&[always]);
        assert!(overview.all_regions_require_looping);
    }

    #[test]
    fn test_round_robin_groups() -> Result<(), CatalogError> {
        let mut regions = Vec::new();
        for (group, rr) in [("main", 0), ("main", 1), ("alt", 0), ("main", 2)] {
            let mut r = region("x.wav", 60);
            r.trigger.round_robin_index = Some(rr);
            r.trigger.round_robin_group = Some(group.to_string());
            regions.push(r);
        }
        let groups = assign_round_robin_groups("inst", &mut regions)?;
        let note_on = &groups[&TriggerEvent::NoteOn];
        assert_eq!(2, note_on.len());
        assert_eq!(Some("main".to_string()), note_on[0].name);
        assert_eq!(2, note_on[0].max_rr_pos);
        assert_eq!(Some("alt".to_string()), note_on[1].name);
        assert_eq!(0, note_on[1].max_rr_pos);
        assert_eq!(Some(0), regions[0].trigger.round_robin_group_index);
        assert_eq!(Some(1), regions[2].trigger.round_robin_group_index);
        Ok(())
    }

    #[test]
    fn test_round_robin_group_cap() {
        let mut regions = Vec::new();
        for i in 0..=MAX_ROUND_ROBIN_GROUPS {
            let mut r = region("x.wav", 60);
            r.trigger.round_robin_index = Some(0);
            r.trigger.round_robin_group = Some(format!("group-{}", i));
            regions.push(r);
        }
        let result = assign_round_robin_groups("inst", &mut regions);
        assert!(matches!(result, Err(CatalogError::ResourceLimit(_))));
    }

    #[test]
    fn test_three_feathered_overlaps_rejected() {
        let mut regions = Vec::new();
        for path in ["a.wav", "b.wav", "c.wav"] {
            let mut r = region(path, 60);
            r.trigger.feather_overlapping_velocity_layers = true;
            r.trigger.velocity_range = VelocityRange { start: 0, end: 60 };
            regions.push(r);
        }
        let mut lib = library(vec![instrument("inst", regions)]);
        let result = post_read_bookkeeping(&mut lib);
        assert!(matches!(result, Err(CatalogError::ResourceLimit(_))));
    }

    #[test]
    fn test_two_feathered_overlaps_allowed() -> Result<(), CatalogError> {
        let mut a = region("a.wav", 60);
        a.trigger.feather_overlapping_velocity_layers = true;
        a.trigger.velocity_range = VelocityRange { start: 0, end: 60 };
        let mut b = region("b.wav", 60);
        b.trigger.feather_overlapping_velocity_layers = true;
        b.trigger.velocity_range = VelocityRange {
            start: 40,
            end: 101,
        };
        let mut lib = library(vec![instrument("inst", vec![a, b])]);
        post_read_bookkeeping(&mut lib)
    }

    #[test]
    fn test_three_timbre_overlaps_rejected() {
        let mut regions = Vec::new();
        for path in ["a.wav", "b.wav", "c.wav"] {
            let mut r = region(path, 60);
            r.timbre_layering.layer_range = Some((0, 80));
            regions.push(r);
        }
        let mut lib = library(vec![instrument("inst", regions)]);
        let result = post_read_bookkeeping(&mut lib);
        assert!(matches!(result, Err(CatalogError::ResourceLimit(_))));
    }

    #[test]
    fn test_bookkeeping_idempotent() -> Result<(), CatalogError> {
        let mut inst = instrument("Keys", vec![region("a.wav", 10), region("b.wav", 30)]);
        for r in inst.regions.iter_mut() {
            r.trigger.auto_map_key_range_group = Some("g".to_string());
        }
        inst.folder_path = Some("Pianos/Upright".to_string());

        let mut lib = library(vec![inst]);
        post_read_bookkeeping(&mut lib)?;
        let id = lib.id.clone();
        let sorted = lib.sorted_instruments.clone();
        let regions_once: Vec<_> = lib.instruments["Keys"].regions.clone();
        let tree_size = lib.instrument_folders.len();

        post_read_bookkeeping(&mut lib)?;
        assert_eq!(id, lib.id);
        assert_eq!(sorted, lib.sorted_instruments);
        assert_eq!(regions_once, lib.instruments["Keys"].regions);
        assert_eq!(tree_size, lib.instrument_folders.len());
        Ok(())
    }

    #[test]
    fn test_sorted_spans_depth_first() -> Result<(), CatalogError> {
        let mut zeta = instrument("Zeta", vec![]);
        zeta.folder_path = None;
        let mut alpha = instrument("Alpha", vec![]);
        alpha.folder_path = Some("Sub".to_string());
        let mut beta = instrument("Beta", vec![]);
        beta.folder_path = None;

        let mut lib = library(vec![zeta, alpha, beta]);
        post_read_bookkeeping(&mut lib)?;
        // Root items alphabetically, then folder contents.
        assert_eq!(vec!["Beta", "Zeta", "Alpha"], lib.sorted_instruments);
        Ok(())
    }

    #[test]
    fn test_folder_depth_rejected() {
        let mut inst = instrument("deep", vec![]);
        inst.folder_path = Some("a/b/c/d/e".to_string());
        let mut lib = library(vec![inst]);
        assert!(matches!(
            post_read_bookkeeping(&mut lib),
            Err(CatalogError::InvalidInput { .. })
        ));
    }
}
