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

//! The sandboxed Lua manifest loader.
//!
//! A manifest describes its library by calling a fixed set of host callbacks.
//! The scripting state is capped in memory and wall-clock time, gets only the
//! base/table/string/math/utf8 libraries, and can read files solely through a
//! rebound `dofile` that refuses any path leaving the library folder.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{
    AnyUserData, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, UserData, Value,
    VmState,
};
use tracing::debug;

use crate::error::{CatalogError, ScriptErrorKind};
use crate::folders::FolderTree;
use crate::library::schema::{self, FieldKind, FieldSchema, TableSchema};
use crate::library::{
    bookkeeping, BuiltinLoop, FileAttribution, ImpulseResponse, Instrument, KeyRange,
    KeytrackRequirement, Library, LibraryFormat, LoopMode, LoopRequirement, Region,
    RegionAudioProps, RegionLoop, RegionPlayback, RegionTrigger, TimbreLayering, TriggerEvent,
    VelocityRange, MAX_NAME_BYTES,
};
use crate::util::path_is_contained;

/// The manifest file every Lua library must carry at its root.
pub const MANIFEST_FILENAME: &str = "floe.lua";

/// Hard caps applied to a manifest script.
#[derive(Debug, Clone, Copy)]
pub struct SandboxOptions {
    /// Total bytes the scripting state may allocate.
    pub max_memory: usize,
    /// Wall-clock budget, checked every 50 instructions.
    pub max_seconds: f64,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        SandboxOptions {
            max_memory: 128 * 1024 * 1024,
            max_seconds: 20.0,
        }
    }
}

/// Reads a Lua library rooted at `root` (which must contain `floe.lua`).
pub fn read_lua(root: &Path, options: &SandboxOptions) -> Result<Library, CatalogError> {
    let manifest = root.join(MANIFEST_FILENAME);
    let code = fs::read_to_string(&manifest).map_err(|e| CatalogError::io(&manifest, e))?;

    let timed_out = Arc::new(AtomicBool::new(false));
    let state = Rc::new(RefCell::new(BuilderState {
        root: root.to_path_buf(),
        manifest: manifest.clone(),
        library: None,
        instruments: Vec::new(),
        attributions: BTreeMap::new(),
        required_floe_version: None,
    }));

    run_script(&code, &manifest, options, &timed_out, &state)
        .map_err(|e| map_script_error(e, timed_out.load(Ordering::Relaxed), &manifest))?;

    let state = Rc::try_unwrap(state)
        .map_err(|_| CatalogError::Script {
            kind: ScriptErrorKind::Unexpected,
            path: manifest.clone(),
            message: "builder state still referenced after script completion".to_string(),
        })?
        .into_inner();

    build_library(state, root)
}

struct PartialLibrary {
    name: String,
    author: String,
    tagline: Option<String>,
    description: Option<String>,
    url: Option<String>,
    minor_version: u32,
    background_image_path: Option<String>,
    icon_image_path: Option<String>,
    irs: BTreeMap<String, ImpulseResponse>,
}

struct BuilderState {
    root: PathBuf,
    manifest: PathBuf,
    library: Option<PartialLibrary>,
    instruments: Vec<Instrument>,
    attributions: BTreeMap<String, FileAttribution>,
    required_floe_version: Option<String>,
}

/// Handle returned by `new_library`; the script must return it.
#[derive(Clone, Copy)]
struct LibraryHandle;
impl UserData for LibraryHandle {}

/// Handle returned by `new_instrument`; indexes the builder's instrument list.
#[derive(Clone, Copy)]
struct InstrumentHandle(usize);
impl UserData for InstrumentHandle {}

fn run_script(
    code: &str,
    manifest: &Path,
    options: &SandboxOptions,
    timed_out: &Arc<AtomicBool>,
    state: &Rc<RefCell<BuilderState>>,
) -> mlua::Result<()> {
    // os, io, package and debug are simply never loaded.
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
        LuaOptions::default(),
    )?;
    lua.set_memory_limit(options.max_memory)?;

    {
        let timed_out = Arc::clone(timed_out);
        let start = Instant::now();
        let budget = Duration::from_secs_f64(options.max_seconds);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(50),
            move |_lua, _debug| {
                if start.elapsed() > budget {
                    timed_out.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::RuntimeError(
                        "script exceeded its time budget".to_string(),
                    ));
                }
                Ok(VmState::Continue)
            },
        );
    }

    register_callbacks(&lua, state)?;

    let value = lua
        .load(code)
        .set_name(format!("@{}", manifest.display()))
        .eval::<Value>()?;

    // The script must hand back the library it created.
    let returned_library = matches!(&value, Value::UserData(ud) if ud.is::<LibraryHandle>());
    if !returned_library {
        return Err(runtime_error(
            manifest,
            "the script must return the library created with new_library",
        ));
    }
    if state.borrow().library.is_none() {
        return Err(runtime_error(manifest, "no library was created"));
    }
    Ok(())
}

fn register_callbacks(lua: &Lua, state: &Rc<RefCell<BuilderState>>) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("loadfile", Value::Nil)?;

    {
        let state = Rc::clone(state);
        globals.set(
            "new_library",
            lua.create_function(move |_lua, config: Table| new_library(&state, &config))?,
        )?;
    }
    {
        let state = Rc::clone(state);
        globals.set(
            "new_instrument",
            lua.create_function(move |_lua, (library, config): (AnyUserData, Table)| {
                new_instrument(&state, &library, &config)
            })?,
        )?;
    }
    {
        let state = Rc::clone(state);
        globals.set(
            "add_region",
            lua.create_function(move |_lua, (instrument, config): (AnyUserData, Table)| {
                add_region(&state, &instrument, &config)
            })?,
        )?;
    }
    {
        let state = Rc::clone(state);
        globals.set(
            "add_ir",
            lua.create_function(move |_lua, (library, config): (AnyUserData, Table)| {
                add_ir(&state, &library, &config)
            })?,
        )?;
    }
    {
        let state = Rc::clone(state);
        globals.set(
            "set_attribution_requirement",
            lua.create_function(move |_lua, (path, config): (String, Table)| {
                set_attribution_requirement(&state, path, &config)
            })?,
        )?;
    }
    {
        let state = Rc::clone(state);
        globals.set(
            "set_required_floe_version",
            lua.create_function(move |_lua, version: String| {
                state.borrow_mut().required_floe_version = Some(version);
                Ok(())
            })?,
        )?;
    }
    globals.set(
        "extend_table",
        lua.create_function(|lua, (base, t): (Table, Table)| extend_table(lua, &base, &t))?,
    )?;
    {
        let state = Rc::clone(state);
        globals.set(
            "dofile",
            lua.create_function(move |lua, path: String| {
                let (root, manifest) = {
                    let state = state.borrow();
                    (state.root.clone(), state.manifest.clone())
                };
                dofile(lua, &root, &manifest, &path)
            })?,
        )?;
    }
    Ok(())
}

/// `dofile` allows only relative, contained paths and executes the file in the
/// same sandboxed state.
fn dofile(lua: &Lua, root: &Path, manifest: &Path, path: &str) -> mlua::Result<MultiValue> {
    if !path_is_contained(path) {
        return Err(runtime_error(
            manifest,
            format!("dofile path escapes the library folder: {}", path),
        ));
    }
    let full = root.join(path);
    let code = fs::read_to_string(&full)
        .map_err(|e| runtime_error(manifest, format!("dofile({}): {}", path, e)))?;
    debug!(path = %full.display(), "Manifest ran dofile.");
    lua.load(&code)
        .set_name(format!("@{}", full.display()))
        .eval::<MultiValue>()
}

/// Deep-merges `base` into `t`: keys absent from `t` are deep-copied from
/// `base`; tables present in both are merged recursively. Returns `t`.
fn extend_table(lua: &Lua, base: &Table, t: &Table) -> mlua::Result<Table> {
    for pair in base.pairs::<Value, Value>() {
        let (key, base_value) = pair?;
        let existing: Value = t.get(key.clone())?;
        match (&existing, &base_value) {
            (Value::Nil, _) => {
                t.set(key, deep_copy(lua, base_value)?)?;
            }
            (Value::Table(dst), Value::Table(src)) => {
                extend_table(lua, src, dst)?;
            }
            _ => {}
        }
    }
    Ok(t.clone())
}

fn deep_copy(lua: &Lua, value: Value) -> mlua::Result<Value> {
    match value {
        Value::Table(table) => {
            let copy = lua.create_table()?;
            for pair in table.pairs::<Value, Value>() {
                let (key, value) = pair?;
                copy.set(key, deep_copy(lua, value)?)?;
            }
            Ok(Value::Table(copy))
        }
        other => Ok(other),
    }
}

fn new_library(state: &Rc<RefCell<BuilderState>>, config: &Table) -> mlua::Result<LibraryHandle> {
    let mut state = state.borrow_mut();
    let manifest = state.manifest.clone();
    if state.library.is_some() {
        return Err(runtime_error(&manifest, "only one library may be created"));
    }
    validate_table(config, &schema::LIBRARY, &manifest)?;

    for field in ["background_image_path", "icon_image_path"] {
        check_contained_path(config, field, &manifest)?;
    }

    state.library = Some(PartialLibrary {
        name: config.get("name")?,
        author: config.get("author")?,
        tagline: config.get("tagline")?,
        description: config.get("description")?,
        url: config.get("url")?,
        minor_version: config.get::<Option<u32>>("minor_version")?.unwrap_or(1),
        background_image_path: config.get("background_image_path")?,
        icon_image_path: config.get("icon_image_path")?,
        irs: BTreeMap::new(),
    });
    Ok(LibraryHandle)
}

fn new_instrument(
    state: &Rc<RefCell<BuilderState>>,
    library: &AnyUserData,
    config: &Table,
) -> mlua::Result<InstrumentHandle> {
    let mut state = state.borrow_mut();
    let manifest = state.manifest.clone();
    expect_library_handle(library, &manifest)?;
    validate_table(config, &schema::INSTRUMENT, &manifest)?;
    check_contained_path(config, "waveform_audio_path", &manifest)?;

    let name: String = config.get("name")?;
    if state.instruments.iter().any(|i| i.name == name) {
        return Err(runtime_error(
            &manifest,
            format!("duplicate instrument name: {}", name),
        ));
    }

    let tags: Option<Vec<String>> = config.get("tags")?;
    state.instruments.push(Instrument {
        name,
        folder: None,
        folder_path: config.get("folder")?,
        description: config.get("description")?,
        tags: tags.unwrap_or_default().into_iter().collect(),
        waveform_audio_path: config.get("waveform_audio_path")?,
        regions: Vec::new(),
        loop_overview: Default::default(),
        uses_timbre_layering: false,
        round_robin_groups: BTreeMap::new(),
    });
    Ok(InstrumentHandle(state.instruments.len() - 1))
}

fn add_region(
    state: &Rc<RefCell<BuilderState>>,
    instrument: &AnyUserData,
    config: &Table,
) -> mlua::Result<()> {
    let mut state = state.borrow_mut();
    let manifest = state.manifest.clone();
    let index = instrument
        .borrow::<InstrumentHandle>()
        .map_err(|_| runtime_error(&manifest, "add_region expects an instrument handle"))?
        .0;
    validate_table(config, &schema::REGION, &manifest)?;
    check_contained_path(config, "path", &manifest)?;

    let trigger = parse_trigger(config, &manifest)?;
    let loop_ = parse_loop(config)?;
    let audio_props = parse_audio_properties(config)?;
    let playback = parse_playback(config)?;
    let timbre_layering = parse_timbre_layering(config)?;

    let region = Region {
        path: config.get("path")?,
        root_key: config.get("root_key")?,
        trigger,
        loop_,
        audio_props,
        playback,
        timbre_layering,
    };
    state.instruments[index].regions.push(region);
    Ok(())
}

fn parse_trigger(config: &Table, manifest: &Path) -> mlua::Result<RegionTrigger> {
    let criteria: Option<Table> = config.get("trigger_criteria")?;
    let mut trigger = RegionTrigger {
        event: TriggerEvent::NoteOn,
        key_range: KeyRange::FULL,
        velocity_range: VelocityRange::FULL,
        round_robin_index: None,
        round_robin_group: None,
        round_robin_group_index: None,
        feather_overlapping_velocity_layers: false,
        auto_map_key_range_group: None,
    };
    let Some(criteria) = criteria else {
        return Ok(trigger);
    };

    if let Some(event) = criteria.get::<Option<String>>("trigger_event")? {
        trigger.event = match event.as_str() {
            "note-on" => TriggerEvent::NoteOn,
            "note-off" => TriggerEvent::NoteOff,
            other => {
                return Err(runtime_error(
                    manifest,
                    format!("invalid option '{}' for trigger_event", other),
                ))
            }
        };
    }
    if let Some(range) = criteria.get::<Option<Vec<u8>>>("key_range")? {
        trigger.key_range = KeyRange {
            start: range[0],
            end: range[1],
        };
    }
    if let Some(range) = criteria.get::<Option<Vec<u8>>>("velocity_range")? {
        trigger.velocity_range = VelocityRange {
            start: range[0],
            end: range[1],
        };
    }
    trigger.round_robin_index = criteria.get("round_robin_index")?;
    trigger.round_robin_group = criteria.get("round_robin_sequencing_group")?;
    trigger.feather_overlapping_velocity_layers = criteria
        .get::<Option<bool>>("feather_overlapping_velocity_layers")?
        .unwrap_or(false);
    trigger.auto_map_key_range_group = criteria.get("auto_map_key_range_group")?;
    Ok(trigger)
}

fn parse_loop(config: &Table) -> mlua::Result<RegionLoop> {
    let mut parsed = RegionLoop::default();
    let Some(loop_table) = config.get::<Option<Table>>("loop")? else {
        return Ok(parsed);
    };

    if let Some(builtin) = loop_table.get::<Option<Table>>("builtin_loop")? {
        parsed.builtin = Some(BuiltinLoop {
            start_frame: builtin.get("start_frame")?,
            end_frame: builtin.get("end_frame")?,
            crossfade_frames: builtin.get::<Option<u32>>("crossfade")?.unwrap_or(0),
            mode: match builtin.get::<Option<String>>("mode")?.as_deref() {
                Some("ping-pong") => LoopMode::PingPong,
                _ => LoopMode::Standard,
            },
            lock_loop_points: builtin
                .get::<Option<bool>>("lock_loop_points")?
                .unwrap_or(false),
            lock_mode: builtin.get::<Option<bool>>("lock_mode")?.unwrap_or(false),
        });
    }
    parsed.requirement = match loop_table
        .get::<Option<String>>("loop_requirement")?
        .as_deref()
    {
        Some("always-loop") => LoopRequirement::AlwaysLoop,
        Some("never-loop") => LoopRequirement::NeverLoop,
        _ => LoopRequirement::Default,
    };
    Ok(parsed)
}

fn parse_audio_properties(config: &Table) -> mlua::Result<RegionAudioProps> {
    let mut props = RegionAudioProps::default();
    let Some(table) = config.get::<Option<Table>>("audio_properties")? else {
        return Ok(props);
    };
    props.gain_db = table.get::<Option<f32>>("gain_db")?.unwrap_or(0.0);
    props.tune_cents = table.get::<Option<f32>>("tune_cents")?.unwrap_or(0.0);
    props.start_offset_frames = table
        .get::<Option<u32>>("start_offset_frames")?
        .unwrap_or(0);
    props.fade_in_frames = table.get::<Option<u32>>("fade_in_frames")?.unwrap_or(0);
    Ok(props)
}

fn parse_playback(config: &Table) -> mlua::Result<RegionPlayback> {
    let mut playback = RegionPlayback::default();
    let Some(table) = config.get::<Option<Table>>("playback")? else {
        return Ok(playback);
    };
    playback.keytrack_requirement = match table
        .get::<Option<String>>("keytrack_requirement")?
        .as_deref()
    {
        Some("always") => KeytrackRequirement::Always,
        Some("never") => KeytrackRequirement::Never,
        _ => KeytrackRequirement::Default,
    };
    Ok(playback)
}

fn parse_timbre_layering(config: &Table) -> mlua::Result<TimbreLayering> {
    let mut layering = TimbreLayering::default();
    let Some(table) = config.get::<Option<Table>>("timbre_layering")? else {
        return Ok(layering);
    };
    if let Some(range) = table.get::<Option<Vec<u8>>>("layer_range")? {
        layering.layer_range = Some((range[0], range[1]));
    }
    Ok(layering)
}

fn add_ir(
    state: &Rc<RefCell<BuilderState>>,
    library: &AnyUserData,
    config: &Table,
) -> mlua::Result<()> {
    let mut state = state.borrow_mut();
    let manifest = state.manifest.clone();
    expect_library_handle(library, &manifest)?;
    validate_table(config, &schema::IR, &manifest)?;
    check_contained_path(config, "path", &manifest)?;

    let name: String = config.get("name")?;
    let tags: Option<Vec<String>> = config.get("tags")?;
    let ir = ImpulseResponse {
        name: name.clone(),
        path: config.get("path")?,
        folder: None,
        folder_path: config.get("folder")?,
        tags: tags.unwrap_or_default().into_iter().collect(),
        description: config.get("description")?,
        gain_db: config.get::<Option<f32>>("gain_db")?.unwrap_or(0.0),
    };

    let library = state
        .library
        .as_mut()
        .ok_or_else(|| runtime_error(&manifest, "add_ir called before new_library"))?;
    if library.irs.insert(name.clone(), ir).is_some() {
        return Err(runtime_error(
            &manifest,
            format!("duplicate impulse response name: {}", name),
        ));
    }
    Ok(())
}

fn set_attribution_requirement(
    state: &Rc<RefCell<BuilderState>>,
    path: String,
    config: &Table,
) -> mlua::Result<()> {
    let mut state = state.borrow_mut();
    let manifest = state.manifest.clone();
    if !path_is_contained(&path) {
        return Err(runtime_error(
            &manifest,
            format!("attribution path escapes the library folder: {}", path),
        ));
    }
    validate_table(config, &schema::ATTRIBUTION, &manifest)?;
    state.attributions.insert(
        path,
        FileAttribution {
            title: config.get("title")?,
            license_name: config.get("license_name")?,
            license_url: config.get("license_url")?,
            attributed_to: config.get("attributed_to")?,
            attribution_url: config.get("attribution_url")?,
        },
    );
    Ok(())
}

fn expect_library_handle(value: &AnyUserData, manifest: &Path) -> mlua::Result<()> {
    if value.is::<LibraryHandle>() {
        Ok(())
    } else {
        Err(runtime_error(manifest, "expected the library handle"))
    }
}

/// Rejects a manifest-supplied path field that is absolute or escapes the
/// library folder.
fn check_contained_path(config: &Table, field: &str, manifest: &Path) -> mlua::Result<()> {
    if let Some(path) = config.get::<Option<String>>(field)? {
        if !path_is_contained(&path) {
            return Err(runtime_error(
                manifest,
                format!("'{}' escapes the library folder: {}", field, path),
            ));
        }
    }
    Ok(())
}

/// Validates a callback table against its schema: required fields, scalar
/// kinds, numeric ranges, enum options, and sub-tables recursively.
fn validate_table(table: &Table, table_schema: &TableSchema, manifest: &Path) -> mlua::Result<()> {
    for field in table_schema.fields {
        let value: Value = table.get(field.name)?;
        if value.is_nil() {
            if field.required {
                return Err(runtime_error(
                    manifest,
                    format!(
                        "missing required field '{}.{}'",
                        table_schema.name, field.name
                    ),
                ));
            }
            continue;
        }
        validate_field(&value, field, table_schema, manifest)?;
    }
    Ok(())
}

fn validate_field(
    value: &Value,
    field: &FieldSchema,
    table_schema: &TableSchema,
    manifest: &Path,
) -> mlua::Result<()> {
    let mismatch = |expected: &str| {
        runtime_error(
            manifest,
            format!(
                "field '{}.{}' must be {}, got {}",
                table_schema.name,
                field.name,
                expected,
                value.type_name()
            ),
        )
    };

    match field.kind {
        FieldKind::String => {
            if !matches!(value, Value::String(_)) {
                return Err(mismatch("a string"));
            }
        }
        FieldKind::Boolean => {
            if !matches!(value, Value::Boolean(_)) {
                return Err(mismatch("a boolean"));
            }
        }
        FieldKind::Number | FieldKind::Integer => {
            let number = match value {
                Value::Integer(i) => *i as f64,
                Value::Number(n) => *n,
                _ => return Err(mismatch("a number")),
            };
            if field.kind == FieldKind::Integer && number.fract() != 0.0 {
                return Err(mismatch("an integer"));
            }
            check_range(number, field, table_schema, manifest)?;
        }
        FieldKind::StringArray => {
            let Value::Table(table) = value else {
                return Err(mismatch("an array of strings"));
            };
            for entry in table.sequence_values::<Value>() {
                if !matches!(entry?, Value::String(_)) {
                    return Err(mismatch("an array of strings"));
                }
            }
        }
        FieldKind::IntPair => {
            let Value::Table(table) = value else {
                return Err(mismatch("a {start, end} pair"));
            };
            let pair: Vec<Value> =
                table.sequence_values::<Value>().collect::<mlua::Result<_>>()?;
            if pair.len() != 2 {
                return Err(mismatch("a {start, end} pair"));
            }
            let mut numbers = [0.0f64; 2];
            for (slot, entry) in numbers.iter_mut().zip(&pair) {
                *slot = match entry {
                    Value::Integer(i) => *i as f64,
                    Value::Number(n) if n.fract() == 0.0 => *n,
                    _ => return Err(mismatch("a pair of integers")),
                };
                check_range(*slot, field, table_schema, manifest)?;
            }
            if numbers[0] >= numbers[1] {
                return Err(runtime_error(
                    manifest,
                    format!(
                        "field '{}.{}': start must be less than end",
                        table_schema.name, field.name
                    ),
                ));
            }
        }
        FieldKind::Enum(options) => {
            let Value::String(s) = value else {
                return Err(mismatch("a string option"));
            };
            let s = s.to_string_lossy();
            if !options.contains(&s.as_ref()) {
                return Err(runtime_error(
                    manifest,
                    format!(
                        "invalid option '{}' for field '{}.{}' (expected one of {})",
                        s,
                        table_schema.name,
                        field.name,
                        options.join(", ")
                    ),
                ));
            }
        }
        FieldKind::Sub(name) => {
            let Value::Table(table) = value else {
                return Err(mismatch("a table"));
            };
            let sub = schema::by_name(name).expect("sub-schema names are checked by tests");
            validate_table(table, sub, manifest)?;
        }
    }
    Ok(())
}

fn check_range(
    number: f64,
    field: &FieldSchema,
    table_schema: &TableSchema,
    manifest: &Path,
) -> mlua::Result<()> {
    if let Some((min, max)) = field.range {
        if number < min || number > max {
            return Err(runtime_error(
                manifest,
                format!(
                    "field '{}.{}' must be within {}..={}, got {}",
                    table_schema.name, field.name, min, max, number
                ),
            ));
        }
    }
    Ok(())
}

fn runtime_error(manifest: &Path, message: impl Into<String>) -> mlua::Error {
    mlua::Error::RuntimeError(format!("{}: {}", manifest.display(), message.into()))
}

/// Maps an mlua error to the script-error taxonomy, cloning the message out of
/// the scripting state.
fn map_script_error(error: mlua::Error, timed_out: bool, manifest: &Path) -> CatalogError {
    let kind = if timed_out {
        ScriptErrorKind::Timeout
    } else {
        classify(&error)
    };
    CatalogError::Script {
        kind,
        path: manifest.to_path_buf(),
        message: error.to_string(),
    }
}

fn classify(error: &mlua::Error) -> ScriptErrorKind {
    match error {
        mlua::Error::SyntaxError { .. } => ScriptErrorKind::Syntax,
        mlua::Error::MemoryError(_) => ScriptErrorKind::Memory,
        mlua::Error::RuntimeError(_) => ScriptErrorKind::Runtime,
        mlua::Error::CallbackError { cause, .. } => classify(cause),
        mlua::Error::FromLuaConversionError { .. } | mlua::Error::ToLuaConversionError { .. } => {
            ScriptErrorKind::Runtime
        }
        _ => ScriptErrorKind::Unexpected,
    }
}

fn build_library(state: BuilderState, root: &Path) -> Result<Library, CatalogError> {
    let manifest = state.manifest;
    let partial = state.library.ok_or_else(|| CatalogError::Script {
        kind: ScriptErrorKind::Runtime,
        path: manifest.clone(),
        message: "no library was created".to_string(),
    })?;

    if partial.name.len() > MAX_NAME_BYTES || partial.author.len() > MAX_NAME_BYTES {
        return Err(CatalogError::Integrity(format!(
            "{}: library name and author must be at most {} bytes",
            manifest.display(),
            MAX_NAME_BYTES
        )));
    }

    let mut library = Library {
        id: String::new(),
        name: partial.name,
        author: partial.author,
        tagline: partial.tagline,
        description: partial.description,
        url: partial.url,
        minor_version: partial.minor_version,
        background_image_path: partial.background_image_path,
        icon_image_path: partial.icon_image_path,
        required_floe_version: state.required_floe_version,
        instruments: BTreeMap::new(),
        irs: partial.irs,
        instrument_folders: FolderTree::new(""),
        ir_folders: FolderTree::new(""),
        sorted_instruments: Vec::new(),
        sorted_irs: Vec::new(),
        files_requiring_attribution: state.attributions,
        num_audio_samples: 0,
        num_regions: 0,
        path: root.to_path_buf(),
        content_hash: super::lua_hash(root)?,
        format: LibraryFormat::Lua,
    };
    for instrument in state.instruments {
        library
            .instruments
            .insert(instrument.name.clone(), instrument);
    }

    bookkeeping::post_read_bookkeeping(&mut library)?;
    Ok(library)
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::fs;

    use crate::error::{CatalogError, ScriptErrorKind};
    use crate::library::TriggerEvent;

    use super::*;

    fn write_library(code: &str) -> Result<tempfile::TempDir, Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(MANIFEST_FILENAME), code)?;
        Ok(dir)
    }

    fn script_kind(result: Result<Library, CatalogError>) -> ScriptErrorKind {
        match result {
            Err(CatalogError::Script { kind, .. }) => kind,
            Err(other) => panic!("expected a script error, got {}", other),
            Ok(_) => panic!("expected the script to fail"),
        }
    }

    const MINIMAL: &str = r#"
        local library = new_library({ name = "Test Lib", author = "Tester" })
        local inst = new_instrument(library, { name = "Keys", tags = {"piano"} })
        add_region(inst, { path = "Samples/a.wav", root_key = 60 })
        return library
    "#;

    #[test]
    fn test_minimal_library() -> Result<(), Box<dyn Error>> {
        let dir = write_library(MINIMAL)?;
        let library = read_lua(dir.path(), &SandboxOptions::default())?;
        assert_eq!("Test Lib", library.name);
        assert_eq!("Tester", library.author);
        assert_eq!("Test Lib - Tester", library.id);
        assert_eq!(1, library.instruments.len());
        let instrument = &library.instruments["Keys"];
        assert_eq!(1, instrument.regions.len());
        assert_eq!(TriggerEvent::NoteOn, instrument.regions[0].trigger.event);
        Ok(())
    }

    #[test]
    fn test_timeout() -> Result<(), Box<dyn Error>> {
        let dir = write_library("while 1 == 1 do end")?;
        let options = SandboxOptions {
            max_seconds: 0.005,
            ..Default::default()
        };
        assert_eq!(
            ScriptErrorKind::Timeout,
            script_kind(read_lua(dir.path(), &options))
        );
        Ok(())
    }

    #[test]
    fn test_memory_cap() -> Result<(), Box<dyn Error>> {
        // A script bigger than the whole memory budget can't even be loaded.
        let huge = format!("--{}\nreturn nil", "x".repeat(64 * 1024));
        let dir = write_library(&huge)?;
        let options = SandboxOptions {
            max_memory: 32 * 1024,
            ..Default::default()
        };
        assert_eq!(
            ScriptErrorKind::Memory,
            script_kind(read_lua(dir.path(), &options))
        );
        Ok(())
    }

    #[test]
    fn test_syntax_error() -> Result<(), Box<dyn Error>> {
        let dir = write_library("local x = = 2")?;
        assert_eq!(
            ScriptErrorKind::Syntax,
            script_kind(read_lua(dir.path(), &SandboxOptions::default()))
        );
        Ok(())
    }

    #[test]
    fn test_non_library_return_is_runtime_error() -> Result<(), Box<dyn Error>> {
        let dir = write_library("return 42")?;
        assert_eq!(
            ScriptErrorKind::Runtime,
            script_kind(read_lua(dir.path(), &SandboxOptions::default()))
        );
        Ok(())
    }

    #[test]
    fn test_os_and_io_absent() -> Result<(), Box<dyn Error>> {
        for global in ["os", "io", "package", "debug", "loadfile"] {
            let dir = write_library(&format!("return {}.x", global))?;
            assert_eq!(
                ScriptErrorKind::Runtime,
                script_kind(read_lua(dir.path(), &SandboxOptions::default())),
                "{} should not be available",
                global
            );
        }
        Ok(())
    }

    #[test]
    fn test_escaping_path_rejected() -> Result<(), Box<dyn Error>> {
        let code = r#"
            local library = new_library({ name = "L", author = "A" })
            local inst = new_instrument(library, { name = "I" })
            add_region(inst, { path = "../outside.wav", root_key = 60 })
            return library
        "#;
        let dir = write_library(code)?;
        assert_eq!(
            ScriptErrorKind::Runtime,
            script_kind(read_lua(dir.path(), &SandboxOptions::default()))
        );
        Ok(())
    }

    #[test]
    fn test_dofile_contained() -> Result<(), Box<dyn Error>> {
        let code = r#"
            local config = dofile("config.lua")
            local library = new_library(config)
            return library
        "#;
        let dir = write_library(code)?;
        fs::write(
            dir.path().join("config.lua"),
            r#"return { name = "Split Lib", author = "A" }"#,
        )?;
        let library = read_lua(dir.path(), &SandboxOptions::default())?;
        assert_eq!("Split Lib", library.name);

        let escaping = write_library(r#"dofile("/etc/passwd") return nil"#)?;
        assert_eq!(
            ScriptErrorKind::Runtime,
            script_kind(read_lua(escaping.path(), &SandboxOptions::default()))
        );
        Ok(())
    }

    #[test]
    fn test_second_library_rejected() -> Result<(), Box<dyn Error>> {
        let code = r#"
            local a = new_library({ name = "A", author = "X" })
            local b = new_library({ name = "B", author = "X" })
            return a
        "#;
        let dir = write_library(code)?;
        assert_eq!(
            ScriptErrorKind::Runtime,
            script_kind(read_lua(dir.path(), &SandboxOptions::default()))
        );
        Ok(())
    }

    #[test]
    fn test_extend_table() -> Result<(), Box<dyn Error>> {
        let code = r#"
            local base = { trigger_criteria = { key_range = {0, 64} } }
            local library = new_library({ name = "L", author = "A" })
            local inst = new_instrument(library, { name = "I" })
            local region = extend_table(base, { path = "Samples/a.wav", root_key = 10 })
            add_region(inst, region)
            -- The copy must be deep: mutating the result can't touch base.
            region.trigger_criteria.key_range[1] = 63
            local region2 = extend_table(base, { path = "Samples/b.wav", root_key = 70 })
            assert(region2.trigger_criteria.key_range[1] == 0)
            add_region(inst, region2)
            return library
        "#;
        let dir = write_library(code)?;
        let library = read_lua(dir.path(), &SandboxOptions::default())?;
        let regions = &library.instruments["I"].regions;
        assert_eq!(2, regions.len());
        assert_eq!(0, regions[1].trigger.key_range.start);
        assert_eq!(64, regions[1].trigger.key_range.end);
        Ok(())
    }

    #[test]
    fn test_schema_negative_cases() -> Result<(), Box<dyn Error>> {
        // Missing required field.
        let dir = write_library(r#"return new_library({ name = "OnlyName" })"#)?;
        assert_eq!(
            ScriptErrorKind::Runtime,
            script_kind(read_lua(dir.path(), &SandboxOptions::default()))
        );

        // Wrong kind.
        let dir = write_library(r#"return new_library({ name = 7, author = "A" })"#)?;
        assert_eq!(
            ScriptErrorKind::Runtime,
            script_kind(read_lua(dir.path(), &SandboxOptions::default()))
        );

        // Out-of-range value.
        let code = r#"
            local library = new_library({ name = "L", author = "A" })
            local inst = new_instrument(library, { name = "I" })
            add_region(inst, { path = "a.wav", root_key = 200 })
            return library
        "#;
        let dir = write_library(code)?;
        assert_eq!(
            ScriptErrorKind::Runtime,
            script_kind(read_lua(dir.path(), &SandboxOptions::default()))
        );

        // Bad enum option.
        let code = r#"
            local library = new_library({ name = "L", author = "A" })
            local inst = new_instrument(library, { name = "I" })
            add_region(inst, {
                path = "a.wav",
                root_key = 60,
                trigger_criteria = { trigger_event = "note-sideways" },
            })
            return library
        "#;
        let dir = write_library(code)?;
        assert_eq!(
            ScriptErrorKind::Runtime,
            script_kind(read_lua(dir.path(), &SandboxOptions::default()))
        );
        Ok(())
    }
}
