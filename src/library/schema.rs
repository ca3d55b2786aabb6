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

//! Declarative schemas for every table a manifest script can pass to a host
//! callback. One table drives the parser's validation, the documented example
//! manifest, the LSP definitions file and the negative tests, so they can
//! never drift apart.

/// The scalar (or sub-table) shape a field must have.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    /// An array of strings.
    StringArray,
    /// A two-element integer array, `{start, end}`.
    IntPair,
    /// A string restricted to the listed options.
    Enum(&'static [&'static str]),
    /// A nested table validated against the named schema.
    Sub(&'static str),
}

/// One field of a callback table.
#[derive(Debug, Clone, Copy)]
pub struct FieldSchema {
    pub name: &'static str,
    /// One sentence, used verbatim in generated documentation.
    pub description: &'static str,
    /// A literal Lua value used in the documented example manifest.
    pub example: &'static str,
    /// Default shown in documentation; `None` when the field is required.
    pub default: Option<&'static str>,
    pub kind: FieldKind,
    /// Inclusive numeric bounds, enforced at parse time.
    pub range: Option<(f64, f64)>,
    pub required: bool,
}

/// A named callback-table schema.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSchema],
}

pub const LOOP_MODES: &[&str] = &["standard", "ping-pong"];
pub const LOOP_REQUIREMENTS: &[&str] = &["default", "always-loop", "never-loop"];
pub const KEYTRACK_REQUIREMENTS: &[&str] = &["default", "always", "never"];
pub const TRIGGER_EVENTS: &[&str] = &["note-on", "note-off"];

pub const LIBRARY: TableSchema = TableSchema {
    name: "library",
    description: "The library itself: identity plus display metadata.",
    fields: &[
        FieldSchema {
            name: "name",
            description: "The name of the library, at most 64 bytes.",
            example: "\"Arctic Strings\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "author",
            description: "The name of the library author, at most 64 bytes.",
            example: "\"FrozenPlain\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "tagline",
            description: "A one-line description shown under the library name.",
            example: "\"Ethereal sustained strings\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "description",
            description: "A longer description of the library.",
            example: "\"A set of string ensembles recorded in an ice cave.\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "url",
            description: "The library's homepage.",
            example: "\"https://example.com/arctic-strings\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "minor_version",
            description: "Backwards-compatible revision number of this library.",
            example: "1",
            default: Some("1"),
            kind: FieldKind::Integer,
            range: Some((0.0, u32::MAX as f64)),
            required: false,
        },
        FieldSchema {
            name: "background_image_path",
            description: "Library-relative path of the background image.",
            example: "\"Images/background.jpg\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "icon_image_path",
            description: "Library-relative path of the icon image.",
            example: "\"Images/icon.png\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
    ],
};

pub const INSTRUMENT: TableSchema = TableSchema {
    name: "instrument",
    description: "A named set of regions; the unit shown in the instrument picker.",
    fields: &[
        FieldSchema {
            name: "name",
            description: "The name of the instrument, unique within the library.",
            example: "\"Cello Ensemble\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "folder",
            description: "Slash-separated picker folder, at most 4 levels deep.",
            example: "\"Strings/Ensembles\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "description",
            description: "A description of the instrument.",
            example: "\"Twelve cellos playing sustained notes.\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "tags",
            description: "Tags used for filtering in the instrument picker.",
            example: "{\"strings\", \"ensemble\", \"sustained\"}",
            default: Some("{}"),
            kind: FieldKind::StringArray,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "waveform_audio_path",
            description: "Library-relative audio file shown as the GUI waveform.",
            example: "\"Samples/cello-c3.flac\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
    ],
};

pub const REGION: TableSchema = TableSchema {
    name: "region",
    description: "A single audio file's mapping to key range, velocity range and loop.",
    fields: &[
        FieldSchema {
            name: "path",
            description: "Library-relative path of the audio file.",
            example: "\"Samples/cello-c3.flac\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "root_key",
            description: "MIDI note at which the file plays back unpitched.",
            example: "48",
            default: None,
            kind: FieldKind::Integer,
            range: Some((0.0, 127.0)),
            required: true,
        },
        FieldSchema {
            name: "trigger_criteria",
            description: "When this region triggers.",
            example: "{ key_range = {40, 60} }",
            default: Some("{}"),
            kind: FieldKind::Sub("trigger_criteria"),
            range: None,
            required: false,
        },
        FieldSchema {
            name: "loop",
            description: "Loop configuration.",
            example: "{ builtin_loop = { start_frame = 3000, end_frame = 9000, crossfade = 200, mode = \"standard\" } }",
            default: Some("{}"),
            kind: FieldKind::Sub("loop"),
            range: None,
            required: false,
        },
        FieldSchema {
            name: "audio_properties",
            description: "Gain, tuning and trimming applied before playback.",
            example: "{ gain_db = -3 }",
            default: Some("{}"),
            kind: FieldKind::Sub("audio_properties"),
            range: None,
            required: false,
        },
        FieldSchema {
            name: "playback",
            description: "Playback behaviour of the region.",
            example: "{ keytrack_requirement = \"default\" }",
            default: Some("{}"),
            kind: FieldKind::Sub("playback"),
            range: None,
            required: false,
        },
        FieldSchema {
            name: "timbre_layering",
            description: "Placement of the region on the timbre crossfade axis.",
            example: "{ layer_range = {0, 50} }",
            default: Some("{}"),
            kind: FieldKind::Sub("timbre_layering"),
            range: None,
            required: false,
        },
    ],
};

pub const TRIGGER_CRITERIA: TableSchema = TableSchema {
    name: "trigger_criteria",
    description: "Trigger criteria of a region.",
    fields: &[
        FieldSchema {
            name: "trigger_event",
            description: "The MIDI event that triggers this region.",
            example: "\"note-on\"",
            default: Some("\"note-on\""),
            kind: FieldKind::Enum(TRIGGER_EVENTS),
            range: None,
            required: false,
        },
        FieldSchema {
            name: "key_range",
            description: "Half-open MIDI key range, start inclusive, end exclusive.",
            example: "{40, 60}",
            default: Some("{0, 128}"),
            kind: FieldKind::IntPair,
            range: Some((0.0, 128.0)),
            required: false,
        },
        FieldSchema {
            name: "velocity_range",
            description: "Half-open velocity range over 0-100; an end of 101 covers everything.",
            example: "{0, 50}",
            default: Some("{0, 101}"),
            kind: FieldKind::IntPair,
            range: Some((0.0, 101.0)),
            required: false,
        },
        FieldSchema {
            name: "round_robin_index",
            description: "Position of this region in its round-robin cycle.",
            example: "0",
            default: Some("nil"),
            kind: FieldKind::Integer,
            range: Some((0.0, u32::MAX as f64)),
            required: false,
        },
        FieldSchema {
            name: "round_robin_sequencing_group",
            description: "Regions with the same group name cycle round-robin together.",
            example: "\"main\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "feather_overlapping_velocity_layers",
            description: "Crossfade overlapping velocity layers proportionally to their overlap.",
            example: "false",
            default: Some("false"),
            kind: FieldKind::Boolean,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "auto_map_key_range_group",
            description: "Regions with the same group name have key ranges derived from their root keys.",
            example: "\"auto\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
    ],
};

pub const LOOP: TableSchema = TableSchema {
    name: "loop",
    description: "Loop configuration of a region.",
    fields: &[
        FieldSchema {
            name: "builtin_loop",
            description: "A loop baked in by the library author.",
            example: "{ start_frame = 3000, end_frame = 9000, crossfade = 200, mode = \"standard\" }",
            default: Some("nil"),
            kind: FieldKind::Sub("builtin_loop"),
            range: None,
            required: false,
        },
        FieldSchema {
            name: "loop_requirement",
            description: "Whether playback must, must not, or may loop this region.",
            example: "\"default\"",
            default: Some("\"default\""),
            kind: FieldKind::Enum(LOOP_REQUIREMENTS),
            range: None,
            required: false,
        },
    ],
};

pub const BUILTIN_LOOP: TableSchema = TableSchema {
    name: "builtin_loop",
    description: "An author-defined loop. Negative frames count from the end; an end of 0 means end-of-file.",
    fields: &[
        FieldSchema {
            name: "start_frame",
            description: "First frame of the loop.",
            example: "3000",
            default: None,
            kind: FieldKind::Integer,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "end_frame",
            description: "One past the last frame of the loop; 0 means end-of-file.",
            example: "9000",
            default: None,
            kind: FieldKind::Integer,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "crossfade",
            description: "Number of frames crossfaded at the loop point.",
            example: "200",
            default: Some("0"),
            kind: FieldKind::Integer,
            range: Some((0.0, u32::MAX as f64)),
            required: false,
        },
        FieldSchema {
            name: "mode",
            description: "The loop traversal mode.",
            example: "\"standard\"",
            default: Some("\"standard\""),
            kind: FieldKind::Enum(LOOP_MODES),
            range: None,
            required: false,
        },
        FieldSchema {
            name: "lock_loop_points",
            description: "Forbid the user from moving the loop points.",
            example: "false",
            default: Some("false"),
            kind: FieldKind::Boolean,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "lock_mode",
            description: "Forbid the user from changing the loop mode.",
            example: "false",
            default: Some("false"),
            kind: FieldKind::Boolean,
            range: None,
            required: false,
        },
    ],
};

pub const AUDIO_PROPERTIES: TableSchema = TableSchema {
    name: "audio_properties",
    description: "Gain, tuning and trimming applied to a region before playback.",
    fields: &[
        FieldSchema {
            name: "gain_db",
            description: "Gain in decibels applied to the file.",
            example: "-3",
            default: Some("0"),
            kind: FieldKind::Number,
            range: Some((-90.0, 45.0)),
            required: false,
        },
        FieldSchema {
            name: "tune_cents",
            description: "Pitch offset in cents applied to the file.",
            example: "0",
            default: Some("0"),
            kind: FieldKind::Number,
            range: Some((-3600.0, 3600.0)),
            required: false,
        },
        FieldSchema {
            name: "start_offset_frames",
            description: "Frames skipped at the start of the file.",
            example: "0",
            default: Some("0"),
            kind: FieldKind::Integer,
            range: Some((0.0, u32::MAX as f64)),
            required: false,
        },
        FieldSchema {
            name: "fade_in_frames",
            description: "Length of the fade-in applied at the playback start.",
            example: "0",
            default: Some("0"),
            kind: FieldKind::Integer,
            range: Some((0.0, u32::MAX as f64)),
            required: false,
        },
    ],
};

pub const PLAYBACK: TableSchema = TableSchema {
    name: "playback",
    description: "Playback behaviour of a region.",
    fields: &[FieldSchema {
        name: "keytrack_requirement",
        description: "Whether pitch must, must not, or may track the played key.",
        example: "\"default\"",
        default: Some("\"default\""),
        kind: FieldKind::Enum(KEYTRACK_REQUIREMENTS),
        range: None,
        required: false,
    }],
};

pub const TIMBRE_LAYERING: TableSchema = TableSchema {
    name: "timbre_layering",
    description: "Placement of a region on the timbre crossfade axis.",
    fields: &[FieldSchema {
        name: "layer_range",
        description: "Sub-range of 0-100 this region occupies on the timbre axis.",
        example: "{0, 50}",
        default: Some("nil"),
        kind: FieldKind::IntPair,
        range: Some((0.0, 100.0)),
        required: false,
    }],
};

pub const IR: TableSchema = TableSchema {
    name: "impulse_response",
    description: "A single audio file used by the convolution reverb.",
    fields: &[
        FieldSchema {
            name: "name",
            description: "The name of the impulse response, unique within the library.",
            example: "\"Ice Cave\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "path",
            description: "Library-relative path of the impulse audio file.",
            example: "\"IRs/ice-cave.flac\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "folder",
            description: "Slash-separated picker folder, at most 4 levels deep.",
            example: "\"Caves\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "tags",
            description: "Tags used for filtering in the IR picker.",
            example: "{\"cave\", \"large\"}",
            default: Some("{}"),
            kind: FieldKind::StringArray,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "description",
            description: "A description of the impulse response.",
            example: "\"A large, bright natural reverb.\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
        FieldSchema {
            name: "gain_db",
            description: "Gain in decibels applied to the impulse.",
            example: "0",
            default: Some("0"),
            kind: FieldKind::Number,
            range: Some((-90.0, 45.0)),
            required: false,
        },
    ],
};

pub const ATTRIBUTION: TableSchema = TableSchema {
    name: "attribution",
    description: "Attribution required when redistributing one of the library's files.",
    fields: &[
        FieldSchema {
            name: "title",
            description: "The title of the attributed work.",
            example: "\"Cello sustains\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "license_name",
            description: "The name of the license the work is under.",
            example: "\"CC-BY-4.0\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "license_url",
            description: "A URL for the license text.",
            example: "\"https://creativecommons.org/licenses/by/4.0/\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "attributed_to",
            description: "Who the work must be attributed to.",
            example: "\"Jane Doe\"",
            default: None,
            kind: FieldKind::String,
            range: None,
            required: true,
        },
        FieldSchema {
            name: "attribution_url",
            description: "A URL for the attributed party.",
            example: "\"https://example.com/jane\"",
            default: Some("nil"),
            kind: FieldKind::String,
            range: None,
            required: false,
        },
    ],
};

/// Every schema, in documentation order.
pub const ALL: &[&TableSchema] = &[
    &LIBRARY,
    &INSTRUMENT,
    &REGION,
    &TRIGGER_CRITERIA,
    &LOOP,
    &BUILTIN_LOOP,
    &AUDIO_PROPERTIES,
    &PLAYBACK,
    &TIMBRE_LAYERING,
    &IR,
    &ATTRIBUTION,
];

/// Looks up a schema by name; sub-schema references use this.
pub fn by_name(name: &str) -> Option<&'static TableSchema> {
    ALL.iter().copied().find(|schema| schema.name == name)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sub_schema_references_resolve() {
        for schema in ALL {
            for field in schema.fields {
                if let FieldKind::Sub(name) = field.kind {
                    assert!(
                        by_name(name).is_some(),
                        "{}.{} references unknown schema {}",
                        schema.name,
                        field.name,
                        name
                    );
                }
            }
        }
    }

    #[test]
    fn test_required_fields_have_no_default() {
        for schema in ALL {
            for field in schema.fields {
                if field.required {
                    assert!(
                        field.default.is_none(),
                        "{}.{} is required but has a default",
                        schema.name,
                        field.name
                    );
                }
            }
        }
    }
}
