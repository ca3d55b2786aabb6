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

//! Offline documentation tooling: a documented example manifest and Lua LSP
//! definitions generated from the manifest schemas, a JSON blob for the
//! website build, and an mdBook preprocessor that splices the same content
//! into book pages.
//!
//! The example manifest carries `-- SECTION: name` anchors. The JSON
//! generator and the preprocessor both go through `extract_sections`, so
//! the section bodies they emit can never differ.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CatalogError;
use crate::library::schema::{self, FieldKind, TableSchema};

const RELEASE_URL: &str = "https://api.github.com/repos/floe-audio/floe-catalog/releases/latest";
const USER_AGENT: &str = concat!("floe-catalog/", env!("CARGO_PKG_VERSION"));

/// Minimum OS versions, as shown on the download page.
pub const MIN_OS_VERSIONS: &[(&str, &str)] = &[
    ("Windows", "Windows 10"),
    ("macOS", "macOS 11.0"),
    ("Linux", "glibc 2.31"),
];

/// The tag taxonomy suggested to library authors, grouped by category.
pub const TAG_TAXONOMY: &[(&str, &[&str])] = &[
    ("instrument type", &["strings", "keys", "percussion", "winds", "vocals", "synthesised"]),
    ("timbre", &["warm", "bright", "dark", "airy", "gritty"]),
    ("articulation", &["sustained", "staccato", "tremolo", "plucked", "bowed"]),
    ("character", &["cinematic", "ambient", "organic", "lo-fi"]),
];

/// Generates the fully documented example manifest. Every schema becomes a
/// block wrapped in `-- SECTION: <name>` anchors so documentation pages can
/// pull out exactly one table's worth of example.
pub fn documented_example() -> String {
    let mut out = String::from(
        "-- A complete, commented library manifest. Every field of every table is\n\
         -- shown with its default and range where it has one.\n\n",
    );
    for schema in schema::ALL {
        out.push_str(&format!("-- SECTION: {}\n", schema.name));
        out.push_str(&format!("-- {}\n", schema.description));
        out.push_str(&example_table(schema));
        out.push_str(&format!("-- SECTION_END: {}\n\n", schema.name));
    }
    out.push_str(example_usage());
    out
}

fn example_table(schema: &TableSchema) -> String {
    let mut out = format!("local {} = {{\n", lua_identifier(schema.name));
    for field in schema.fields {
        out.push_str(&format!("    -- {}\n", field.description));
        match (field.required, field.default, field.range) {
            (true, _, Some((low, high))) => {
                out.push_str(&format!("    -- Required. Range: {low} to {high}.\n"));
            }
            (true, _, None) => out.push_str("    -- Required.\n"),
            (false, Some(default), Some((low, high))) => {
                out.push_str(&format!("    -- Default: {default}. Range: {low} to {high}.\n"));
            }
            (false, Some(default), None) => {
                out.push_str(&format!("    -- Default: {default}.\n"));
            }
            (false, None, _) => {}
        }
        if let FieldKind::Enum(options) = field.kind {
            let quoted: Vec<String> = options.iter().map(|option| format!("\"{option}\"")).collect();
            out.push_str(&format!("    -- One of: {}.\n", quoted.join(", ")));
        }
        out.push_str(&format!("    {} = {},\n", field.name, field.example));
    }
    out.push_str("}\n");
    out
}

fn example_usage() -> &'static str {
    "-- SECTION: usage\n\
     local library = new_library(library)\n\
     local instrument = new_instrument(library, instrument)\n\
     region.trigger_criteria = trigger_criteria\n\
     region.loop = loop_config\n\
     region.audio_properties = audio_properties\n\
     region.playback = playback\n\
     region.timbre_layering = timbre_layering\n\
     add_region(instrument, region)\n\
     add_ir(library, impulse_response)\n\
     set_attribution_requirement(\"Samples/cello-c3.flac\", attribution)\n\
     return library\n\
     -- SECTION_END: usage\n"
}

fn lua_identifier(name: &str) -> String {
    // "loop" is a Lua keyword-adjacent local we rename in the example.
    if name == "loop" {
        "loop_config".to_string()
    } else {
        name.replace('-', "_")
    }
}

/// Generates Lua LSP definitions (`---@class` annotations) for every schema
/// plus the host callbacks, for library authors' editors.
pub fn lsp_definitions() -> String {
    let mut out = String::from("---@meta\n\n");
    for schema in schema::ALL {
        out.push_str(&format!("---{}\n", schema.description));
        out.push_str(&format!("---@class {}\n", schema.name));
        for field in schema.fields {
            let optional = if field.required { "" } else { "?" };
            out.push_str(&format!(
                "---@field {}{} {} {}\n",
                field.name,
                optional,
                lsp_type(&field.kind),
                field.description
            ));
        }
        out.push('\n');
    }
    out.push_str(
        "---@param config library\n---@return library\nfunction new_library(config) end\n\n\
         ---@param library library\n---@param config instrument\n---@return instrument\n\
         function new_instrument(library, config) end\n\n\
         ---@param instrument instrument\n---@param config region\nfunction add_region(instrument, config) end\n\n\
         ---@param library library\n---@param config impulse_response\nfunction add_ir(library, config) end\n\n\
         ---@param path string\n---@param config attribution\n\
         function set_attribution_requirement(path, config) end\n\n\
         ---@param version string\nfunction set_required_floe_version(version) end\n\n\
         ---@generic T\n---@param base T\n---@param t table\n---@return T\nfunction extend_table(base, t) end\n",
    );
    out
}

fn lsp_type(kind: &FieldKind) -> String {
    match kind {
        FieldKind::String => "string".to_string(),
        FieldKind::Number => "number".to_string(),
        FieldKind::Integer => "integer".to_string(),
        FieldKind::Boolean => "boolean".to_string(),
        FieldKind::StringArray => "string[]".to_string(),
        FieldKind::IntPair => "integer[]".to_string(),
        FieldKind::Enum(options) => options
            .iter()
            .map(|option| format!("\"{option}\""))
            .collect::<Vec<String>>()
            .join("|"),
        FieldKind::Sub(name) => (*name).to_string(),
    }
}

/// Pulls the bodies out of `-- SECTION: name` blocks, anchors excluded and
/// surrounding blank lines trimmed.
pub fn extract_sections(lua: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;
    for line in lua.lines() {
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix("-- SECTION: ") {
            current = Some((name.trim().to_string(), Vec::new()));
        } else if let Some(name) = trimmed.strip_prefix("-- SECTION_END: ") {
            if let Some((open_name, lines)) = current.take() {
                if open_name == name.trim() {
                    sections.insert(open_name, lines.join("\n").trim().to_string());
                }
            }
        } else if let Some((_, lines)) = &mut current {
            lines.push(line);
        }
    }
    sections
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseInfo {
    pub tag_name: String,
    pub assets: Vec<ReleaseAsset>,
}

/// Loads the cached latest-release metadata, refreshing it over HTTPS when
/// asked. A `GITHUB_TOKEN` environment variable is used as a bearer token
/// purely to raise rate limits. Fetch failures fall back to the cache.
pub fn load_release_info(cache_path: &Path, refresh: bool) -> Result<Option<ReleaseInfo>, CatalogError> {
    let cached = match fs::read_to_string(cache_path) {
        Ok(text) => serde_json::from_str::<ReleaseInfo>(&text).ok(),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => None,
        Err(error) => return Err(CatalogError::io(cache_path, error)),
    };
    if !refresh && cached.is_some() {
        return Ok(cached);
    }

    match fetch_release_info() {
        Ok(info) => {
            if let Some(parent) = cache_path.parent() {
                fs::create_dir_all(parent).map_err(|error| CatalogError::io(parent, error))?;
            }
            let json = serde_json::to_string_pretty(&info)
                .map_err(|error| CatalogError::invalid(cache_path, error.to_string()))?;
            fs::write(cache_path, json).map_err(|error| CatalogError::io(cache_path, error))?;
            debug!(tag = %info.tag_name, assets = info.assets.len(), "refreshed release metadata");
            Ok(Some(info))
        }
        Err(message) => {
            warn!(error = %message, "could not refresh release metadata, using cache");
            Ok(cached)
        }
    }
}

fn fetch_release_info() -> Result<ReleaseInfo, String> {
    let mut request = ureq::get(RELEASE_URL)
        .set("User-Agent", USER_AGENT)
        .set("Accept", "application/vnd.github+json");
    if let Ok(token) = env::var("GITHUB_TOKEN") {
        request = request.set("Authorization", &format!("Bearer {token}"));
    }
    let response = request.call().map_err(|error| error.to_string());
    response?.into_json::<ReleaseInfo>().map_err(|error| error.to_string())
}

/// Everything the website build consumes.
#[derive(Debug, Serialize)]
pub struct DocsBlob {
    pub lua_example: String,
    pub lua_sections: BTreeMap<String, String>,
    pub lsp_definitions: String,
    pub min_os_versions: BTreeMap<String, String>,
    pub packager_help: String,
    pub tag_taxonomy: BTreeMap<String, Vec<String>>,
    pub latest_release: Option<ReleaseInfo>,
}

/// Inputs that only the caller knows; everything else is generated.
pub struct DocsContext {
    pub packager_help: String,
    pub latest_release: Option<ReleaseInfo>,
}

pub fn generate_blob(context: &DocsContext) -> DocsBlob {
    let lua_example = documented_example();
    DocsBlob {
        lua_sections: extract_sections(&lua_example),
        lua_example,
        lsp_definitions: lsp_definitions(),
        min_os_versions: MIN_OS_VERSIONS
            .iter()
            .map(|(os, version)| (os.to_string(), version.to_string()))
            .collect(),
        packager_help: context.packager_help.clone(),
        tag_taxonomy: TAG_TAXONOMY
            .iter()
            .map(|(category, tags)| {
                (
                    category.to_string(),
                    tags.iter().map(|tag| tag.to_string()).collect(),
                )
            })
            .collect(),
        latest_release: context.latest_release.clone(),
    }
}

/// Expands `==identifier[:sub]==` placeholders. Unknown identifiers are left
/// untouched so a typo fails visibly in the rendered page.
pub fn expand_placeholders(content: &str, blob: &DocsBlob) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("==") {
        let after = &rest[start + 2..];
        let Some(length) = after.find("==") else {
            break;
        };
        let identifier = &after[..length];
        if !identifier.is_empty()
            && identifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
        {
            out.push_str(&rest[..start]);
            match resolve_placeholder(identifier, blob) {
                Some(value) => out.push_str(&value),
                None => {
                    warn!(identifier, "unknown documentation placeholder");
                    out.push_str(&rest[start..start + 2 + length + 2]);
                }
            }
            rest = &after[length + 2..];
        } else {
            out.push_str(&rest[..start + 2]);
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

fn resolve_placeholder(identifier: &str, blob: &DocsBlob) -> Option<String> {
    let (name, sub) = match identifier.split_once(':') {
        Some((name, sub)) => (name, Some(sub)),
        None => (identifier, None),
    };
    match (name, sub) {
        ("lua-example", None) => Some(blob.lua_example.clone()),
        ("lua-example", Some(section)) => blob.lua_sections.get(section).cloned(),
        ("lsp-definitions", None) => Some(blob.lsp_definitions.clone()),
        ("packager-help", None) => Some(blob.packager_help.clone()),
        ("min-os", Some(os)) => blob.min_os_versions.get(os).cloned(),
        ("tag-taxonomy", None) => Some(
            blob.tag_taxonomy
                .iter()
                .map(|(category, tags)| format!("* {}: {}", category, tags.join(", ")))
                .collect::<Vec<String>>()
                .join("\n"),
        ),
        ("latest-release", None) => blob
            .latest_release
            .as_ref()
            .map(|release| release.tag_name.clone()),
        ("latest-release", Some(asset_name)) => blob.latest_release.as_ref().and_then(|release| {
            release
                .assets
                .iter()
                .find(|asset| asset.name == asset_name)
                .map(|asset| asset.browser_download_url.clone())
        }),
        _ => None,
    }
}

/// The mdBook preprocessor body: takes the `[context, book]` JSON array from
/// stdin, expands placeholders in every chapter, returns the book JSON.
pub fn preprocess_book(input: &str, blob: &DocsBlob) -> Result<String, CatalogError> {
    let parsed: Value = serde_json::from_str(input)
        .map_err(|error| CatalogError::Integrity(format!("malformed preprocessor input: {error}")))?;
    let Value::Array(mut parts) = parsed else {
        return Err(CatalogError::Integrity(
            "preprocessor input is not a [context, book] array".to_string(),
        ));
    };
    if parts.len() != 2 {
        return Err(CatalogError::Integrity(
            "preprocessor input is not a [context, book] array".to_string(),
        ));
    }
    let mut book = parts.pop().unwrap_or(Value::Null);
    expand_book_item(&mut book, blob);
    serde_json::to_string(&book)
        .map_err(|error| CatalogError::Integrity(format!("could not serialise book: {error}")))
}

fn expand_book_item(value: &mut Value, blob: &DocsBlob) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(content)) = map.get_mut("content") {
                *content = expand_placeholders(content, blob);
            }
            for (key, child) in map.iter_mut() {
                if key != "content" {
                    expand_book_item(child, blob);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                expand_book_item(item, blob);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use super::*;

    fn blob() -> DocsBlob {
        generate_blob(&DocsContext {
            packager_help: "usage: floe-catalog package [OPTIONS]".to_string(),
            latest_release: Some(ReleaseInfo {
                tag_name: "v0.3.0".to_string(),
                assets: vec![ReleaseAsset {
                    name: "floe-catalog-linux.zip".to_string(),
                    browser_download_url: "https://example.com/floe-catalog-linux.zip".to_string(),
                    size: 1024,
                }],
            }),
        })
    }

    #[test]
    fn test_example_has_a_section_per_schema() {
        let sections = extract_sections(&documented_example());
        for schema in schema::ALL {
            assert!(sections.contains_key(schema.name), "missing section {}", schema.name);
        }
        assert!(sections.contains_key("usage"));
    }

    #[test]
    fn test_sections_exclude_anchors_and_trim() {
        let sections = extract_sections("-- SECTION: a\n\nbody line\n\n-- SECTION_END: a\n");
        assert_eq!("body line", sections["a"]);
    }

    #[test]
    fn test_mismatched_anchor_is_dropped() {
        let sections = extract_sections("-- SECTION: a\nbody\n-- SECTION_END: b\n");
        assert!(sections.is_empty());
    }

    #[test]
    fn test_generator_and_preprocessor_agree_on_sections() {
        let blob = blob();
        let expanded = expand_placeholders("==lua-example:region==", &blob);
        assert_eq!(blob.lua_sections["region"], expanded);
    }

    #[test]
    fn test_lsp_definitions_cover_every_schema() {
        let definitions = lsp_definitions();
        for schema in schema::ALL {
            assert!(definitions.contains(&format!("---@class {}", schema.name)));
            for field in schema.fields {
                assert!(
                    definitions.contains(&format!("---@field {}", field.name)),
                    "missing field {}.{}",
                    schema.name,
                    field.name
                );
            }
        }
    }

    #[test]
    fn test_placeholder_expansion() {
        let blob = blob();
        let page = "Download ==latest-release== from ==latest-release:floe-catalog-linux.zip==.";
        let expanded = expand_placeholders(page, &blob);
        assert_eq!(
            "Download v0.3.0 from https://example.com/floe-catalog-linux.zip.",
            expanded
        );
        // Unknown identifiers stay put.
        assert_eq!("==no-such-thing==", expand_placeholders("==no-such-thing==", &blob));
        // Plain equals signs are untouched.
        assert_eq!("a == b", expand_placeholders("a == b", &blob));
    }

    #[test]
    fn test_preprocess_book_expands_chapters() {
        let blob = blob();
        let input = serde_json::json!([
            {"root": "/book"},
            {"sections": [
                {"Chapter": {
                    "name": "Packaging",
                    "content": "Run:\n\n==packager-help==\n",
                    "sub_items": [
                        {"Chapter": {"name": "Sub", "content": "==min-os:Windows==", "sub_items": []}}
                    ]
                }},
                "Separator"
            ]}
        ])
        .to_string();
        let output = preprocess_book(&input, &blob).unwrap();
        let book: Value = serde_json::from_str(&output).unwrap();
        let chapter = &book["sections"][0]["Chapter"];
        assert!(chapter["content"]
            .as_str()
            .unwrap()
            .contains("usage: floe-catalog package"));
        assert_eq!(
            "Windows 10",
            book["sections"][0]["Chapter"]["sub_items"][0]["Chapter"]["content"]
        );
    }

    #[test]
    fn test_release_cache_is_used_without_refresh() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("release.json");
        let info = ReleaseInfo {
            tag_name: "v0.2.9".to_string(),
            assets: Vec::new(),
        };
        fs::write(&cache, serde_json::to_string(&info).unwrap()).unwrap();
        let loaded = load_release_info(&cache, false).unwrap();
        assert_eq!(Some(info), loaded);
    }
}
