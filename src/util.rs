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

use std::path::{Component, Path};

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Normalises a path to forward slashes for hashing and comparison. Library and
/// preset subpaths are stored this way regardless of platform.
pub fn normalise_separators(path: &str) -> String {
    path.replace('\\', "/")
}

/// Returns true if a manifest-supplied relative path stays inside its library
/// folder: not absolute, no `..` components, no drive prefixes.
pub fn path_is_contained(path: &str) -> bool {
    let path = Path::new(path);
    if path.is_absolute() {
        return false;
    }
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

/// Shortens an absolute scan-folder path for display: the last two components,
/// prefixed with an ellipsis when anything was dropped.
pub fn abbreviate_path(path: &Path) -> String {
    let components: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    match components.len() {
        0 => path.display().to_string(),
        1 => components[0].to_string(),
        2 => components.join("/"),
        _ => format!("…/{}", components[components.len() - 2..].join("/")),
    }
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::{abbreviate_path, normalise_separators, path_is_contained};

    #[test]
    fn test_path_is_contained() {
        assert!(path_is_contained("Samples/a.flac"));
        assert!(path_is_contained("./Samples/a.flac"));
        assert!(!path_is_contained("/etc/passwd"));
        assert!(!path_is_contained("../outside.lua"));
        assert!(!path_is_contained("Samples/../../outside.lua"));
    }

    #[test]
    fn test_normalise_separators() {
        assert_eq!("a/b/c.wav", normalise_separators("a\\b\\c.wav"));
        assert_eq!("a/b", normalise_separators("a/b"));
    }

    #[test]
    fn test_abbreviate_path() {
        assert_eq!(
            "…/Floe/Presets",
            abbreviate_path(Path::new("/home/me/Floe/Presets"))
        );
        assert_eq!("Floe/Presets", abbreviate_path(Path::new("Floe/Presets")));
        assert_eq!("Presets", abbreviate_path(Path::new("Presets")));
    }
}
