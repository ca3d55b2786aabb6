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
use std::io;
use std::path::PathBuf;

/// What went wrong inside a manifest script. `Unexpected` covers failures of the
/// scripting machinery itself rather than the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    Memory,
    Syntax,
    Runtime,
    Timeout,
    Unexpected,
}

impl std::fmt::Display for ScriptErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScriptErrorKind::Memory => "memory",
            ScriptErrorKind::Syntax => "syntax",
            ScriptErrorKind::Runtime => "runtime",
            ScriptErrorKind::Timeout => "timeout",
            ScriptErrorKind::Unexpected => "unexpected",
        };
        write!(f, "{}", name)
    }
}

/// Typed errors for the catalogue so callers can distinguish e.g. a malformed
/// manifest from a missing file without string matching.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Malformed manifest, bad arguments, value out of a declared range.
    #[error("invalid input in {path}: {message}")]
    InvalidInput { path: PathBuf, message: String },

    /// A referenced path or named object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A declared cap was crossed: script memory/time, round-robin groups,
    /// overlapping layers, store file size.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// An underlying I/O failure, annotated with the path involved.
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A manifest script failed. The message is cloned out of the scripting
    /// state before it is torn down.
    #[error("{kind} error in script {path}: {message}")]
    Script {
        kind: ScriptErrorKind,
        path: PathBuf,
        message: String,
    },

    /// Checksum mismatch, missing referenced audio file, identity field out of
    /// bounds.
    #[error("integrity error: {0}")]
    Integrity(String),
}

impl CatalogError {
    /// Annotates an I/O error with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> CatalogError {
        CatalogError::Io {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for an invalid-input error tied to a file.
    pub fn invalid(path: impl Into<PathBuf>, message: impl Into<String>) -> CatalogError {
        CatalogError::InvalidInput {
            path: path.into(),
            message: message.into(),
        }
    }
}
