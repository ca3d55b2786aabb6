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

//! The Floe sampler's content catalogue: sample libraries, presets,
//! favourites and the background servers that keep them fresh on disk
//! changes, plus the packaging and documentation tooling built on top.

pub mod browser;
pub mod check;
pub mod docs;
pub mod error;
pub mod favourites;
pub mod folders;
pub mod libraries;
pub mod library;
pub mod notifications;
pub mod package;
pub mod presets;
pub mod signal;
pub mod store;
#[cfg(test)]
pub mod testutil;
pub mod util;
