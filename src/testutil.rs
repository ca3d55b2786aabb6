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

//! Fixtures shared by tests: tiny WAV files and on-disk Lua libraries.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes a 16-bit PCM WAV with the given shape. The content is a quiet sine
/// so decoded output is non-trivial.
pub fn write_test_wav(
    path: &Path,
    channels: u16,
    sample_rate: u32,
    frames: u32,
) -> Result<(), Box<dyn Error>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for frame in 0..frames {
        let t = frame as f32 / sample_rate as f32;
        let value = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.25;
        for _ in 0..channels {
            writer.write_sample((value * i16::MAX as f32) as i16)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Creates a minimal valid Lua library under `parent`: one instrument with one
/// region, a real WAV and a license file. Returns the library folder.
pub fn write_test_library(
    parent: &Path,
    name: &str,
    author: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let root = parent.join(name);
    fs::create_dir_all(root.join("Samples"))?;
    write_test_wav(&root.join("Samples/a.wav"), 1, 44100, 256)?;
    fs::write(root.join("License.txt"), "test license\n")?;
    fs::write(
        root.join(crate::library::lua::MANIFEST_FILENAME),
        format!(
            r#"
local library = new_library({{ name = "{name}", author = "{author}" }})
local inst = new_instrument(library, {{ name = "Keys", tags = {{"piano"}} }})
add_region(inst, {{ path = "Samples/a.wav", root_key = 60 }})
return library
"#
        ),
    )?;
    Ok(root)
}
