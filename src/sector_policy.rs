/*
    imagedisk
    https://github.com/dbalsom/fluxfox

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Sector-data-record policy: decides the output Sector Data Record type
//! for a sector given its input flag, its current bytes, and the caller's
//! write options.

use crate::codec;

/// How the writer should pick compressed vs. normal sector records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMode {
    /// Match the input sector's compression state where possible, falling
    /// back to normal if an edit broke uniformity.
    #[default]
    AsRead,
    /// Always compress sectors whose current bytes are uniform.
    ForceCompress,
    /// Always emit full sector data.
    ForceDecompress,
}

/// Options controlling how track write re-derives each sector's output
/// Sector Data Record.
#[derive(Debug, Clone, Copy)]
pub struct SectorWriteOptions {
    pub compression_mode: CompressionMode,
    /// If true, clear the DAM bit regardless of the input sector's flag.
    pub force_non_deleted: bool,
    /// If true, clear the ERR bit regardless of the input sector's flag.
    pub force_non_bad: bool,
}

impl Default for SectorWriteOptions {
    fn default() -> Self {
        SectorWriteOptions {
            compression_mode: CompressionMode::AsRead,
            force_non_deleted: false,
            force_non_bad: false,
        }
    }
}

/// Compute the output Sector Data Record byte for one sector.
///
/// `input_sflag` is the sector's current on-disk (or in-memory-tagged) flag;
/// `data` is its current (possibly edited) bytes.
pub fn decide_sflag(input_sflag: u8, data: &[u8], opts: &SectorWriteOptions) -> u8 {
    if codec::is_unavailable(input_sflag) {
        return 0x00;
    }

    let uniform = codec::is_uniform(data);
    let input_compressed = codec::is_compressed(input_sflag);

    let compressed = match opts.compression_mode {
        CompressionMode::ForceCompress => uniform,
        CompressionMode::ForceDecompress => false,
        CompressionMode::AsRead => {
            if input_compressed {
                uniform
            } else {
                false
            }
        }
    };

    let dam = codec::has_dam(input_sflag) && !opts.force_non_deleted;
    let err = codec::has_err(input_sflag) && !opts.force_non_bad;

    codec::combine_sflag(compressed, dam, err)
}
