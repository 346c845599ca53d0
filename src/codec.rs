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

//! Codec primitives: the sector size table and the Sector Data Record
//! predicates, ported bit-for-bit from the reference `libimd` macros.

use crate::error::ImdError;

pub const MAX_SECTORS_PER_TRACK: usize = 256;
pub const MAX_SECTOR_SIZE: usize = 8192;
pub const DEFAULT_FILL_BYTE: u8 = 0xE5;
pub const MAX_HEADER_LINE: usize = 256;
pub const COMMENT_EOF_MARKER: u8 = 0x1A;
pub const NUM_MODES: usize = 6;

/// Sector size in bytes for each `sector_size_code` 0..=6.
pub const SIZE_TABLE: [usize; 7] = [128, 256, 512, 1024, 2048, 4096, 8192];

/// Translate a `sector_size_code` (0..=6) into its byte size, or `None` if out
/// of range (codes 7..=255 are invalid).
pub fn sector_size_for_code(code: u8) -> Option<usize> {
    SIZE_TABLE.get(code as usize).copied()
}

/// Translate a sector size in bytes back into its `sector_size_code`, if the
/// size exactly matches one of the seven supported sizes.
pub fn code_for_sector_size(size: usize) -> Option<u8> {
    SIZE_TABLE.iter().position(|&s| s == size).map(|i| i as u8)
}

/// True for Sector Data Record types that carry data on disk (odd or even,
/// nonzero): 0x01..=0x08.
pub fn has_data(sflag: u8) -> bool {
    (0x01..=0x08).contains(&sflag)
}

/// True for compressed (single-fill-byte) records: even, nonzero.
pub fn is_compressed(sflag: u8) -> bool {
    sflag != 0 && sflag & 0x01 == 0
}

/// True if the Deleted-Data Address Mark bit is asserted (codes 3, 4, 7, 8).
///
/// Mirrors the reference macro `(type - 1) & 0x02`, which only produces a
/// meaningful answer for `sflag` in `0x00..=0x08`; the track codec rejects
/// any byte outside that range before it reaches this predicate.
pub fn has_dam(sflag: u8) -> bool {
    sflag != 0 && (sflag - 1) & 0x02 != 0
}

/// True if the read-error bit is asserted (codes 5, 6, 7, 8). See [`has_dam`]
/// for the validity caveat on out-of-range input.
pub fn has_err(sflag: u8) -> bool {
    sflag != 0 && (sflag - 1) & 0x04 != 0
}

/// True for the "unavailable" record (no data follows).
pub fn is_unavailable(sflag: u8) -> bool {
    sflag == 0x00
}

/// Combine a base record kind (normal/compressed) with DAM/ERR status bits
/// into the canonical on-disk Sector Data Record byte.
pub fn combine_sflag(compressed: bool, dam: bool, err: bool) -> u8 {
    let base: u8 = if compressed { 2 } else { 1 };
    let mut flag = base;
    if dam {
        flag += 2;
    }
    if err {
        flag += 4;
    }
    flag
}

/// Scan a sector's bytes for a single repeated fill value. An empty slice is
/// vacuously uniform.
pub fn is_uniform(data: &[u8]) -> bool {
    match data.split_first() {
        None => true,
        Some((first, rest)) => rest.iter().all(|b| b == first),
    }
}

/// Read exactly `buf.len()` bytes, mapping end-of-input and I/O faults onto
/// [`ImdError::ReadError`].
pub fn read_exact<R: std::io::Read>(r: &mut R, buf: &mut [u8]) -> Result<(), ImdError> {
    r.read_exact(buf).map_err(ImdError::from)
}

/// Read a single byte, returning `Ok(None)` only when called at a clean
/// end-of-input boundary the caller has identified as acceptable (the track
/// codec uses this to distinguish "no more tracks" from a mid-record fault).
pub fn read_byte_opt<R: std::io::Read>(r: &mut R) -> std::io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match r.read(&mut byte) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(byte[0])),
        Err(e) => Err(e),
    }
}

/// Write exactly `buf`, mapping any I/O fault onto [`ImdError::WriteError`].
pub fn write_exact<W: std::io::Write>(w: &mut W, buf: &[u8]) -> Result<(), ImdError> {
    w.write_all(buf).map_err(|e| ImdError::WriteError(e.to_string()))
}
