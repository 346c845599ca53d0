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

//! Interleave engine: best-guess detection from a sector map, and
//! applying an interleave factor to a loaded track's maps and data
//! consistently.

use log::warn;

use crate::error::ImdError;
use crate::track::Track;

/// Sentinel for "write sectors in the order they currently appear" (no
/// interleave transform).
pub const INTERLEAVE_AS_READ: u8 = 0;
/// Sentinel for "detect the best interleave and apply it before writing".
pub const INTERLEAVE_BEST_GUESS: u8 = 255;

/// Detect the most likely interleave factor from a physical-position-indexed
/// sector map.
///
/// Duplicate logical IDs are tolerated: a later duplicate silently overwrites
/// an earlier entry's recorded physical position (logged as a warning here,
/// not an error).
pub fn detect_interleave(smap: &[u8]) -> u8 {
    let n = smap.len();
    if n < 2 {
        return 1;
    }

    // pos[logical_id] = physical_index; last duplicate wins.
    let mut pos = vec![0usize; 256];
    let mut seen = vec![false; 256];
    for (phys, &logical) in smap.iter().enumerate() {
        if seen[logical as usize] {
            warn!("duplicate logical sector id {} in interleave map", logical);
        }
        pos[logical as usize] = phys;
        seen[logical as usize] = true;
    }

    let mut sorted: Vec<u8> = (0u16..256).filter(|&id| seen[id as usize]).map(|id| id as u8).collect();
    sorted.sort_unstable();

    let mut tally = vec![0u32; n];
    for i in 0..sorted.len() {
        let a = sorted[i] as usize;
        let b = sorted[(i + 1) % sorted.len()] as usize;
        let dist = (pos[b] + n - pos[a]) % n;
        if dist >= 1 && dist < n {
            tally[dist] += 1;
        }
    }

    let mut best = 1usize;
    let mut best_count = 0u32;
    for (dist, &count) in tally.iter().enumerate().skip(1) {
        if count > best_count {
            best_count = count;
            best = dist;
        }
    }
    best as u8
}

/// Apply interleave factor `k` to a fully loaded track, reordering `smap`,
/// `cmap`, `hmap`, `sflag`, and `data` in place so that the physical layout
/// matches the requested stride.
pub fn apply_interleave(track: &mut Track, k: u8) -> Result<(), ImdError> {
    if !track.loaded {
        return Err(ImdError::InvalidArg("track is not loaded".to_string()));
    }
    if k < 1 {
        return Err(ImdError::InvalidArg("interleave factor must be >= 1".to_string()));
    }
    let n = track.num_sectors as usize;
    if n < 2 {
        return Err(ImdError::InvalidArg(
            "interleave requires at least two sectors".to_string(),
        ));
    }

    let sector_size = track.sector_size();

    let orig_smap = track.smap.clone();
    let orig_cmap = track.cmap.clone();
    let orig_hmap = track.hmap.clone();
    let orig_sflag = track.sflag.clone();
    let orig_data = track.data.clone();

    // Canonical logical order: logical_to_physical[i] = original physical
    // index of the i-th logically smallest sector ID.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| orig_smap[i]);

    let mut occupied = vec![false; n];
    let mut target = 0usize;

    for &orig_phys in &order {
        while occupied[target] {
            target = (target + 1) % n;
        }
        occupied[target] = true;

        track.smap[target] = orig_smap[orig_phys];
        track.cmap[target] = orig_cmap[orig_phys];
        track.hmap[target] = orig_hmap[orig_phys];
        track.sflag[target] = orig_sflag[orig_phys];
        track.data[target * sector_size..(target + 1) * sector_size]
            .copy_from_slice(&orig_data[orig_phys * sector_size..(orig_phys + 1) * sector_size]);

        target = (target + k as usize) % n;
    }

    Ok(())
}
