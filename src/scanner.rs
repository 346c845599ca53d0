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

//! Consistency scanner: streams an image collecting statistics and
//! flagging anomalies, re-using the track codec's header+flags read path so
//! it never allocates sector data.

use std::io::{Read, Seek};

use bitflags::bitflags;

use crate::codec;
use crate::header;
use crate::interleave;
use crate::track;

bitflags! {
    /// One bit per check. Which bits are treated as fatal (skip further
    /// per-track work for the offending track) is caller-configured via
    /// [`ScanOptions::error_mask`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CheckBits: u32 {
        const HEADER          = 1 << 0;
        const COMMENT_TERM    = 1 << 1;
        const TRACK_READ      = 1 << 2;
        const FTELL           = 1 << 3;
        const CON_CYL         = 1 << 4;
        const CON_HEAD        = 1 << 5;
        const CON_SECTORS     = 1 << 6;
        const SEQ_CYL_DEC     = 1 << 7;
        const SEQ_HEAD_ORDER  = 1 << 8;
        const DUPE_SID        = 1 << 9;
        const INV_SFLAG_VALUE = 1 << 10;
        const SFLAG_DATA_ERR  = 1 << 11;
        const SFLAG_DEL_DAM   = 1 << 12;
        const DIFF_MAX_CYL    = 1 << 13;
    }
}

/// Scan configuration: which bits abort per-track work when tripped, and the
/// optional geometry constraints to enforce.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub error_mask: CheckBits,
    pub max_allowed_cyl: Option<u8>,
    pub required_head: Option<u8>,
    pub max_allowed_sectors: Option<u16>,
}

/// Scan output: which checks tripped, track count, sector statistics, and
/// observed geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanResults {
    pub failures: CheckBits,
    pub track_count: u32,
    pub sectors_total: u32,
    pub sectors_unavailable: u32,
    pub sectors_deleted: u32,
    pub sectors_compressed: u32,
    pub sectors_data_error: u32,
    pub max_cyl_side0: Option<u8>,
    pub max_cyl_side1: Option<u8>,
    pub max_head_seen: Option<u8>,
    pub detected_interleave: Option<u8>,
}

/// Run every check over `reader` per `opts`.
pub fn scan<R: Read + Seek>(reader: &mut R, opts: &ScanOptions) -> ScanResults {
    let mut results = ScanResults::default();

    if header::read_header(reader).is_err() {
        results.failures |= CheckBits::HEADER;
        return results;
    }
    if header::read_comment(reader).is_err() {
        results.failures |= CheckBits::COMMENT_TERM;
        return results;
    }

    let mut prev: Option<(u8, u8)> = None;

    loop {
        if reader.stream_position().is_err() {
            results.failures |= CheckBits::FTELL;
            break;
        }

        let track = match track::read_track_header_and_flags(reader) {
            Ok(None) => break,
            Ok(Some(t)) => t,
            Err(_) => {
                results.failures |= CheckBits::TRACK_READ;
                break;
            }
        };

        scan_one_track(&track, opts, &mut prev, &mut results);
    }

    if let (Some(c0), Some(c1)) = (results.max_cyl_side0, results.max_cyl_side1) {
        if c0 != c1 {
            results.failures |= CheckBits::DIFF_MAX_CYL;
        }
    }

    results
}

fn scan_one_track(
    track: &track::Track,
    opts: &ScanOptions,
    prev: &mut Option<(u8, u8)>,
    results: &mut ScanResults,
) {
    results.track_count += 1;

    let mut trip = |bit: CheckBits, results: &mut ScanResults| -> bool {
        results.failures |= bit;
        opts.error_mask.contains(bit)
    };

    if let Some(max_cyl) = opts.max_allowed_cyl {
        if track.cyl > max_cyl && trip(CheckBits::CON_CYL, results) {
            return;
        }
    }
    if let Some(required_head) = opts.required_head {
        if track.head != required_head && trip(CheckBits::CON_HEAD, results) {
            return;
        }
    }
    if let Some(max_sectors) = opts.max_allowed_sectors {
        if track.num_sectors > max_sectors && trip(CheckBits::CON_SECTORS, results) {
            return;
        }
    }

    if let Some((prev_cyl, prev_head)) = *prev {
        if track.cyl < prev_cyl && trip(CheckBits::SEQ_CYL_DEC, results) {
            return;
        }
        if track.cyl == prev_cyl && track.head <= prev_head && trip(CheckBits::SEQ_HEAD_ORDER, results) {
            return;
        }
    }
    *prev = Some((track.cyl, track.head));

    match track.head {
        0 => {
            results.max_cyl_side0 = Some(results.max_cyl_side0.map_or(track.cyl, |m| m.max(track.cyl)));
        }
        1 => {
            results.max_cyl_side1 = Some(results.max_cyl_side1.map_or(track.cyl, |m| m.max(track.cyl)));
        }
        _ => {}
    }
    results.max_head_seen = Some(results.max_head_seen.map_or(track.head, |m| m.max(track.head)));

    let mut seen_sid = [false; 256];
    let mut dup = false;
    for &sid in &track.smap {
        if seen_sid[sid as usize] {
            dup = true;
        }
        seen_sid[sid as usize] = true;
    }
    if dup && trip(CheckBits::DUPE_SID, results) {
        return;
    }

    if results.detected_interleave.is_none() && track.smap.len() >= 2 {
        results.detected_interleave = Some(interleave::detect_interleave(&track.smap));
    }

    let mut invalid = false;
    let mut any_err = false;
    let mut any_dam = false;
    for &flag in &track.sflag {
        if flag > 0x08 {
            invalid = true;
            continue;
        }
        results.sectors_total += 1;
        if codec::is_unavailable(flag) {
            results.sectors_unavailable += 1;
            continue;
        }
        if codec::is_compressed(flag) {
            results.sectors_compressed += 1;
        }
        if codec::has_dam(flag) {
            results.sectors_deleted += 1;
            any_dam = true;
        }
        if codec::has_err(flag) {
            results.sectors_data_error += 1;
            any_err = true;
        }
    }
    if invalid && trip(CheckBits::INV_SFLAG_VALUE, results) {
        return;
    }
    if any_err {
        trip(CheckBits::SFLAG_DATA_ERR, results);
    }
    if any_dam {
        trip(CheckBits::SFLAG_DEL_DAM, results);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn image_with_tracks(tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = b"IMD 1.19: 01/01/2025 00:00:00\r\n".to_vec();
        bytes.push(0x1A);
        for t in tracks {
            bytes.extend(t);
        }
        bytes
    }

    fn track_bytes(cyl: u8, head: u8, smap: &[u8], sflags: &[u8]) -> Vec<u8> {
        let n = smap.len() as u8;
        let mut bytes = vec![5, cyl, head, n, 2];
        bytes.extend_from_slice(smap);
        for &f in sflags {
            bytes.push(f);
            if f != 0x00 {
                if codec::is_compressed(f) {
                    bytes.push(0xE5);
                } else {
                    bytes.extend(vec![0xE5u8; 512]);
                }
            }
        }
        bytes
    }

    #[test]
    fn scan_empty_image_reports_zero_tracks() {
        let bytes = image_with_tracks(&[]);
        let mut cur = Cursor::new(bytes);
        let results = scan(&mut cur, &ScanOptions::default());
        assert_eq!(results.track_count, 0);
        assert!(results.failures.is_empty());
    }

    #[test]
    fn scan_counts_sector_classes() {
        let t = track_bytes(0, 0, &[1, 2, 3], &[0x01, 0x02, 0x07]);
        let bytes = image_with_tracks(&[t]);
        let mut cur = Cursor::new(bytes);
        let results = scan(&mut cur, &ScanOptions::default());
        assert_eq!(results.track_count, 1);
        assert_eq!(results.sectors_total, 3);
        assert_eq!(results.sectors_compressed, 1);
        assert_eq!(results.sectors_deleted, 1);
        assert_eq!(results.sectors_data_error, 1);
        assert!(results.failures.contains(CheckBits::SFLAG_DEL_DAM));
        assert!(results.failures.contains(CheckBits::SFLAG_DATA_ERR));
    }

    #[test]
    fn scan_flags_duplicate_sector_ids() {
        let t = track_bytes(0, 0, &[1, 1, 2], &[0x01, 0x01, 0x01]);
        let bytes = image_with_tracks(&[t]);
        let mut cur = Cursor::new(bytes);
        let results = scan(&mut cur, &ScanOptions::default());
        assert!(results.failures.contains(CheckBits::DUPE_SID));
    }

    #[test]
    fn scan_flags_sequence_regression() {
        let t0 = track_bytes(1, 0, &[1], &[0x01]);
        let t1 = track_bytes(0, 0, &[1], &[0x01]);
        let bytes = image_with_tracks(&[t0, t1]);
        let mut cur = Cursor::new(bytes);
        let results = scan(&mut cur, &ScanOptions::default());
        assert!(results.failures.contains(CheckBits::SEQ_CYL_DEC));
    }

    #[test]
    fn scan_allows_head_wrap_at_next_cylinder() {
        let t0 = track_bytes(0, 0, &[1], &[0x01]);
        let t1 = track_bytes(0, 1, &[1], &[0x01]);
        let t2 = track_bytes(1, 0, &[1], &[0x01]);
        let bytes = image_with_tracks(&[t0, t1, t2]);
        let mut cur = Cursor::new(bytes);
        let results = scan(&mut cur, &ScanOptions::default());
        assert!(!results.failures.contains(CheckBits::SEQ_HEAD_ORDER));
    }

    #[test]
    fn scan_flags_cross_side_cylinder_mismatch() {
        let t0 = track_bytes(0, 0, &[1], &[0x01]);
        let t1 = track_bytes(0, 1, &[1], &[0x01]);
        let t2 = track_bytes(1, 0, &[1], &[0x01]);
        let bytes = image_with_tracks(&[t0, t1, t2]);
        let mut cur = Cursor::new(bytes);
        let results = scan(&mut cur, &ScanOptions::default());
        assert!(results.failures.contains(CheckBits::DIFF_MAX_CYL));
        assert_eq!(results.max_cyl_side0, Some(1));
        assert_eq!(results.max_cyl_side1, Some(0));
    }

    #[test]
    fn scan_detects_interleave_from_first_multi_sector_track() {
        let t = track_bytes(0, 0, &[1, 5, 2, 6, 3, 7, 4, 8], &[0x01; 8]);
        let bytes = image_with_tracks(&[t]);
        let mut cur = Cursor::new(bytes);
        let results = scan(&mut cur, &ScanOptions::default());
        assert_eq!(results.detected_interleave, Some(2));
    }

    #[test]
    fn scan_fatal_constraint_skips_remaining_track_checks() {
        // A track that violates CON_CYL *and* has a data error; with CON_CYL
        // marked fatal, the data-error check for this track must not run.
        let t = track_bytes(5, 0, &[1], &[0x05]);
        let bytes = image_with_tracks(&[t]);
        let mut cur = Cursor::new(bytes);
        let opts = ScanOptions {
            error_mask: CheckBits::CON_CYL,
            max_allowed_cyl: Some(0),
            ..Default::default()
        };
        let results = scan(&mut cur, &opts);
        assert!(results.failures.contains(CheckBits::CON_CYL));
        assert!(!results.failures.contains(CheckBits::SFLAG_DATA_ERR));
    }

    #[test]
    fn scan_header_failure_is_reported_and_stops() {
        let bytes = b"NOT AN IMD FILE".to_vec();
        let mut cur = Cursor::new(bytes);
        let results = scan(&mut cur, &ScanOptions::default());
        assert!(results.failures.contains(CheckBits::HEADER));
        assert_eq!(results.track_count, 0);
    }
}
