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

//! Track codec: parse and emit one track record, in three read variants
//! (full load, header-only, header+flags) and two write variants (IMD-framed,
//! raw binary dump).

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{binrw, BinRead};
use bitflags::bitflags;
use log::trace;

use crate::codec::{self, MAX_SECTORS_PER_TRACK};
use crate::error::ImdError;
use crate::interleave::{self, INTERLEAVE_AS_READ, INTERLEAVE_BEST_GUESS};
use crate::sector_policy::{self, SectorWriteOptions};

bitflags! {
    /// High-nibble bits of the on-disk `head` byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HFlags: u8 {
        const CMAP_PRES = 0x80;
        const HMAP_PRES = 0x40;
    }
}

/// The 5-byte fixed track header. Only ever built from a peeked `mode` byte
/// plus a binrw-parsed [`RawTrackHeaderRest`]; never itself read or written
/// through binrw.
#[derive(Debug, Clone, Copy)]
struct RawTrackHeader {
    mode: u8,
    cyl: u8,
    head_hflag: u8,
    num_sectors: u8,
    sector_size_code: u8,
}

/// The four bytes that follow the already-consumed `mode` byte; split out so
/// callers can peek `mode` first to distinguish a clean end-of-input from a
/// genuine parse failure.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy)]
struct RawTrackHeaderRest {
    cyl: u8,
    head_hflag: u8,
    num_sectors: u8,
    sector_size_code: u8,
}

impl RawTrackHeader {
    fn head(&self) -> u8 {
        self.head_hflag & 0x0F
    }

    fn hflag(&self) -> u8 {
        self.head_hflag & 0xF0
    }

    fn has_cmap(&self) -> bool {
        HFlags::from_bits_retain(self.hflag()).contains(HFlags::CMAP_PRES)
    }

    fn has_hmap(&self) -> bool {
        HFlags::from_bits_retain(self.hflag()).contains(HFlags::HMAP_PRES)
    }

    fn sector_size(&self) -> Option<usize> {
        codec::sector_size_for_code(self.sector_size_code)
    }

    fn validate(&self) -> Result<(), ImdError> {
        if self.mode >= 6 {
            return Err(ImdError::ReadError(format!("invalid track mode {}", self.mode)));
        }
        if self.head() > 1 {
            return Err(ImdError::ReadError(format!("invalid head {}", self.head())));
        }
        if self.sector_size_code >= 7 {
            return Err(ImdError::ReadError(format!(
                "invalid sector size code {}",
                self.sector_size_code
            )));
        }
        if self.num_sectors as usize > MAX_SECTORS_PER_TRACK {
            return Err(ImdError::ReadError("too many sectors in track".to_string()));
        }
        Ok(())
    }
}

/// One track's metadata, per-sector maps, status flags, and (if `loaded`)
/// data buffer.
#[derive(Debug, Clone)]
pub struct Track {
    pub mode: u8,
    pub cyl: u8,
    pub head: u8,
    pub hflag: u8,
    pub num_sectors: u16,
    pub sector_size_code: u8,
    /// Logical sector ID at physical position `i`.
    pub smap: Vec<u8>,
    /// Logical cylinder at physical position `i`. Empty when the cylinder
    /// map was absent on a header-only read; defaulted to `cyl` on full load.
    pub cmap: Vec<u8>,
    /// Logical head at physical position `i`. Same absent/defaulted rule as `cmap`.
    pub hmap: Vec<u8>,
    /// The on-disk Sector Data Record type for physical position `i`. Empty
    /// unless read via `load_track` or `read_track_header_and_flags`.
    pub sflag: Vec<u8>,
    /// `num_sectors * sector_size` bytes, sector `i` at offset `i * sector_size`.
    /// Empty unless `loaded`.
    pub data: Vec<u8>,
    pub loaded: bool,
}

impl Track {
    pub fn sector_size(&self) -> usize {
        codec::sector_size_for_code(self.sector_size_code).expect("sector_size_code was validated on read")
    }

    /// The data bytes for physical position `i`.
    pub fn sector_data(&self, i: usize) -> &[u8] {
        let sz = self.sector_size();
        &self.data[i * sz..(i + 1) * sz]
    }

    /// Find the physical position holding logical sector id `sector_id`.
    pub fn physical_index_of(&self, sector_id: u8) -> Option<usize> {
        self.smap.iter().position(|&id| id == sector_id)
    }
}

struct TrackPrefix {
    header: RawTrackHeader,
    smap: Vec<u8>,
    cmap: Vec<u8>,
    hmap: Vec<u8>,
}

/// Read the fixed header and the present maps. Returns `Ok(None)` if the
/// stream is at a clean end-of-input before the first header byte.
/// Any later error is fatal; the stream position is best-effort restored to
/// `track_start`.
fn read_track_prefix<R: Read + Seek>(reader: &mut R) -> Result<Option<TrackPrefix>, ImdError> {
    let track_start = reader.stream_position().unwrap_or(0);

    let mode = match codec::read_byte_opt(reader)? {
        None => return Ok(None),
        Some(b) => b,
    };

    let result: Result<TrackPrefix, ImdError> = (|| {
        let rest = RawTrackHeaderRest::read_le(reader)?;
        let header = RawTrackHeader {
            mode,
            cyl: rest.cyl,
            head_hflag: rest.head_hflag,
            num_sectors: rest.num_sectors,
            sector_size_code: rest.sector_size_code,
        };
        header.validate()?;

        let n = header.num_sectors as usize;
        let mut smap = vec![0u8; n];
        codec::read_exact(reader, &mut smap)?;

        let mut cmap = Vec::new();
        if header.has_cmap() {
            cmap = vec![0u8; n];
            codec::read_exact(reader, &mut cmap)?;
        }

        let mut hmap = Vec::new();
        if header.has_hmap() {
            hmap = vec![0u8; n];
            codec::read_exact(reader, &mut hmap)?;
        }

        trace!(
            "read_track_prefix: c={} h={} nsec={} cmap={} hmap={}",
            header.cyl,
            header.head(),
            n,
            header.has_cmap(),
            header.has_hmap()
        );

        Ok(TrackPrefix { header, smap, cmap, hmap })
    })();

    match result {
        Ok(prefix) => Ok(Some(prefix)),
        Err(e) => {
            let _ = reader.seek(SeekFrom::Start(track_start));
            Err(e)
        }
    }
}

/// Skip `count` bytes of sector data, tolerating unseekable streams.
fn skip_bytes<R: Read + Seek>(reader: &mut R, count: usize) -> Result<(), ImdError> {
    if count == 0 {
        return Ok(());
    }
    if let Ok(pre) = reader.stream_position() {
        match reader.seek(SeekFrom::Current(count as i64)) {
            Ok(post) if post == pre + count as u64 => return Ok(()),
            Ok(_) => {
                return Err(ImdError::ReadError(
                    "seek past end of stream while skipping sector data".to_string(),
                ))
            }
            Err(_) => { /* fall through to read-and-discard fallback */ }
        }
    }
    let mut buf = [0u8; 4096];
    let mut remaining = count;
    while remaining > 0 {
        let chunk = remaining.min(buf.len());
        codec::read_exact(reader, &mut buf[..chunk])?;
        remaining -= chunk;
    }
    Ok(())
}

/// The on-disk body length for a Sector Data Record, validating the flag
/// byte itself.
fn record_body_len(flag: u8, sector_size: usize) -> Result<usize, ImdError> {
    match flag {
        0x00 => Ok(0),
        f if codec::is_compressed(f) => Ok(1),
        f if codec::has_data(f) => Ok(sector_size),
        f => Err(ImdError::ReadError(format!("unknown sector record type {:#04x}", f))),
    }
}

/// Read header, maps, and every sector's data, expanding compressed sectors
/// and filling unavailable sectors with `fill_byte`. Returns `Ok(None)` at a
/// clean end-of-input before the track.
pub fn load_track<R: Read + Seek>(reader: &mut R, fill_byte: u8) -> Result<Option<Track>, ImdError> {
    let track_start = reader.stream_position().unwrap_or(0);
    let prefix = match read_track_prefix(reader)? {
        None => return Ok(None),
        Some(p) => p,
    };

    let result: Result<Track, ImdError> = (|| {
        let n = prefix.header.num_sectors as usize;
        let sector_size = prefix
            .header
            .sector_size()
            .ok_or_else(|| ImdError::ReadError("invalid sector size code".to_string()))?;

        let mut sflag = vec![0u8; n];
        let mut data = vec![0u8; n * sector_size];

        for i in 0..n {
            let flag = codec::read_byte_opt(reader)?
                .ok_or_else(|| ImdError::ReadError("unexpected end of input reading sector flag".to_string()))?;
            record_body_len(flag, sector_size)?;
            sflag[i] = flag;

            let dst = &mut data[i * sector_size..(i + 1) * sector_size];
            if flag == 0x00 {
                dst.fill(fill_byte);
            } else if codec::is_compressed(flag) {
                let byte = codec::read_byte_opt(reader)?
                    .ok_or_else(|| ImdError::ReadError("unexpected end of input reading fill byte".to_string()))?;
                dst.fill(byte);
            } else {
                codec::read_exact(reader, dst)?;
            }
        }

        let cmap = if prefix.cmap.is_empty() {
            vec![prefix.header.cyl; n]
        } else {
            prefix.cmap
        };
        let hmap = if prefix.hmap.is_empty() {
            vec![prefix.header.head(); n]
        } else {
            prefix.hmap
        };

        Ok(Track {
            mode: prefix.header.mode,
            cyl: prefix.header.cyl,
            head: prefix.header.head(),
            hflag: prefix.header.hflag(),
            num_sectors: n as u16,
            sector_size_code: prefix.header.sector_size_code,
            smap: prefix.smap,
            cmap,
            hmap,
            sflag,
            data,
            loaded: true,
        })
    })();

    match result {
        Ok(t) => Ok(Some(t)),
        Err(e) => {
            let _ = reader.seek(SeekFrom::Start(track_start));
            Err(e)
        }
    }
}

/// Read header and maps only, skipping over the sector data records without
/// expanding them. Does not synthesize default `cmap`/`hmap` values.
pub fn read_track_header<R: Read + Seek>(reader: &mut R) -> Result<Option<Track>, ImdError> {
    let track_start = reader.stream_position().unwrap_or(0);
    let prefix = match read_track_prefix(reader)? {
        None => return Ok(None),
        Some(p) => p,
    };

    let result: Result<Track, ImdError> = (|| {
        let n = prefix.header.num_sectors as usize;
        let sector_size = prefix
            .header
            .sector_size()
            .ok_or_else(|| ImdError::ReadError("invalid sector size code".to_string()))?;

        for _ in 0..n {
            let flag = codec::read_byte_opt(reader)?
                .ok_or_else(|| ImdError::ReadError("unexpected end of input reading sector flag".to_string()))?;
            let body_len = record_body_len(flag, sector_size)?;
            skip_bytes(reader, body_len)?;
        }

        Ok(Track {
            mode: prefix.header.mode,
            cyl: prefix.header.cyl,
            head: prefix.header.head(),
            hflag: prefix.header.hflag(),
            num_sectors: n as u16,
            sector_size_code: prefix.header.sector_size_code,
            smap: prefix.smap,
            cmap: prefix.cmap,
            hmap: prefix.hmap,
            sflag: Vec::new(),
            data: Vec::new(),
            loaded: false,
        })
    })();

    match result {
        Ok(t) => Ok(Some(t)),
        Err(e) => {
            let _ = reader.seek(SeekFrom::Start(track_start));
            Err(e)
        }
    }
}

/// Read header, maps, and every sector's flag byte, skipping only the data
/// body.
pub fn read_track_header_and_flags<R: Read + Seek>(reader: &mut R) -> Result<Option<Track>, ImdError> {
    let track_start = reader.stream_position().unwrap_or(0);
    let prefix = match read_track_prefix(reader)? {
        None => return Ok(None),
        Some(p) => p,
    };

    let result: Result<Track, ImdError> = (|| {
        let n = prefix.header.num_sectors as usize;
        let sector_size = prefix
            .header
            .sector_size()
            .ok_or_else(|| ImdError::ReadError("invalid sector size code".to_string()))?;

        let mut sflag = vec![0u8; n];
        for i in 0..n {
            let flag = codec::read_byte_opt(reader)?
                .ok_or_else(|| ImdError::ReadError("unexpected end of input reading sector flag".to_string()))?;
            let body_len = record_body_len(flag, sector_size)?;
            sflag[i] = flag;
            skip_bytes(reader, body_len)?;
        }

        Ok(Track {
            mode: prefix.header.mode,
            cyl: prefix.header.cyl,
            head: prefix.header.head(),
            hflag: prefix.header.hflag(),
            num_sectors: n as u16,
            sector_size_code: prefix.header.sector_size_code,
            smap: prefix.smap,
            cmap: prefix.cmap,
            hmap: prefix.hmap,
            sflag,
            data: Vec::new(),
            loaded: false,
        })
    })();

    match result {
        Ok(t) => Ok(Some(t)),
        Err(e) => {
            let _ = reader.seek(SeekFrom::Start(track_start));
            Err(e)
        }
    }
}

/// Per-track write options.
#[derive(Debug, Clone, Copy)]
pub struct TrackWriteOptions {
    /// `INTERLEAVE_AS_READ`, `INTERLEAVE_BEST_GUESS`, or a positive factor.
    pub interleave: u8,
    /// Translation applied to the track's `mode` before writing; identity by default.
    pub mode_map: [u8; 6],
    pub sector: SectorWriteOptions,
}

impl Default for TrackWriteOptions {
    fn default() -> Self {
        TrackWriteOptions {
            interleave: INTERLEAVE_AS_READ,
            mode_map: [0, 1, 2, 3, 4, 5],
            sector: SectorWriteOptions::default(),
        }
    }
}

/// Apply this track's working-copy interleave transform per `opts.interleave`.
fn prepare_working_copy(track: &Track, interleave: u8) -> Result<Track, ImdError> {
    let mut working = track.clone();
    if interleave == INTERLEAVE_AS_READ {
        return Ok(working);
    }
    let factor = if interleave == INTERLEAVE_BEST_GUESS {
        interleave::detect_interleave(&working.smap)
    } else {
        interleave
    };
    interleave::apply_interleave(&mut working, factor)?;
    Ok(working)
}

/// Emit one track record in IMD format.
pub fn write_track_imd<W: Write>(writer: &mut W, track: &Track, opts: &TrackWriteOptions) -> Result<(), ImdError> {
    if !track.loaded {
        return Err(ImdError::InvalidArg("cannot write an unloaded track".to_string()));
    }

    let working = prepare_working_copy(track, opts.interleave)?;
    let n = working.num_sectors as usize;
    let sector_size = working.sector_size();
    let out_mode = opts.mode_map[working.mode as usize];
    let head_hflag = (working.head & 0x0F) | (working.hflag & 0xF0);

    codec::write_exact(
        writer,
        &[out_mode, working.cyl, head_hflag, working.num_sectors as u8, working.sector_size_code],
    )?;
    codec::write_exact(writer, &working.smap)?;
    if working.hflag & 0x80 != 0 {
        codec::write_exact(writer, &working.cmap)?;
    }
    if working.hflag & 0x40 != 0 {
        codec::write_exact(writer, &working.hmap)?;
    }

    for i in 0..n {
        let data = working.sector_data(i);
        let out_flag = sector_policy::decide_sflag(working.sflag[i], data, &opts.sector);
        codec::write_exact(writer, &[out_flag])?;
        if out_flag == 0x00 {
            // no body
        } else if codec::is_compressed(out_flag) {
            codec::write_exact(writer, &data[..1])?;
        } else {
            codec::write_exact(writer, data)?;
        }
    }

    Ok(())
}

/// Emit only the raw (possibly interleaved) sector data bytes, with no IMD
/// framing.
pub fn write_track_bin<W: Write>(writer: &mut W, track: &Track, interleave: u8) -> Result<(), ImdError> {
    if track.num_sectors > 0 && !track.loaded {
        return Err(ImdError::InvalidArg(
            "track has sectors but no data to dump".to_string(),
        ));
    }
    let working = prepare_working_copy(track, interleave)?;
    codec::write_exact(writer, &working.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn build_uniform_track_bytes() -> Vec<u8> {
        // mode=5 (MFM 250 kbps), cyl=0, head=0 (no maps), 8 sectors of
        // 512 bytes (code 2), smap 1..=8, each compressed to 0xE5.
        let mut bytes = vec![5, 0, 0, 8, 2];
        bytes.extend(1..=8u8);
        for _ in 0..8 {
            bytes.push(0x02);
            bytes.push(0xE5);
        }
        bytes
    }

    #[test]
    fn load_track_expands_compressed_sectors_and_fills_defaults() {
        let bytes = build_uniform_track_bytes();
        let mut cur = Cursor::new(bytes);
        let track = load_track(&mut cur, 0xE5).unwrap().unwrap();
        assert_eq!(track.num_sectors, 8);
        assert_eq!(track.data.len(), 8 * 512);
        assert!(track.data.iter().all(|&b| b == 0xE5));
        assert_eq!(track.sflag, vec![0x02; 8]);
        assert_eq!(track.cmap, vec![0; 8]);
        assert_eq!(track.hmap, vec![0; 8]);
    }

    #[test]
    fn load_track_returns_none_at_clean_eof() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        assert!(load_track(&mut cur, 0xE5).unwrap().is_none());
    }

    #[test]
    fn load_track_fills_unavailable_sector_with_fill_byte() {
        let mut bytes = vec![3, 0, 0, 1, 2];
        bytes.push(1);
        bytes.push(0x00); // unavailable
        let mut cur = Cursor::new(bytes);
        let track = load_track(&mut cur, 0x5A).unwrap().unwrap();
        assert!(track.data.iter().all(|&b| b == 0x5A));
        assert_eq!(track.sflag[0], 0x00);
    }

    #[test]
    fn load_track_rejects_invalid_mode() {
        let mut bytes = vec![6, 0, 0, 1, 2];
        bytes.push(1);
        bytes.push(0x00);
        let mut cur = Cursor::new(bytes);
        assert!(load_track(&mut cur, 0xE5).is_err());
    }

    #[test]
    fn load_track_rejects_unknown_sector_record_type() {
        let mut bytes = vec![3, 0, 0, 1, 2];
        bytes.push(1);
        bytes.push(0x09); // not a valid sflag
        let mut cur = Cursor::new(bytes);
        assert!(load_track(&mut cur, 0xE5).is_err());
    }

    #[test]
    fn read_track_header_skips_data_and_leaves_maps_unsynthesized() {
        let bytes = build_uniform_track_bytes();
        let mut cur = Cursor::new(bytes);
        let track = read_track_header(&mut cur).unwrap().unwrap();
        assert!(!track.loaded);
        assert!(track.data.is_empty());
        assert!(track.sflag.is_empty());
        assert!(track.cmap.is_empty()); // no CMAP bit set, and not synthesized
        assert_eq!(track.smap, (1..=8).collect::<Vec<u8>>());
    }

    #[test]
    fn read_track_header_and_flags_captures_sflags_without_data() {
        let bytes = build_uniform_track_bytes();
        let mut cur = Cursor::new(bytes);
        let track = read_track_header_and_flags(&mut cur).unwrap().unwrap();
        assert!(!track.loaded);
        assert!(track.data.is_empty());
        assert_eq!(track.sflag, vec![0x02; 8]);
    }

    #[test]
    fn write_track_imd_round_trips_uniform_compressed_track() {
        let bytes = build_uniform_track_bytes();
        let mut cur = Cursor::new(bytes.clone());
        let track = load_track(&mut cur, 0xE5).unwrap().unwrap();

        let mut out = Vec::new();
        let opts = TrackWriteOptions {
            sector: SectorWriteOptions {
                compression_mode: sector_policy::CompressionMode::ForceCompress,
                ..Default::default()
            },
            ..Default::default()
        };
        write_track_imd(&mut out, &track, &opts).unwrap();
        assert_eq!(out, bytes);
        assert_eq!(out.len(), 5 + 8 + 8 * 2);
    }

    #[test]
    fn write_track_imd_as_read_decompresses_only_the_edited_sector() {
        let bytes = build_uniform_track_bytes();
        let mut cur = Cursor::new(bytes);
        let mut track = load_track(&mut cur, 0xE5).unwrap().unwrap();

        // Overwrite sector-ID 3's first byte to break uniformity.
        let idx = track.physical_index_of(3).unwrap();
        let sz = track.sector_size();
        track.data[idx * sz] = 0x00;

        let mut out = Vec::new();
        write_track_imd(&mut out, &track, &TrackWriteOptions::default()).unwrap();

        // As-read only decompresses the sector whose edit broke uniformity;
        // the other seven are still uniform 0xE5 and stay compressed.
        let mut cur2 = Cursor::new(out);
        let rewritten = load_track(&mut cur2, 0xE5).unwrap().unwrap();
        assert_eq!(rewritten.sflag[idx], 0x01);
        for (i, &flag) in rewritten.sflag.iter().enumerate() {
            if i != idx {
                assert_eq!(flag, 0x02);
            }
        }
    }

    #[test]
    fn write_track_imd_force_decompress_normalizes_every_sector() {
        let bytes = build_uniform_track_bytes();
        let mut cur = Cursor::new(bytes);
        let mut track = load_track(&mut cur, 0xE5).unwrap().unwrap();

        // Overwrite sector-ID 3's first byte to break uniformity.
        let idx = track.physical_index_of(3).unwrap();
        let sz = track.sector_size();
        track.data[idx * sz] = 0x00;

        let opts = TrackWriteOptions {
            sector: SectorWriteOptions {
                compression_mode: sector_policy::CompressionMode::ForceDecompress,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut out = Vec::new();
        write_track_imd(&mut out, &track, &opts).unwrap();

        // Every sector becomes normal (odd-code) under a forced decompress.
        let mut cur2 = Cursor::new(out);
        let rewritten = load_track(&mut cur2, 0xE5).unwrap().unwrap();
        assert!(rewritten.sflag.iter().all(|&f| f == 0x01));
    }

    #[test]
    fn write_track_imd_rejects_unloaded_track() {
        let bytes = build_uniform_track_bytes();
        let mut cur = Cursor::new(bytes);
        let track = read_track_header(&mut cur).unwrap().unwrap();
        let mut out = Vec::new();
        assert!(write_track_imd(&mut out, &track, &TrackWriteOptions::default()).is_err());
    }

    #[test]
    fn write_track_bin_emits_raw_sector_bytes_only() {
        let bytes = build_uniform_track_bytes();
        let mut cur = Cursor::new(bytes);
        let track = load_track(&mut cur, 0xE5).unwrap().unwrap();
        let mut out = Vec::new();
        write_track_bin(&mut out, &track, INTERLEAVE_AS_READ).unwrap();
        assert_eq!(out.len(), 8 * 512);
        assert!(out.iter().all(|&b| b == 0xE5));
    }
}
