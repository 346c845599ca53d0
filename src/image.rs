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

//! The in-memory image: owns the header, comment, and ordered track
//! vector; supports open/close, geometry, write protection, sector and track
//! read-write, formatting, and whole-file rewrite with truncation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::warn;

use crate::codec::{self, DEFAULT_FILL_BYTE, NUM_MODES};
use crate::error::ImageError;
use crate::header::{self, HeaderInfo};
use crate::sector_policy::{CompressionMode, SectorWriteOptions};
use crate::track::{self, Track, TrackWriteOptions};

/// 0xFF in any geometry field disables that constraint.
pub const GEOMETRY_UNCHECKED: u8 = 0xFF;

/// Abstraction over the backing storage for an image. The host filesystem
/// primitives (open, seek, truncate) are named only by this interface;
/// `std::fs::File` is the concrete collaborator callers normally reach for.
pub trait ImageBackend: Read + Write + Seek {
    fn set_len(&mut self, size: u64) -> std::io::Result<()>;
}

impl ImageBackend for File {
    fn set_len(&mut self, size: u64) -> std::io::Result<()> {
        File::set_len(self, size)
    }
}

impl ImageBackend for std::io::Cursor<Vec<u8>> {
    fn set_len(&mut self, size: u64) -> std::io::Result<()> {
        self.get_mut().resize(size as usize, 0);
        Ok(())
    }
}

/// Soft geometry limits; `GEOMETRY_UNCHECKED` disables the corresponding check.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub max_cyl: u8,
    pub max_head: u8,
    pub max_sectors_per_track: u8,
}

impl Geometry {
    fn unchecked() -> Self {
        Geometry {
            max_cyl: GEOMETRY_UNCHECKED,
            max_head: GEOMETRY_UNCHECKED,
            max_sectors_per_track: GEOMETRY_UNCHECKED,
        }
    }
}

/// A fully loaded ImageDisk image: header, comment, and an ordered,
/// (cyl, head)-sorted sequence of tracks.
pub struct Image<B: ImageBackend> {
    backend: B,
    read_only: bool,
    write_protect: bool,
    header: HeaderInfo,
    comment: Vec<u8>,
    tracks: Vec<Track>,
    geometry: Geometry,
}

impl Image<File> {
    /// Open a backing `.imd` file and load every track.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Image<File>, ImageError> {
        let file = OpenOptions::new().read(true).write(!read_only).open(path)?;
        Image::from_backend(file, read_only)
    }
}

impl<B: ImageBackend> Image<B> {
    /// Parse header, comment, and tracks from an already-open backend.
    pub fn from_backend(mut backend: B, read_only: bool) -> Result<Image<B>, ImageError> {
        backend.seek(SeekFrom::Start(0))?;
        let header = header::read_header(&mut backend)?;
        let comment = header::read_comment(&mut backend)?;

        let mut tracks = Vec::with_capacity(80);
        loop {
            match track::load_track(&mut backend, DEFAULT_FILL_BYTE)? {
                None => break,
                Some(t) => tracks.push(t),
            }
        }

        Ok(Image {
            backend,
            read_only,
            write_protect: read_only,
            header,
            comment,
            tracks,
            geometry: Geometry::unchecked(),
        })
    }

    /// Consume and drop the image, closing the backend.
    pub fn close(self) {}

    /// Flush the backend without rewriting it. Callers that mutate an image
    /// already see every change persisted by `rewrite` as it happens; this is
    /// only a last-resort flush for whatever the backend buffers internally.
    fn best_effort_flush(&mut self) {
        if let Err(e) = self.backend.flush() {
            warn!("failed to flush image backend on drop: {}", e);
        }
    }

    pub fn version(&self) -> &str {
        &self.header.version
    }

    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn find_track(&self, cyl: u8, head: u8) -> Option<&Track> {
        self.track_index(cyl, head).map(|i| &self.tracks[i])
    }

    /// All tracks, in (cyl, head)-sorted order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn set_geometry(&mut self, max_cyl: u8, max_head: u8, max_sectors_per_track: u8) {
        self.geometry = Geometry {
            max_cyl,
            max_head,
            max_sectors_per_track,
        };
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// `set_write_protect(false)` fails if the backend was opened read-only.
    pub fn set_write_protect(&mut self, protect: bool) -> Result<(), ImageError> {
        if !protect && self.read_only {
            return Err(ImageError::WriteProtected);
        }
        self.write_protect = protect;
        Ok(())
    }

    pub fn write_protect(&self) -> bool {
        self.write_protect
    }

    fn track_index(&self, cyl: u8, head: u8) -> Option<usize> {
        self.tracks.binary_search_by(|t| (t.cyl, t.head).cmp(&(cyl, head))).ok()
    }

    fn insertion_index(&self, cyl: u8, head: u8) -> usize {
        self.tracks.partition_point(|t| (t.cyl, t.head) < (cyl, head))
    }

    fn check_write_allowed(&self) -> Result<(), ImageError> {
        if self.write_protect {
            return Err(ImageError::WriteProtected);
        }
        Ok(())
    }

    fn check_geometry(&self, cyl: u8, head: u8, num_sectors: Option<u8>) -> Result<(), ImageError> {
        let g = self.geometry;
        if g.max_cyl != GEOMETRY_UNCHECKED && cyl > g.max_cyl {
            return Err(ImageError::Geometry);
        }
        if g.max_head != GEOMETRY_UNCHECKED && head > g.max_head {
            return Err(ImageError::Geometry);
        }
        if let Some(n) = num_sectors {
            if g.max_sectors_per_track != GEOMETRY_UNCHECKED && n > g.max_sectors_per_track {
                return Err(ImageError::Geometry);
            }
        }
        Ok(())
    }

    /// Read a logical sector's data into `buf`.
    pub fn read_sector(&self, cyl: u8, head: u8, sector_id: u8, buf: &mut [u8]) -> Result<(), ImageError> {
        self.check_geometry(cyl, head, None)?;
        let idx = self.track_index(cyl, head).ok_or(ImageError::NotFound)?;
        let track = &self.tracks[idx];
        let phys = track.physical_index_of(sector_id).ok_or(ImageError::NotFound)?;
        if codec::is_unavailable(track.sflag[phys]) {
            return Err(ImageError::Unavailable);
        }
        let sz = track.sector_size();
        if buf.len() < sz {
            return Err(ImageError::BufferSize);
        }
        buf[..sz].copy_from_slice(track.sector_data(phys));
        Ok(())
    }

    /// Overwrite a logical sector's data, then persist by rewrite.
    pub fn write_sector(&mut self, cyl: u8, head: u8, sector_id: u8, data: &[u8]) -> Result<(), ImageError> {
        self.check_write_allowed()?;
        self.check_geometry(cyl, head, None)?;
        let idx = self.track_index(cyl, head).ok_or(ImageError::NotFound)?;

        let sz = self.tracks[idx].sector_size();
        if data.len() != sz {
            return Err(ImageError::SectorSize);
        }
        let phys = self.tracks[idx]
            .physical_index_of(sector_id)
            .ok_or(ImageError::NotFound)?;

        let old_sflag = self.tracks[idx].sflag[phys];
        {
            let track = &mut self.tracks[idx];
            let start = phys * sz;
            track.data[start..start + sz].copy_from_slice(data);
        }

        let old_compressed = codec::is_compressed(old_sflag);
        let new_uniform = codec::is_uniform(self.tracks[idx].sector_data(phys));

        if old_compressed && !new_uniform {
            let opts = TrackWriteOptions {
                sector: SectorWriteOptions {
                    compression_mode: CompressionMode::ForceDecompress,
                    ..Default::default()
                },
                ..Default::default()
            };
            self.rewrite(Some(idx), opts)?;
            let n = self.tracks[idx].num_sectors as usize;
            let sz2 = self.tracks[idx].sector_size();
            for i in 0..n {
                let data_i = self.tracks[idx].data[i * sz2..(i + 1) * sz2].to_vec();
                let flag = self.tracks[idx].sflag[i];
                self.tracks[idx].sflag[i] = crate::sector_policy::decide_sflag(flag, &data_i, &opts.sector);
            }
        } else {
            let opts = TrackWriteOptions::default();
            self.rewrite(Some(idx), opts)?;
            let sz2 = self.tracks[idx].sector_size();
            let data_i = self.tracks[idx].data[phys * sz2..(phys + 1) * sz2].to_vec();
            self.tracks[idx].sflag[phys] = crate::sector_policy::decide_sflag(old_sflag, &data_i, &opts.sector);
        }

        Ok(())
    }

    /// Lay out an entire track with caller-supplied maps, or defaults, then
    /// persist with forced compression.
    #[allow(clippy::too_many_arguments)]
    pub fn write_track(
        &mut self,
        cyl: u8,
        head: u8,
        mode: u8,
        num_sectors: u8,
        sector_size: usize,
        smap: Option<Vec<u8>>,
        cmap: Option<Vec<u8>>,
        hmap: Option<Vec<u8>>,
        fill_byte: u8,
    ) -> Result<(), ImageError> {
        self.check_write_allowed()?;
        self.check_geometry(cyl, head, Some(num_sectors))?;
        if mode as usize >= NUM_MODES {
            return Err(ImageError::InvalidArg(format!("invalid track mode {}", mode)));
        }
        let size_code = codec::code_for_sector_size(sector_size).ok_or(ImageError::SectorSize)?;

        let n = num_sectors as usize;
        let smap = smap.unwrap_or_else(|| (1..=num_sectors).collect());

        let mut hflag = 0u8;
        let cmap = match cmap {
            Some(m) => {
                hflag |= 0x80;
                m
            }
            None => vec![cyl; n],
        };
        let hmap_v = match hmap {
            Some(m) => {
                hflag |= 0x40;
                m
            }
            None => vec![head; n],
        };

        let new_track = Track {
            mode,
            cyl,
            head,
            hflag,
            num_sectors: num_sectors as u16,
            sector_size_code: size_code,
            smap,
            cmap,
            hmap: hmap_v,
            sflag: vec![0x01; n],
            data: vec![fill_byte; n * sector_size],
            loaded: true,
        };

        let idx = match self.track_index(cyl, head) {
            Some(existing) => {
                self.tracks[existing] = new_track;
                existing
            }
            None => {
                let pos = self.insertion_index(cyl, head);
                self.tracks.insert(pos, new_track);
                pos
            }
        };

        let opts = TrackWriteOptions {
            sector: SectorWriteOptions {
                compression_mode: CompressionMode::ForceCompress,
                ..Default::default()
            },
            ..Default::default()
        };
        self.rewrite(Some(idx), opts)?;

        let sz = self.tracks[idx].sector_size();
        for i in 0..n {
            let data_i = self.tracks[idx].data[i * sz..(i + 1) * sz].to_vec();
            let flag = self.tracks[idx].sflag[i];
            self.tracks[idx].sflag[i] = crate::sector_policy::decide_sflag(flag, &data_i, &opts.sector);
        }

        Ok(())
    }

    /// Generate an interleaved/skewed `smap` and lay out the track via
    /// `write_track`.
    #[allow(clippy::too_many_arguments)]
    pub fn format_track(
        &mut self,
        cyl: u8,
        head: u8,
        mode: u8,
        num_sectors: u8,
        sector_size: usize,
        first_sector_id: u8,
        interleave: u8,
        skew: u8,
        fill_byte: u8,
    ) -> Result<(), ImageError> {
        let smap = build_interleaved_smap(num_sectors as usize, first_sector_id, interleave, skew);
        self.write_track(cyl, head, mode, num_sectors, sector_size, Some(smap), None, None, fill_byte)
    }

    /// Seek to 0, write header+comment+every track, flush, and truncate to
    /// length. `override_idx`'s track uses
    /// `override_opts`; every other track uses a safe as-read default.
    fn rewrite(&mut self, override_idx: Option<usize>, override_opts: TrackWriteOptions) -> Result<(), ImageError> {
        self.backend.seek(SeekFrom::Start(0))?;

        let version = if self.header.version.is_empty() || self.header.version == "Unknown" {
            "1.19"
        } else {
            self.header.version.as_str()
        };
        header::write_header(&mut self.backend, version)?;
        header::write_comment(&mut self.backend, &self.comment)?;

        for (idx, track) in self.tracks.iter().enumerate() {
            let opts = if Some(idx) == override_idx {
                override_opts
            } else {
                TrackWriteOptions::default()
            };
            track::write_track_imd(&mut self.backend, track, &opts)?;
        }

        self.backend.flush()?;
        let len = self.backend.stream_position()?;
        if let Err(e) = self.backend.set_len(len) {
            warn!("failed to truncate image after rewrite: {}", e);
        }
        Ok(())
    }
}

impl<B: ImageBackend> Drop for Image<B> {
    /// Best-effort close: flushes whatever the backend still buffers. Every
    /// mutating API already rewrites the whole image as it happens, so drop
    /// never triggers an implicit rewrite of its own.
    fn drop(&mut self) {
        self.best_effort_flush();
    }
}

/// Same algorithm as [`crate::interleave::apply_interleave`]'s placement
/// step, but generating a fresh map from scratch starting at `skew` instead
/// of reordering an existing one.
fn build_interleaved_smap(num_sectors: usize, first_sector_id: u8, interleave: u8, skew: u8) -> Vec<u8> {
    let n = num_sectors;
    if n == 0 {
        return Vec::new();
    }
    let mut smap = vec![0u8; n];
    let mut occupied = vec![false; n];
    let mut target = skew as usize % n;
    let step = interleave.max(1) as usize;

    for i in 0..n {
        while occupied[target] {
            target = (target + 1) % n;
        }
        occupied[target] = true;
        smap[target] = first_sector_id.wrapping_add(i as u8);
        target = (target + step) % n;
    }
    smap
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn empty_image_bytes() -> Vec<u8> {
        let mut bytes = b"IMD 1.19: 01/01/2025 00:00:00\r\n".to_vec();
        bytes.push(0x1A);
        bytes
    }

    fn uniform_track_bytes() -> Vec<u8> {
        let mut bytes = vec![5, 0, 0, 8, 2];
        bytes.extend(1..=8u8);
        for _ in 0..8 {
            bytes.push(0x02);
            bytes.push(0xE5);
        }
        bytes
    }

    fn open_cursor(bytes: Vec<u8>, read_only: bool) -> Image<Cursor<Vec<u8>>> {
        Image::from_backend(Cursor::new(bytes), read_only).unwrap()
    }

    #[test]
    fn open_empty_image_has_no_tracks() {
        let image = open_cursor(empty_image_bytes(), false);
        assert_eq!(image.track_count(), 0);
        assert_eq!(image.version(), "1.19");
        assert!(image.comment().is_empty());
    }

    #[test]
    fn open_read_only_implies_write_protected() {
        let image = open_cursor(empty_image_bytes(), true);
        assert!(image.write_protect());
    }

    #[test]
    fn set_write_protect_false_fails_on_read_only_backend() {
        let mut image = open_cursor(empty_image_bytes(), true);
        assert!(image.set_write_protect(false).is_err());
    }

    #[test]
    fn read_sector_returns_sector_bytes() {
        let mut bytes = empty_image_bytes();
        bytes.truncate(bytes.len() - 1); // drop EOF marker, append a track
        bytes.push(0x1A);
        bytes.extend(uniform_track_bytes());
        let image = open_cursor(bytes, false);

        let mut buf = [0u8; 512];
        image.read_sector(0, 0, 3, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xE5));
    }

    #[test]
    fn read_sector_unavailable_flag_fails() {
        let mut bytes = empty_image_bytes();
        bytes.truncate(bytes.len() - 1);
        bytes.push(0x1A);
        let mut track_bytes = vec![3, 0, 0, 1, 2];
        track_bytes.push(1);
        track_bytes.push(0x00);
        bytes.extend(track_bytes);
        let image = open_cursor(bytes, false);

        let mut buf = [0u8; 512];
        let err = image.read_sector(0, 0, 1, &mut buf).unwrap_err();
        assert!(matches!(err, ImageError::Unavailable));
    }

    #[test]
    fn write_sector_on_protected_image_fails() {
        let mut image = open_cursor(empty_image_bytes(), true);
        let data = [0u8; 512];
        assert!(image.write_sector(0, 0, 1, &data).is_err());
    }

    #[test]
    fn write_sector_edit_breaks_uniformity_decompresses_track() {
        let mut bytes = empty_image_bytes();
        bytes.truncate(bytes.len() - 1);
        bytes.push(0x1A);
        bytes.extend(uniform_track_bytes());
        let mut image = open_cursor(bytes, false);

        let mut new_data = vec![0xE5u8; 512];
        new_data[0] = 0x00;
        image.write_sector(0, 0, 3, &new_data).unwrap();

        let track = image.find_track(0, 0).unwrap();
        assert!(track.sflag.iter().all(|&f| f == 0x01));
    }

    #[test]
    fn write_track_then_read_back_round_trips() {
        let mut image = open_cursor(empty_image_bytes(), false);
        image
            .write_track(0, 0, 5, 4, 512, None, None, None, 0xE5)
            .unwrap();

        assert_eq!(image.track_count(), 1);
        let track = image.find_track(0, 0).unwrap();
        assert_eq!(track.sflag, vec![0x02; 4]);

        let mut buf = [0u8; 512];
        image.read_sector(0, 0, 2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xE5));
    }

    #[test]
    fn format_track_applies_interleave_to_generated_map() {
        let mut image = open_cursor(empty_image_bytes(), false);
        image
            .format_track(0, 0, 5, 8, 512, 1, 2, 0, 0xE5)
            .unwrap();
        let track = image.find_track(0, 0).unwrap();
        assert_eq!(track.smap, vec![1, 5, 2, 6, 3, 7, 4, 8]);
    }

    #[test]
    fn geometry_violation_is_rejected() {
        let mut image = open_cursor(empty_image_bytes(), false);
        image.set_geometry(0, GEOMETRY_UNCHECKED, GEOMETRY_UNCHECKED);
        let err = image
            .write_track(1, 0, 5, 4, 512, None, None, None, 0xE5)
            .unwrap_err();
        assert!(matches!(err, ImageError::Geometry));
    }

    #[test]
    fn write_track_rejects_out_of_range_mode_instead_of_panicking() {
        let mut image = open_cursor(empty_image_bytes(), false);
        let err = image
            .write_track(0, 0, 6, 4, 512, None, None, None, 0xE5)
            .unwrap_err();
        assert!(matches!(err, ImageError::InvalidArg(_)));
        assert_eq!(image.track_count(), 0);
    }
}
