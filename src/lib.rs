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

//! A library for reading, modifying, and writing ImageDisk (`.imd`) floppy
//! disk images.
//!
//! The crate is layered bottom-up: [`codec`] and [`header`] implement the
//! on-disk wire format primitives, [`track`] parses and emits one track
//! record, [`sector_policy`] and [`interleave`] drive the write-side
//! transformations a track needs, and [`image`] ties all of it together into
//! a mutable, file-backed image. [`scanner`] re-uses the track codec's
//! header-only read path to stream-check an image without allocating sector
//! data. [`util`] holds the handful of small, shared helpers.
//!
//! Command-line front-ends, a standalone consistency-checker's reporting
//! surface, and host logging configuration are not part of this crate.

pub mod codec;
pub mod error;
pub mod header;
pub mod image;
pub mod interleave;
pub mod scanner;
pub mod sector_policy;
pub mod track;
pub mod util;

pub use crate::error::{ImageError, ImdError};
pub use crate::image::{Geometry, Image, ImageBackend, GEOMETRY_UNCHECKED};
pub use crate::interleave::{INTERLEAVE_AS_READ, INTERLEAVE_BEST_GUESS};
pub use crate::scanner::{scan, CheckBits, ScanOptions, ScanResults};
pub use crate::sector_policy::{CompressionMode, SectorWriteOptions};
pub use crate::track::{Track, TrackWriteOptions};
