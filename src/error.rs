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

//! Error taxonomy for the codec layer and the image layer.
//!
//! The codec-level [`ImdError`] carries the stable numeric codes from the
//! on-disk format's external interface; the image-level [`ImageError`] wraps
//! it and adds the additional failure modes of a stateful, file-backed image.

use thiserror::Error;

/// Errors produced by the track codec, sector-data-record policy,
/// and interleave engine. Numeric codes match the stable external
/// interface documented for this format.
#[derive(Debug, Error)]
pub enum ImdError {
    #[error("sector not found")]
    SectorNotFound,
    #[error("track not found")]
    TrackNotFound,
    #[error("read error: {0}")]
    ReadError(String),
    #[error("write error: {0}")]
    WriteError(String),
    #[error("seek error")]
    SeekError,
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("data size mismatch")]
    SizeMismatch,
    #[error("sector unavailable")]
    Unavailable,
    #[error("allocation failure")]
    Alloc,
}

impl ImdError {
    /// The stable numeric code used at the API boundary.
    pub fn code(&self) -> i32 {
        match self {
            ImdError::SectorNotFound => -10,
            ImdError::TrackNotFound => -11,
            ImdError::ReadError(_) => -12,
            ImdError::WriteError(_) => -13,
            ImdError::SeekError => -14,
            ImdError::InvalidArg(_) => -15,
            ImdError::BufferTooSmall => -16,
            ImdError::SizeMismatch => -17,
            ImdError::Unavailable => -18,
            ImdError::Alloc => -19,
        }
    }
}

impl From<std::io::Error> for ImdError {
    fn from(err: std::io::Error) -> Self {
        ImdError::ReadError(err.to_string())
    }
}

impl From<binrw::Error> for ImdError {
    fn from(err: binrw::Error) -> Self {
        ImdError::ReadError(err.to_string())
    }
}

/// Errors produced by the in-memory image: open/close, geometry, write
/// protection, and sector/track read-write.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Codec(#[from] ImdError),
    #[error("write-protected")]
    WriteProtected,
    #[error("geometry violation")]
    Geometry,
    #[error("not found")]
    NotFound,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("invalid sector size")]
    SectorSize,
    #[error("buffer too small")]
    BufferSize,
    #[error("sector unavailable")]
    Unavailable,
    #[error("allocation failure")]
    Alloc,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("image already open")]
    AlreadyOpen,
    #[error("cannot open image")]
    CannotOpen,
}

impl From<std::io::Error> for ImageError {
    fn from(err: std::io::Error) -> Self {
        ImageError::Io(err.to_string())
    }
}
