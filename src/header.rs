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

//! Header and comment I/O: the textual `IMD <version>: ...` line and the
//! 0x1A-terminated comment block that follows it.

use chrono::Local;
use regex::Regex;
use std::io::{Read, Write};
use std::sync::OnceLock;

use crate::codec::{self, COMMENT_EOF_MARKER, MAX_HEADER_LINE};
use crate::error::ImdError;

/// `IMD <version>: DD/MM/YYYY HH:MM:SS`, version captured non-greedily up to
/// the first `:`.
const HEADER_REGEX: &str = r"^IMD (?P<version>.{1,31}?): (?P<day>\d{2})/(?P<month>\d{2})/(?P<year>\d{4}) (?P<hour>\d{2}):(?P<minute>\d{2}):(?P<second>\d{2})";

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(HEADER_REGEX).expect("header regex is valid"))
}

/// Parsed header line. Date/time fields are zeroed (but the version string is
/// kept, if recoverable) when any field is missing or out of range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInfo {
    pub raw_line: String,
    pub version: String,
    pub day: u8,
    pub month: u8,
    pub year: u16,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Default for HeaderInfo {
    fn default() -> Self {
        HeaderInfo {
            raw_line: String::new(),
            version: "Unknown".to_string(),
            day: 0,
            month: 0,
            year: 0,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

fn field_in_range(month: u32, day: u32, hour: u32, minute: u32, second: u32) -> bool {
    (1..=12).contains(&month) && (1..=31).contains(&day) && hour <= 23 && minute <= 59 && second <= 59
}

/// Read the raw header line (capped at [`MAX_HEADER_LINE`] bytes), terminated
/// by CR and/or LF, then parse it. Missing `IMD ` prefix or a read fault fails
/// with [`ImdError::ReadError`]; an unparseable date/time zeroes those fields
/// but still returns `Ok`.
pub fn read_header<R: Read>(reader: &mut R) -> Result<HeaderInfo, ImdError> {
    let mut raw = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                if byte[0] != b'\r' {
                    raw.push(byte[0]);
                }
            }
            Err(e) => return Err(ImdError::from(e)),
        }
        if raw.len() >= MAX_HEADER_LINE {
            break;
        }
    }

    let raw_line = String::from_utf8_lossy(&raw).into_owned();
    if !raw_line.starts_with("IMD ") {
        return Err(ImdError::ReadError("missing IMD header prefix".to_string()));
    }

    let mut info = HeaderInfo {
        raw_line: raw_line.clone(),
        ..HeaderInfo::default()
    };

    match header_regex().captures(&raw_line) {
        Some(caps) => {
            info.version = caps["version"].to_string();
            let day: u32 = caps["day"].parse().unwrap_or(0);
            let month: u32 = caps["month"].parse().unwrap_or(0);
            let year: u32 = caps["year"].parse().unwrap_or(0);
            let hour: u32 = caps["hour"].parse().unwrap_or(0);
            let minute: u32 = caps["minute"].parse().unwrap_or(0);
            let second: u32 = caps["second"].parse().unwrap_or(0);

            if field_in_range(month, day, hour, minute, second) {
                info.day = day as u8;
                info.month = month as u8;
                info.year = year as u16;
                info.hour = hour as u8;
                info.minute = minute as u8;
                info.second = second as u8;
            }
            // else: date/time fields stay zeroed, version is retained above.
        }
        None => {
            // Version wasn't recoverable either; fall back to "Unknown".
            info.version = "Unknown".to_string();
        }
    }

    Ok(info)
}

/// Read the comment block: raw bytes up to (but excluding) the first
/// [`COMMENT_EOF_MARKER`]. An empty comment is legal. End-of-input before the
/// terminator fails with [`ImdError::ReadError`].
pub fn read_comment<R: Read>(reader: &mut R) -> Result<Vec<u8>, ImdError> {
    let mut comment = Vec::new();
    loop {
        match codec::read_byte_opt(reader)? {
            Some(COMMENT_EOF_MARKER) => return Ok(comment),
            Some(b) => comment.push(b),
            None => {
                return Err(ImdError::ReadError(
                    "end of input before comment terminator".to_string(),
                ))
            }
        }
    }
}

/// Write the header line using the current local wall-clock time.
pub fn write_header<W: Write>(writer: &mut W, version: &str) -> Result<(), ImdError> {
    let now = Local::now();
    let line = format!(
        "IMD {}: {}\r\n",
        version,
        now.format("%d/%m/%Y %H:%M:%S")
    );
    codec::write_exact(writer, line.as_bytes())
}

/// Write the comment bytes verbatim followed by the terminator.
pub fn write_comment<W: Write>(writer: &mut W, comment: &[u8]) -> Result<(), ImdError> {
    codec::write_exact(writer, comment)?;
    codec::write_exact(writer, &[COMMENT_EOF_MARKER])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_header_parses_well_formed_line() {
        let mut cur = Cursor::new(b"IMD 1.19: 01/01/2025 00:00:00\r\n".to_vec());
        let info = read_header(&mut cur).unwrap();
        assert_eq!(info.version, "1.19");
        assert_eq!(info.day, 1);
        assert_eq!(info.month, 1);
        assert_eq!(info.year, 2025);
        assert_eq!(info.hour, 0);
    }

    #[test]
    fn read_header_zeroes_out_of_range_date_but_keeps_version() {
        let mut cur = Cursor::new(b"IMD 1.19: 40/13/2025 25:99:99\r\n".to_vec());
        let info = read_header(&mut cur).unwrap();
        assert_eq!(info.version, "1.19");
        assert_eq!(info.day, 0);
        assert_eq!(info.month, 0);
        assert_eq!(info.hour, 0);
    }

    #[test]
    fn read_header_missing_prefix_is_read_error() {
        let mut cur = Cursor::new(b"XXX header\r\n".to_vec());
        assert!(read_header(&mut cur).is_err());
    }

    #[test]
    fn read_comment_allows_empty_comment() {
        let mut cur = Cursor::new(vec![0x1A]);
        let comment = read_comment(&mut cur).unwrap();
        assert!(comment.is_empty());
    }

    #[test]
    fn read_comment_reads_bytes_up_to_terminator() {
        let mut cur = Cursor::new(b"hello\x1Atrailing".to_vec());
        let comment = read_comment(&mut cur).unwrap();
        assert_eq!(comment, b"hello");
    }

    #[test]
    fn read_comment_without_terminator_is_read_error() {
        let mut cur = Cursor::new(b"no terminator".to_vec());
        assert!(read_comment(&mut cur).is_err());
    }

    #[test]
    fn write_header_round_trips_version() {
        let mut out = Vec::new();
        write_header(&mut out, "1.19").unwrap();
        let mut cur = Cursor::new(out);
        let info = read_header(&mut cur).unwrap();
        assert_eq!(info.version, "1.19");
    }
}
