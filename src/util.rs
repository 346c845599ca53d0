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

//! Utilities: path basename, hex-digit parsing, and the leveled
//! reporting sink used by tool front-ends. The two
//! `AtomicBool` flags here are deliberately the only global state in the crate.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use strum::Display;

/// The suffix of `path` after the last `/` or `\`; the whole string if
/// neither separator appears.
pub fn basename(path: &str) -> &str {
    let slash = path.rfind('/');
    let backslash = path.rfind('\\');
    match slash.into_iter().chain(backslash).max() {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Parse one hex digit (`'0'..='9'`, `'a'..='f'`, `'A'..='F'`) to 0..=15, or
/// `-1` if `c` isn't a hex digit.
pub fn hex_digit(c: char) -> i32 {
    match c.to_digit(16) {
        Some(d) => d as i32,
        None => -1,
    }
}

/// Reporting levels, least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

static QUIET: AtomicBool = AtomicBool::new(false);
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Configure the process-wide reporting sink. Intended to be called once at
/// program entry; later calls simply replace the prior settings.
pub fn configure(quiet: bool, verbose: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
    VERBOSE.store(verbose, Ordering::Relaxed);
}

/// Emit `message` at `level`, subject to the quiet/verbose configuration:
/// `Error` is always emitted, `Warning` is suppressed when quiet, and
/// `Info`/`Debug` require verbose.
pub fn report(level: Level, message: &str) {
    let quiet = QUIET.load(Ordering::Relaxed);
    let verbose = VERBOSE.load(Ordering::Relaxed);

    match level {
        Level::Error => error!("[{}] {}", level, message),
        Level::Warning => {
            if !quiet {
                warn!("[{}] {}", level, message);
            }
        }
        Level::Info => {
            if verbose {
                info!("[{}] {}", level, message);
            }
        }
        Level::Debug => {
            if verbose {
                debug!("[{}] {}", level, message);
            }
        }
    }
}

/// Emit `message` at [`Level::Error`], then terminate the process.
pub fn report_fatal(message: &str) -> ! {
    error!("{}", message);
    std::process::exit(1);
}
