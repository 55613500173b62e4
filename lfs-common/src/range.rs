//! Byte range parsing
//!
//! Handles the single-range `bytes=<start>-<end>` form used both for resumed
//! uploads (`bytes=<start>-`) and for partial downloads. Suffix ranges
//! (`bytes=-500`) and multi-range lists are not supported.

use std::fmt;

use thiserror::Error;

const RANGE_PREFIX: &str = "bytes=";

/// Errors from parsing or resolving a byte range
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// The range text is not of the form `bytes=<start>-[<end>]`
    #[error("malformed range: {0}")]
    Malformed(String),
    /// The range does not overlap the file
    #[error("range {start}-{end} not satisfiable for size {size}")]
    Unsatisfiable { start: u64, end: u64, size: u64 },
}

/// A requested range before it is resolved against a file size
///
/// `end` is inclusive; `None` means "to the end of the file".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    #[must_use]
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Resolve against `size`, returning the inclusive `(start, end)` window
    ///
    /// An end beyond the file is clamped to `size - 1`. A start beyond the
    /// file, a start after the end, or any range on an empty file is
    /// unsatisfiable.
    pub fn resolve(&self, size: u64) -> Result<(u64, u64), RangeError> {
        let requested_end = self.end.unwrap_or(u64::MAX);
        let unsatisfiable = RangeError::Unsatisfiable {
            start: self.start,
            end: requested_end,
            size,
        };
        if size == 0 || self.start >= size || self.start > requested_end {
            return Err(unsatisfiable);
        }
        Ok((self.start, requested_end.min(size - 1)))
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{RANGE_PREFIX}{}-{end}", self.start),
            None => write!(f, "{RANGE_PREFIX}{}-", self.start),
        }
    }
}

/// Parse `bytes=<start>-[<end>]`
pub fn parse_range(text: &str) -> Result<ByteRange, RangeError> {
    let malformed = || RangeError::Malformed(text.to_string());

    let body = text.trim().strip_prefix(RANGE_PREFIX).ok_or_else(malformed)?;
    let (start, end) = body.split_once('-').ok_or_else(malformed)?;

    let start = start.trim();
    if start.is_empty() {
        return Err(malformed());
    }
    let start: u64 = start.parse().map_err(|_| malformed())?;

    let end = end.trim();
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().map_err(|_| malformed())?)
    };

    Ok(ByteRange { start, end })
}

/// Parse a resume indicator and return its starting offset
///
/// Only the start matters for uploads, so `bytes=100-` and `bytes=100-199`
/// both resume at 100.
pub fn parse_resume_offset(text: &str) -> Result<u64, RangeError> {
    parse_range(text).map(|range| range.start)
}
