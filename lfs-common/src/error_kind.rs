//! Machine-readable error kinds for transfer operations
//!
//! These strings are what a front end reports to clients next to the
//! human-readable message, so clients can branch on the failure class
//! (e.g. retry the missing chunk on `chunk_not_found`).

use std::fmt;

/// Underlying filesystem failure
pub const ERROR_KIND_IO_ERROR: &str = "io_error";
/// File does not exist
pub const ERROR_KIND_NOT_FOUND: &str = "not_found";
/// Bad file name or chunk descriptor
pub const ERROR_KIND_INVALID: &str = "invalid";
/// Range or resume offset outside the file
pub const ERROR_KIND_INVALID_RANGE: &str = "invalid_range";
/// Merged file did not match the declared checksum
pub const ERROR_KIND_INTEGRITY: &str = "integrity";
/// A chunk was missing during merge
pub const ERROR_KIND_CHUNK_NOT_FOUND: &str = "chunk_not_found";
/// The request was cancelled by the caller
pub const ERROR_KIND_CANCELLED: &str = "cancelled";
/// The transfer exceeded its time limit
pub const ERROR_KIND_TIMEOUT: &str = "timeout";
/// Another operation on the same file is running
pub const ERROR_KIND_CONFLICT: &str = "conflict";
/// The service is shutting down
pub const ERROR_KIND_SHUTTING_DOWN: &str = "shutting_down";

/// Typed view over the error kind strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IoError,
    NotFound,
    Invalid,
    InvalidRange,
    Integrity,
    ChunkNotFound,
    Cancelled,
    Timeout,
    Conflict,
    ShuttingDown,
}

impl ErrorKind {
    /// Convert to the string representation reported to clients
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IoError => ERROR_KIND_IO_ERROR,
            Self::NotFound => ERROR_KIND_NOT_FOUND,
            Self::Invalid => ERROR_KIND_INVALID,
            Self::InvalidRange => ERROR_KIND_INVALID_RANGE,
            Self::Integrity => ERROR_KIND_INTEGRITY,
            Self::ChunkNotFound => ERROR_KIND_CHUNK_NOT_FOUND,
            Self::Cancelled => ERROR_KIND_CANCELLED,
            Self::Timeout => ERROR_KIND_TIMEOUT,
            Self::Conflict => ERROR_KIND_CONFLICT,
            Self::ShuttingDown => ERROR_KIND_SHUTTING_DOWN,
        }
    }

    /// Parse from string (for client-side handling)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ERROR_KIND_IO_ERROR => Some(Self::IoError),
            ERROR_KIND_NOT_FOUND => Some(Self::NotFound),
            ERROR_KIND_INVALID => Some(Self::Invalid),
            ERROR_KIND_INVALID_RANGE => Some(Self::InvalidRange),
            ERROR_KIND_INTEGRITY => Some(Self::Integrity),
            ERROR_KIND_CHUNK_NOT_FOUND => Some(Self::ChunkNotFound),
            ERROR_KIND_CANCELLED => Some(Self::Cancelled),
            ERROR_KIND_TIMEOUT => Some(Self::Timeout),
            ERROR_KIND_CONFLICT => Some(Self::Conflict),
            ERROR_KIND_SHUTTING_DOWN => Some(Self::ShuttingDown),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}
