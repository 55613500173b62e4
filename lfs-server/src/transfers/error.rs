//! Transfer error type

use std::io;
use std::time::Duration;

use thiserror::Error;

use lfs_common::ErrorKind;
use lfs_common::range::RangeError;
use lfs_common::validators::FileNameError;

use super::copy::CopyError;
use crate::checksum::ChecksumError;
use crate::governor::GovernorClosed;

/// Error type for every service operation
///
/// [`kind`](TransferError::kind) gives the machine-readable class a front
/// end reports to clients next to the message.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid file name {name:?}: {reason}")]
    InvalidName { name: String, reason: FileNameError },

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error(transparent)]
    InvalidRange(#[from] RangeError),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("short write after {0} bytes")]
    ShortWrite(u64),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("upload timed out after {0:?}")]
    Timeout(Duration),

    #[error("chunk not found: {0}")]
    ChunkNotFound(u32),

    #[error("MD5 checksum mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("merge already in progress for {0}")]
    MergeInProgress(String),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error("service is shutting down")]
    ShuttingDown,
}

impl TransferError {
    /// Machine-readable error kind
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName { .. } | Self::InvalidChunk(_) => ErrorKind::Invalid,
            Self::InvalidRange(_) => ErrorKind::InvalidRange,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Io(e) if e.kind() == io::ErrorKind::NotFound => ErrorKind::NotFound,
            Self::Io(_) | Self::ShortWrite(_) => ErrorKind::IoError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ChunkNotFound(_) => ErrorKind::ChunkNotFound,
            Self::IntegrityMismatch { .. } => ErrorKind::Integrity,
            Self::MergeInProgress(_) => ErrorKind::Conflict,
            Self::Checksum(e) => match e {
                ChecksumError::Io(err) if err.kind() == io::ErrorKind::NotFound => {
                    ErrorKind::NotFound
                }
                ChecksumError::Io(_) | ChecksumError::Failed(_) => ErrorKind::IoError,
                ChecksumError::Cancelled => ErrorKind::Cancelled,
                ChecksumError::ShuttingDown => ErrorKind::ShuttingDown,
            },
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    pub(crate) fn invalid_name(name: &str, reason: FileNameError) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason,
        }
    }

    /// Map an open/stat failure on a stored file, turning "missing" into `NotFound`
    pub(crate) fn from_open(name: &str, e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            Self::NotFound(name.to_string())
        } else {
            Self::Io(e)
        }
    }
}

impl From<CopyError> for TransferError {
    fn from(e: CopyError) -> Self {
        match e {
            CopyError::Cancelled { .. } => Self::Cancelled,
            CopyError::ShortWrite { copied } => Self::ShortWrite(copied),
            CopyError::Read { source, .. } | CopyError::Write { source, .. } => Self::Io(source),
            CopyError::SourceEnded { copied, expected } => Self::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("source ended after {copied} of {expected} bytes"),
            )),
        }
    }
}

impl From<GovernorClosed> for TransferError {
    fn from(_: GovernorClosed) -> Self {
        Self::ShuttingDown
    }
}
