//! Stored file name validation
//!
//! Every stored file lives directly under the storage root, so a name is a
//! single path component.

use thiserror::Error;

use crate::STAGING_DIR_NAME;

/// Maximum length for file names in bytes (common filesystem limit)
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Validation error for file names
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileNameError {
    #[error("name is empty")]
    Empty,
    #[error("name is longer than 255 bytes")]
    TooLong,
    #[error("name contains a path separator")]
    ContainsPathSeparator,
    #[error("name is \".\" or \"..\"")]
    ContainsParentRef,
    /// Null bytes or control characters
    #[error("name contains control characters")]
    InvalidCharacters,
    /// Collides with the chunk staging directory
    #[error("name is reserved")]
    Reserved,
}

/// Validate a stored file name from a client
///
/// Checks:
/// - Not empty
/// - Does not exceed maximum length (255 bytes)
/// - No path separators (`/` or `\`)
/// - Not `.` or `..`
/// - No null bytes or control characters
/// - Not the chunk staging directory name
///
/// # Errors
///
/// Returns a `FileNameError` variant describing the validation failure.
pub fn validate_file_name(name: &str) -> Result<(), FileNameError> {
    if name.is_empty() {
        return Err(FileNameError::Empty);
    }

    if name.len() > MAX_FILE_NAME_LENGTH {
        return Err(FileNameError::TooLong);
    }

    if name == "." || name == ".." {
        return Err(FileNameError::ContainsParentRef);
    }

    for ch in name.chars() {
        if ch == '/' || ch == '\\' {
            return Err(FileNameError::ContainsPathSeparator);
        }
        if ch.is_control() {
            return Err(FileNameError::InvalidCharacters);
        }
    }

    if name == STAGING_DIR_NAME {
        return Err(FileNameError::Reserved);
    }

    Ok(())
}
