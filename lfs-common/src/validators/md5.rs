//! MD5 checksum validation
//!
//! Validates the whole-file checksum declared with the last chunk of a
//! chunked upload.

/// Expected length for MD5 hash strings (32 hex characters)
pub const MD5_HEX_LENGTH: usize = 32;

/// Validation error for MD5 hash strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Md5Error {
    /// Hash string has wrong length (must be exactly 32 characters)
    InvalidLength,
    /// Hash string contains non-hexadecimal characters
    InvalidCharacters,
}

/// Validate an MD5 hash string
///
/// Checks:
/// - Exactly 32 characters long
/// - Only hexadecimal characters, either case
///
/// Comparison against computed hashes is case-insensitive, so uppercase
/// input is accepted here.
///
/// # Errors
///
/// Returns an `Md5Error` variant describing the validation failure.
pub fn validate_md5(hash: &str) -> Result<(), Md5Error> {
    if hash.len() != MD5_HEX_LENGTH {
        return Err(Md5Error::InvalidLength);
    }

    if !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(Md5Error::InvalidCharacters);
    }

    Ok(())
}
