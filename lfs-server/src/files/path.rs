//! Stored file name resolution

use std::path::{Path, PathBuf};

use lfs_common::validators::validate_file_name;

use crate::transfers::TransferError;

/// Map a client-supplied file name to its path directly under `root`
///
/// The name must be a single path component, so the result can never leave
/// the storage root or land in the chunk staging area.
pub fn resolve_stored_file(root: &Path, name: &str) -> Result<PathBuf, TransferError> {
    validate_file_name(name).map_err(|reason| TransferError::invalid_name(name, reason))?;
    Ok(root.join(name))
}
