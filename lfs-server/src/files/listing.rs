//! Directory listing with non-blocking checksums

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::checksum::{ChecksumEngine, Fingerprint};
use crate::transfers::TransferError;

/// A file in the storage root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Lowercase hex MD5, when already computed for the current contents
    pub checksum: Option<String>,
}

impl StoredFile {
    #[must_use]
    pub fn new(name: String, fingerprint: Fingerprint, checksum: Option<String>) -> Self {
        Self {
            name,
            size: fingerprint.size,
            modified: DateTime::<Utc>::from(fingerprint.modified),
            checksum,
        }
    }
}

/// List regular files directly under `root`, sorted by name
///
/// Never waits for a checksum: files without a valid cached value are
/// listed with `checksum: None` and hashed in the background. Directories,
/// including the chunk staging area, are skipped. The root is created if it
/// does not exist.
pub async fn list_files(
    root: &Path,
    engine: &ChecksumEngine,
) -> Result<Vec<StoredFile>, TransferError> {
    fs::create_dir_all(root).await?;

    let mut entries = fs::read_dir(root).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        // Follows symlinks, so a link to a regular file is listed
        let metadata = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            debug!(path = %entry.path().display(), "skipping non UTF-8 file name");
            continue;
        };

        let fingerprint = Fingerprint::from_metadata(&metadata)?;
        let checksum = engine.query_for_listing(&entry.path(), fingerprint);
        files.push(StoredFile::new(name, fingerprint, checksum));
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
