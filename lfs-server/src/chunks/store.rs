//! Chunk staging and merge
//!
//! Chunks for `name` live in `<root>/chunks/<name>/<index>.chunk`, so a chunk
//! is found by its index alone. Bytes arrive in a uniquely named `.part`
//! file and are renamed into place once complete; a half-received chunk is
//! never visible under its index.
//!
//! ## Merge
//!
//! Triggered by the declared last chunk:
//!
//! 1. Truncate-open the destination
//! 2. Append chunks `0..total` in ascending order; a missing index aborts
//!    with the destination left partially written
//! 3. Remove the staging directory
//! 4. Compute the checksum and compare with the declared MD5; on mismatch
//!    the destination is deleted

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lfs_common::STAGING_DIR_NAME;

use super::descriptor::ChunkDescriptor;
use crate::checksum::ChecksumEngine;
use crate::constants::{CHUNK_FILE_EXTENSION, CHUNK_PARTIAL_EXTENSION};
use crate::transfers::{TransferError, copy_with_cancel};

/// Result of a successful merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug)]
pub struct ChunkStore {
    root: PathBuf,
    staging: PathBuf,
    engine: ChecksumEngine,
    merging: Mutex<HashSet<String>>,
    next_part: AtomicU64,
}

impl ChunkStore {
    pub fn new(root: &Path, engine: ChecksumEngine) -> Self {
        Self {
            root: root.to_path_buf(),
            staging: root.join(STAGING_DIR_NAME),
            engine,
            merging: Mutex::new(HashSet::new()),
            next_part: AtomicU64::new(0),
        }
    }

    /// Staging directory for one file's chunks
    #[must_use]
    pub fn staging_dir(&self, file_name: &str) -> PathBuf {
        self.staging.join(file_name)
    }

    /// Deterministic location of chunk `index` of `file_name`
    #[must_use]
    pub fn chunk_path(&self, file_name: &str, index: u32) -> PathBuf {
        self.staging_dir(file_name)
            .join(format!("{index}.{CHUNK_FILE_EXTENSION}"))
    }

    /// Persist one chunk's bytes under its index
    ///
    /// Returns the number of bytes stored. A byte count different from the
    /// declared chunk size is logged, not rejected.
    pub async fn receive<R>(
        &self,
        descriptor: &ChunkDescriptor,
        source: &mut R,
        buffer: &mut [u8],
        cancel: Option<&CancellationToken>,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let dir = self.staging_dir(&descriptor.file_name);
        fs::create_dir_all(&dir).await?;

        let nonce = self.next_part.fetch_add(1, Ordering::Relaxed);
        let partial = dir.join(format!(
            "{}.{nonce}.{CHUNK_PARTIAL_EXTENSION}",
            descriptor.chunk_index
        ));

        let result = async {
            let mut file = File::create(&partial).await?;
            let written = copy_with_cancel(source, &mut file, buffer, None, cancel).await?;
            drop(file);
            fs::rename(&partial, self.chunk_path(&descriptor.file_name, descriptor.chunk_index))
                .await?;
            Ok::<_, TransferError>(written)
        }
        .await;

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if written != descriptor.chunk_size {
            warn!(
                name = %descriptor.file_name,
                index = descriptor.chunk_index,
                declared = descriptor.chunk_size,
                received = written,
                "chunk size differs from declared size"
            );
        }
        debug!(
            name = %descriptor.file_name,
            index = descriptor.chunk_index,
            bytes = written,
            "chunk stored"
        );
        Ok(written)
    }

    /// Indices already persisted for `file_name`, ascending
    pub async fn persisted_indices(&self, file_name: &str) -> Result<Vec<u32>, TransferError> {
        let mut entries = match fs::read_dir(self.staging_dir(file_name)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHUNK_FILE_EXTENSION) {
                continue;
            }
            if let Some(index) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    /// Delete all staged chunks for `file_name`
    ///
    /// Returns `false` if nothing was staged.
    pub async fn abort(&self, file_name: &str) -> Result<bool, TransferError> {
        match fs::remove_dir_all(self.staging_dir(file_name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Reassemble all chunks of `descriptor.file_name` and verify the result
    pub async fn merge(
        &self,
        descriptor: &ChunkDescriptor,
        buffer: &mut [u8],
    ) -> Result<MergeReport, TransferError> {
        let name = descriptor.file_name.as_str();
        let expected = descriptor.md5.as_deref().unwrap_or_default();
        let _guard = MergeGuard::acquire(&self.merging, name)?;

        let destination = self.root.join(name);
        self.engine.invalidate(&destination);

        let mut output = File::create(&destination).await?;
        for index in 0..descriptor.total_chunks {
            let mut chunk = match File::open(self.chunk_path(name, index)).await {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!(name = %name, index, "merge aborted, chunk missing");
                    return Err(TransferError::ChunkNotFound(index));
                }
                Err(e) => return Err(e.into()),
            };
            copy_with_cancel(&mut chunk, &mut output, buffer, None, None).await?;
        }
        output.flush().await?;
        let size = output.metadata().await?.len();
        drop(output);

        if let Err(e) = fs::remove_dir_all(self.staging_dir(name)).await {
            warn!(name = %name, error = %e, "failed to remove chunk staging directory");
        }

        let actual = self.engine.compute(&destination).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            self.engine.invalidate(&destination);
            fs::remove_file(&destination).await?;
            warn!(name = %name, expected = %expected, actual = %actual, "merged file failed integrity check");
            return Err(TransferError::IntegrityMismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        info!(name = %name, size, chunks = descriptor.total_chunks, "chunked upload merged");
        Ok(MergeReport {
            size,
            checksum: actual,
        })
    }
}

/// Marks a file name as merging; refuses a second concurrent merge
struct MergeGuard<'a> {
    merging: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> MergeGuard<'a> {
    fn acquire(merging: &'a Mutex<HashSet<String>>, name: &str) -> Result<Self, TransferError> {
        let mut set = merging.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(name.to_string()) {
            return Err(TransferError::MergeInProgress(name.to_string()));
        }
        Ok(Self {
            merging,
            name: name.to_string(),
        })
    }
}

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.merging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}
