//! File service facade
//!
//! [`FileService`] owns the storage root, the governor, the checksum engine
//! and the chunk store, and is the single entry point a front end calls.
//! Construct one per storage root and share it behind an `Arc`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lfs_common::COPY_BUFFER_SIZE;
use lfs_common::range::parse_range;

use crate::checksum::{
    ChecksumEngine, ChecksumError, ChecksumProgress, ChecksumStatus, Fingerprint, JobOutcome,
};
use crate::chunks::{ChunkDescriptor, ChunkStore, MergeReport};
use crate::constants::{
    BATCH_CONCURRENCY, DEFAULT_MAX_CHECKSUM_JOBS, DEFAULT_MAX_DOWNLOADS, DEFAULT_MAX_IDLE_BUFFERS,
    DEFAULT_MAX_UPLOADS, DEFAULT_UPLOAD_TIMEOUT_SECS,
};
use crate::files::{self, StoredFile, resolve_stored_file};
use crate::governor::{BufferPool, Governor, GovernorLimits, PermitKind};
use crate::transfers::{
    DownloadOutcome, ResponseSink, TransferError, UploadReceipt, Window, stream_window,
    write_at_offset,
};

/// Service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub root: PathBuf,
    pub max_uploads: usize,
    pub max_downloads: usize,
    pub max_checksum_jobs: usize,
    pub buffer_size: usize,
    pub max_idle_buffers: usize,
    /// Wall-clock bound for whole-file uploads; `None` disables it
    pub upload_timeout: Option<Duration>,
}

impl ServiceConfig {
    /// Default limits for a storage root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_uploads: DEFAULT_MAX_UPLOADS,
            max_downloads: DEFAULT_MAX_DOWNLOADS,
            max_checksum_jobs: DEFAULT_MAX_CHECKSUM_JOBS,
            buffer_size: COPY_BUFFER_SIZE,
            max_idle_buffers: DEFAULT_MAX_IDLE_BUFFERS,
            upload_timeout: Some(Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS)),
        }
    }
}

/// Result of storing one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub file_name: String,
    pub chunk_index: u32,
    pub bytes_received: u64,
    /// Present when this chunk completed the upload and the merge verified
    pub merged: Option<MergeReport>,
}

/// Aggregate result of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl BatchReport {
    fn from_results(results: Vec<Result<(), String>>) -> Self {
        let mut report = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result {
                Ok(()) => report.succeeded += 1,
                Err(message) => {
                    report.failed += 1;
                    report.errors.push(message);
                }
            }
        }
        report
    }
}

/// Resumable, chunked file transfer service over one storage root
#[derive(Debug)]
pub struct FileService {
    config: ServiceConfig,
    governor: Arc<Governor>,
    engine: ChecksumEngine,
    chunks: ChunkStore,
}

impl FileService {
    pub fn new(config: ServiceConfig) -> Self {
        let governor = Arc::new(Governor::new(
            GovernorLimits {
                uploads: config.max_uploads,
                downloads: config.max_downloads,
                checksum_jobs: config.max_checksum_jobs,
            },
            BufferPool::new(config.buffer_size, config.max_idle_buffers),
        ));
        let engine = ChecksumEngine::new(governor.clone());
        let chunks = ChunkStore::new(&config.root, engine.clone());
        Self {
            config,
            governor,
            engine,
            chunks,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    #[must_use]
    pub fn engine(&self) -> &ChecksumEngine {
        &self.engine
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Store `source` as `name`, optionally resuming at `resume_offset`
    ///
    /// The whole operation, including waiting for an upload slot, is bounded
    /// by the configured upload timeout. Cancellation or failure leaves the
    /// partially written file in place.
    pub async fn save_file<R>(
        &self,
        name: &str,
        source: &mut R,
        resume_offset: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, TransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = resolve_stored_file(self.root(), name)?;
        let offset = resume_offset.unwrap_or(0);

        let upload = self.receive_file(&path, source, offset, cancel);
        let result = match self.config.upload_timeout {
            Some(limit) => match tokio::time::timeout(limit, upload).await {
                Ok(result) => result,
                Err(_) => Err(TransferError::Timeout(limit)),
            },
            None => upload.await,
        };
        // Contents may have changed even on failure
        self.engine.invalidate(&path);

        let written = match result {
            Ok(written) => written,
            Err(e) => {
                warn!(name = %name, offset, error = %e, "upload failed");
                return Err(e);
            }
        };

        let receipt = UploadReceipt {
            name: name.to_string(),
            offset,
            bytes_written: written,
            size: offset + written,
        };
        info!(name = %name, offset, bytes = written, size = receipt.size, "file uploaded");
        Ok(receipt)
    }

    async fn receive_file<R>(
        &self,
        path: &Path,
        source: &mut R,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        fs::create_dir_all(self.root()).await?;
        let _slot = self
            .governor
            .acquire_cancellable(PermitKind::Upload, cancel)
            .await?
            .ok_or(TransferError::Cancelled)?;
        let mut buffer = self.governor.get_buffer();
        write_at_offset(path, source, offset, &mut buffer, Some(cancel)).await
    }

    /// Store one chunk; the declared last chunk triggers merge and verification
    ///
    /// Receiving honours `cancel`; the merge runs to completion once started.
    pub async fn save_chunk<R>(
        &self,
        descriptor: &ChunkDescriptor,
        source: &mut R,
        cancel: &CancellationToken,
    ) -> Result<ChunkReceipt, TransferError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        descriptor.validate()?;
        fs::create_dir_all(self.root()).await?;

        let _slot = self
            .governor
            .acquire_cancellable(PermitKind::Upload, cancel)
            .await?
            .ok_or(TransferError::Cancelled)?;
        let mut buffer = self.governor.get_buffer();

        let bytes_received = self
            .chunks
            .receive(descriptor, source, &mut buffer, Some(cancel))
            .await?;

        let merged = if descriptor.is_last() {
            Some(self.chunks.merge(descriptor, &mut buffer).await?)
        } else {
            None
        };

        Ok(ChunkReceipt {
            file_name: descriptor.file_name.clone(),
            chunk_index: descriptor.chunk_index,
            bytes_received,
            merged,
        })
    }

    /// Chunk indices already received for an unfinished chunked upload
    pub async fn chunk_status(&self, name: &str) -> Result<Vec<u32>, TransferError> {
        resolve_stored_file(self.root(), name)?;
        self.chunks.persisted_indices(name).await
    }

    /// Discard all staged chunks of an unfinished chunked upload
    pub async fn abort_chunks(&self, name: &str) -> Result<bool, TransferError> {
        resolve_stored_file(self.root(), name)?;
        let removed = self.chunks.abort(name).await?;
        if removed {
            info!(name = %name, "chunked upload aborted");
        }
        Ok(removed)
    }

    /// Upload several files, at most [`BATCH_CONCURRENCY`] at a time
    pub async fn save_files<R>(
        &self,
        batch: Vec<(String, R)>,
        cancel: &CancellationToken,
    ) -> BatchReport
    where
        R: AsyncRead + Unpin,
    {
        let results = stream::iter(batch)
            .map(|(name, mut source)| async move {
                self.save_file(&name, &mut source, None, cancel)
                    .await
                    .map(|_| ())
                    .map_err(|e| format!("{name}: {e}"))
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        BatchReport::from_results(results)
    }

    // =========================================================================
    // Downloads
    // =========================================================================

    /// Stream `name` into `sink`, whole or limited to a `bytes=<start>-<end>` range
    pub async fn download_file<S>(
        &self,
        name: &str,
        sink: &mut S,
        range: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, TransferError>
    where
        S: ResponseSink,
    {
        let window = match range {
            Some(text) => Window::Range(parse_range(text)?),
            None => Window::Full,
        };
        self.download(name, sink, window, cancel).await
    }

    /// Stream bytes `[index * size, index * size + size)` of `name`, clamped to the file
    pub async fn download_chunk<S>(
        &self,
        name: &str,
        sink: &mut S,
        chunk_index: u64,
        chunk_size: u64,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, TransferError>
    where
        S: ResponseSink,
    {
        let window = Window::Chunk {
            index: chunk_index,
            size: chunk_size,
        };
        self.download(name, sink, window, cancel).await
    }

    async fn download<S>(
        &self,
        name: &str,
        sink: &mut S,
        window: Window,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, TransferError>
    where
        S: ResponseSink,
    {
        let path = resolve_stored_file(self.root(), name)?;
        let Some(_slot) = self
            .governor
            .acquire_cancellable(PermitKind::Download, cancel)
            .await?
        else {
            debug!(name = %name, "download cancelled while waiting for a slot");
            return Ok(DownloadOutcome::Aborted { bytes: 0 });
        };
        let mut buffer = self.governor.get_buffer();

        let outcome = stream_window(&path, name, sink, window, &mut buffer, Some(cancel)).await?;
        match outcome {
            DownloadOutcome::Completed { bytes } => {
                debug!(name = %name, bytes, "download complete");
            }
            DownloadOutcome::Aborted { bytes } => {
                info!(name = %name, bytes, "client disconnected during download");
            }
        }
        Ok(outcome)
    }

    /// Check that every name exists as a stored file
    pub async fn check_files(&self, names: &[String]) -> BatchReport {
        let results = stream::iter(names)
            .map(|name| async move {
                self.check_exists(name)
                    .await
                    .map_err(|e| format!("{name}: {e}"))
            })
            .buffer_unordered(BATCH_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        BatchReport::from_results(results)
    }

    /// `Ok` if `name` is a stored file
    pub async fn check_exists(&self, name: &str) -> Result<(), TransferError> {
        let path = resolve_stored_file(self.root(), name)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(()),
            Ok(_) => Err(TransferError::NotFound(name.to_string())),
            Err(e) => Err(TransferError::from_open(name, e)),
        }
    }

    // =========================================================================
    // Listing and checksums
    // =========================================================================

    /// All stored files; checksums only where already computed
    pub async fn list_files(&self) -> Result<Vec<StoredFile>, TransferError> {
        files::list_files(self.root(), &self.engine).await
    }

    /// Metadata for one file, computing its checksum if needed
    ///
    /// The checksum is left empty when another computation is in progress
    /// or hashing failed.
    pub async fn file_info(&self, name: &str) -> Result<StoredFile, TransferError> {
        let path = resolve_stored_file(self.root(), name)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| TransferError::from_open(name, e))?;
        if !metadata.is_file() {
            return Err(TransferError::NotFound(name.to_string()));
        }
        let fingerprint = Fingerprint::from_metadata(&metadata)?;

        let checksum = match self.engine.query(&path).await {
            Ok(ChecksumStatus::Ready { checksum }) => Some(checksum),
            Ok(ChecksumStatus::InProgress { .. }) => None,
            Err(e) => {
                debug!(name = %name, error = %e, "checksum unavailable for file info");
                None
            }
        };
        Ok(StoredFile::new(name.to_string(), fingerprint, checksum))
    }

    /// Checksum of `name`: ready value, in-progress fraction, or error
    pub async fn get_checksum(&self, name: &str) -> Result<ChecksumStatus, TransferError> {
        let path = resolve_stored_file(self.root(), name)?;
        self.engine
            .query(&path)
            .await
            .map_err(|e| checksum_error(name, e))
    }

    /// Progress of the checksum computation for `name`
    pub fn checksum_progress(&self, name: &str) -> Result<ChecksumProgress, TransferError> {
        let path = resolve_stored_file(self.root(), name)?;
        Ok(self.engine.progress(&path))
    }

    /// Wait for the background checksum of `name`; `None` if none is running
    pub async fn wait_for_checksum(&self, name: &str) -> Result<Option<JobOutcome>, TransferError> {
        let path = resolve_stored_file(self.root(), name)?;
        Ok(self.engine.wait_for(&path).await)
    }

    /// Cancel the background checksum of `name`
    pub fn cancel_checksum(&self, name: &str) -> Result<bool, TransferError> {
        let path = resolve_stored_file(self.root(), name)?;
        Ok(self.engine.cancel(&path))
    }

    /// Refuse new work, cancel checksum jobs and wait for them to stop
    pub async fn shutdown(&self) {
        self.governor.close();
        self.engine.shutdown().await;
        info!("file service stopped");
    }
}

fn checksum_error(name: &str, e: ChecksumError) -> TransferError {
    match e {
        ChecksumError::Io(io) if io.kind() == io::ErrorKind::NotFound => {
            TransferError::NotFound(name.to_string())
        }
        other => other.into(),
    }
}
