//! Buffer pool and concurrency governor
//!
//! Bounds peak memory and file descriptor usage. Uploads, downloads and
//! checksum jobs each draw from their own permit pool, so a burst of
//! downloads never starves uploads. Copy loops and hashing borrow
//! fixed-size buffers from a shared pool instead of allocating per request.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Which permit pool a slot is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermitKind {
    Upload,
    Download,
    Checksum,
}

impl fmt::Display for PermitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Checksum => "checksum",
        })
    }
}

/// Returned when the governor was closed while waiting for a permit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("governor is shutting down")]
pub struct GovernorClosed;

/// Permit ceilings per kind
///
/// A ceiling of 0 is raised to 1 so acquisition can always make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorLimits {
    pub uploads: usize,
    pub downloads: usize,
    pub checksum_jobs: usize,
}

/// Counting limits for concurrent work plus the shared buffer pool
#[derive(Debug)]
pub struct Governor {
    uploads: Arc<Semaphore>,
    downloads: Arc<Semaphore>,
    checksum: Arc<Semaphore>,
    limits: GovernorLimits,
    buffers: BufferPool,
}

impl Governor {
    #[must_use]
    pub fn new(limits: GovernorLimits, buffers: BufferPool) -> Self {
        let limits = GovernorLimits {
            uploads: limits.uploads.max(1),
            downloads: limits.downloads.max(1),
            checksum_jobs: limits.checksum_jobs.max(1),
        };
        Self {
            uploads: Arc::new(Semaphore::new(limits.uploads)),
            downloads: Arc::new(Semaphore::new(limits.downloads)),
            checksum: Arc::new(Semaphore::new(limits.checksum_jobs)),
            limits,
            buffers,
        }
    }

    fn semaphore(&self, kind: PermitKind) -> &Arc<Semaphore> {
        match kind {
            PermitKind::Upload => &self.uploads,
            PermitKind::Download => &self.downloads,
            PermitKind::Checksum => &self.checksum,
        }
    }

    /// Wait for a permit of the given kind
    ///
    /// The returned slot releases its permit when dropped.
    pub async fn acquire(&self, kind: PermitKind) -> Result<TransferSlot, GovernorClosed> {
        let permit = self
            .semaphore(kind)
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GovernorClosed)?;
        Ok(TransferSlot {
            kind,
            _permit: permit,
        })
    }

    /// Wait for a permit unless `cancel` fires first
    ///
    /// Returns `Ok(None)` when cancelled while waiting.
    pub async fn acquire_cancellable(
        &self,
        kind: PermitKind,
        cancel: &CancellationToken,
    ) -> Result<Option<TransferSlot>, GovernorClosed> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            slot = self.acquire(kind) => slot.map(Some),
        }
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self, kind: PermitKind) -> Option<TransferSlot> {
        let permit = self.semaphore(kind).clone().try_acquire_owned().ok()?;
        Some(TransferSlot {
            kind,
            _permit: permit,
        })
    }

    /// Permits of this kind not currently held
    #[must_use]
    pub fn available(&self, kind: PermitKind) -> usize {
        self.semaphore(kind).available_permits()
    }

    /// Configured ceiling for this kind
    #[must_use]
    pub fn limit(&self, kind: PermitKind) -> usize {
        match kind {
            PermitKind::Upload => self.limits.uploads,
            PermitKind::Download => self.limits.downloads,
            PermitKind::Checksum => self.limits.checksum_jobs,
        }
    }

    /// Fail all pending and future acquisitions
    ///
    /// Slots already handed out stay valid until dropped.
    pub fn close(&self) {
        self.uploads.close();
        self.downloads.close();
        self.checksum.close();
    }

    /// Borrow a buffer from the pool
    #[must_use]
    pub fn get_buffer(&self) -> PooledBuffer {
        self.buffers.get_buffer()
    }
}

/// RAII permit for one unit of concurrent work
///
/// Released when dropped, including on early return or panic.
#[derive(Debug)]
pub struct TransferSlot {
    kind: PermitKind,
    _permit: OwnedSemaphorePermit,
}

impl TransferSlot {
    #[must_use]
    pub fn kind(&self) -> PermitKind {
        self.kind
    }

    /// Release the permit now instead of at end of scope
    pub fn release(self) {}
}

// =============================================================================
// Buffer pool
// =============================================================================

#[derive(Debug)]
struct PoolInner {
    idle: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_idle: usize,
}

/// Pool of fixed-size byte buffers
///
/// Cloning shares the same pool.
#[derive(Debug, Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool lending `buffer_size`-byte buffers, keeping at most
    /// `max_idle` of them around between uses
    ///
    /// A `buffer_size` of 0 is raised to 1.
    #[must_use]
    pub fn new(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                buffer_size: buffer_size.max(1),
                max_idle,
            }),
        }
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Lend a buffer, reusing an idle one when available
    #[must_use]
    pub fn get_buffer(&self) -> PooledBuffer {
        let reused = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let buf = reused.unwrap_or_else(|| vec![0u8; self.inner.buffer_size]);
        PooledBuffer {
            buf,
            pool: self.clone(),
        }
    }

    /// Return a buffer to the pool
    ///
    /// Buffers of the wrong length, or beyond the idle limit, are freed.
    pub fn put_buffer(&self, buf: Vec<u8>) {
        if buf.len() != self.inner.buffer_size {
            return;
        }
        let mut idle = self
            .inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.inner.max_idle {
            idle.push(buf);
        }
    }

    /// Buffers currently sitting idle in the pool
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A buffer on loan from a [`BufferPool`], returned when dropped
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: BufferPool,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.put_buffer(buf);
    }
}
