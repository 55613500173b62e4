//! Checksum computation and job management
//!
//! All hashing happens in jobs spawned on the engine's [`TaskTracker`], each
//! gated by a checksum permit from the [`Governor`]. Blocking callers simply
//! await the job they started (or joined), so dropping a caller never leaves
//! an entry stuck in `Calculating`.
//!
//! ## Job lifecycle
//!
//! 1. A lookup claims the cache entry and a job is spawned with a child of
//!    the engine's shutdown token.
//! 2. The job waits for a checksum permit, then hashes on the blocking pool
//!    with a pooled buffer, publishing progress after every block.
//! 3. The result is written to the cache if the job still owns the entry,
//!    then broadcast to waiters.
//!
//! A cancelled job leaves the file uncached.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use lfs_common::hash;

use super::cache::{ChecksumCache, ChecksumState, Fingerprint, Lookup};
use crate::governor::{Governor, PermitKind};

/// Answer to a checksum query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChecksumStatus {
    Ready { checksum: String },
    /// Another caller's computation is running; `progress` is in `[0, 1)`
    InProgress { progress: f64 },
}

/// Final result of one checksum job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

/// Snapshot for progress reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumProgress {
    pub progress: f64,
    pub in_flight: bool,
    pub checksum: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("checksum failed: {0}")]
    Failed(String),
    #[error("checksum cancelled")]
    Cancelled,
    #[error("checksum engine is shutting down")]
    ShuttingDown,
}

type OutcomeReceiver = watch::Receiver<Option<JobOutcome>>;

#[derive(Debug)]
struct Job {
    generation: u64,
    cancel: CancellationToken,
    done: OutcomeReceiver,
}

#[derive(Debug)]
struct EngineInner {
    cache: ChecksumCache,
    governor: Arc<Governor>,
    jobs: Mutex<HashMap<PathBuf, Job>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

/// Asynchronous, bounded, progress-reporting checksum cache
///
/// Cloning shares the same cache and jobs.
#[derive(Debug, Clone)]
pub struct ChecksumEngine {
    inner: Arc<EngineInner>,
}

impl ChecksumEngine {
    #[must_use]
    pub fn new(governor: Arc<Governor>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                cache: ChecksumCache::new(),
                governor,
                jobs: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ChecksumCache {
        &self.inner.cache
    }

    /// Cached checksum if calculated and still valid for `fingerprint`
    #[must_use]
    pub fn get_cached(&self, path: &Path, fingerprint: Fingerprint) -> Option<String> {
        self.inner.cache.get_cached(path, fingerprint)
    }

    /// Caller-blocking query
    ///
    /// Returns a cached value immediately and reports a running computation
    /// as in progress without joining it. An errored entry is returned once
    /// and then cleared. Otherwise the checksum is computed before returning.
    pub async fn query(&self, path: &Path) -> Result<ChecksumStatus, ChecksumError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ChecksumError::ShuttingDown);
        }
        let fingerprint = Fingerprint::of(path).await?;
        match self.lookup_or_spawn(path, fingerprint, true) {
            (Lookup::Hit(hash), _) => Ok(ChecksumStatus::Ready { checksum: hash }),
            (Lookup::InProgress { progress }, _) => Ok(ChecksumStatus::InProgress { progress }),
            (Lookup::Failed(message), _) => Err(ChecksumError::Failed(message)),
            (Lookup::Claimed { .. }, done) => match await_outcome(done).await {
                JobOutcome::Completed(hash) => Ok(ChecksumStatus::Ready { checksum: hash }),
                JobOutcome::Failed(message) => Err(ChecksumError::Failed(message)),
                JobOutcome::Cancelled => Err(self.cancelled_error()),
            },
        }
    }

    /// Compute or join until a checksum for the current file contents exists
    ///
    /// Unlike [`query`](Self::query), an in-progress computation is joined.
    /// A computation superseded by a file change is retried against the new
    /// contents.
    pub async fn compute(&self, path: &Path) -> Result<String, ChecksumError> {
        loop {
            if self.inner.shutdown.is_cancelled() {
                return Err(ChecksumError::ShuttingDown);
            }
            let fingerprint = Fingerprint::of(path).await?;
            let outcome = match self.lookup_or_spawn(path, fingerprint, true) {
                (Lookup::Hit(hash), _) => return Ok(hash),
                (Lookup::Failed(message), _) => return Err(ChecksumError::Failed(message)),
                (Lookup::Claimed { .. }, done) => Some(await_outcome(done).await),
                (Lookup::InProgress { .. }, _) => self.wait_for(path).await,
            };
            match outcome {
                Some(JobOutcome::Completed(hash)) => {
                    // The job may have hashed contents that have since changed
                    if Fingerprint::of(path).await? == fingerprint {
                        return Ok(hash);
                    }
                }
                Some(JobOutcome::Failed(message)) => return Err(ChecksumError::Failed(message)),
                Some(JobOutcome::Cancelled) | None => {}
            }
        }
    }

    /// Non-blocking lookup for directory listings
    ///
    /// Returns the cached value or `None` right away. On a miss a background
    /// job is scheduled unless one is already running for this fingerprint or
    /// the last attempt for this fingerprint failed.
    pub fn query_for_listing(&self, path: &Path, fingerprint: Fingerprint) -> Option<String> {
        match self.lookup_or_spawn(path, fingerprint, false) {
            (Lookup::Hit(hash), _) => Some(hash),
            _ => None,
        }
    }

    /// Current state of `path` for progress reporting
    #[must_use]
    pub fn progress(&self, path: &Path) -> ChecksumProgress {
        let in_flight = self.jobs().contains_key(path);
        let mut snapshot = ChecksumProgress {
            progress: 0.0,
            in_flight,
            checksum: None,
            error: None,
        };
        if let Some(entry) = self.inner.cache.entry(path) {
            match entry.state {
                ChecksumState::Calculating { progress } => snapshot.progress = progress,
                ChecksumState::Calculated(hash) => {
                    snapshot.progress = 1.0;
                    snapshot.checksum = Some(hash);
                }
                ChecksumState::Errored(message) => snapshot.error = Some(message),
            }
        }
        snapshot
    }

    /// Wait for the in-flight job for `path`, if any
    ///
    /// Returns `None` when nothing is running for `path`.
    pub async fn wait_for(&self, path: &Path) -> Option<JobOutcome> {
        let done = self.jobs().get(path)?.done.clone();
        Some(await_outcome(Some(done)).await)
    }

    /// Cancel the in-flight job for `path`
    ///
    /// The entry returns to uncached once the job stops. Returns `false` if
    /// nothing was running.
    pub fn cancel(&self, path: &Path) -> bool {
        match self.jobs().get(path) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget the cached checksum for `path` and stop any job hashing it
    pub fn invalidate(&self, path: &Path) {
        self.cancel(path);
        self.inner.cache.invalidate(path);
    }

    /// Jobs currently scheduled or running
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.jobs().len()
    }

    /// Cancel every job and wait for all of them to finish
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    fn cancelled_error(&self) -> ChecksumError {
        if self.inner.shutdown.is_cancelled() {
            ChecksumError::ShuttingDown
        } else {
            ChecksumError::Cancelled
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<PathBuf, Job>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `path`, spawning a job when the entry was claimed
    ///
    /// The receiver is only returned for a claim, so the claimant can await
    /// its own job even if it finishes before the caller looks for it.
    fn lookup_or_spawn(
        &self,
        path: &Path,
        fingerprint: Fingerprint,
        clear_errored: bool,
    ) -> (Lookup, Option<OutcomeReceiver>) {
        let lookup = self
            .inner
            .cache
            .lookup_or_claim(path, fingerprint, clear_errored);
        let done = match lookup {
            Lookup::Claimed {
                generation,
                superseded,
            } => {
                if let Some(old) = superseded {
                    debug!(path = %path.display(), old, generation, "file changed during checksum, restarting");
                }
                Some(self.spawn_job(path.to_path_buf(), generation))
            }
            _ => None,
        };
        (lookup, done)
    }

    /// Start the job for a claimed `generation`
    ///
    /// Claims and registrations can interleave, so only an older job is
    /// replaced. A job spawned after a newer one is already registered starts
    /// cancelled and never touches the newer entry.
    fn spawn_job(&self, path: PathBuf, generation: u64) -> OutcomeReceiver {
        let cancel = self.inner.shutdown.child_token();
        let (tx, rx) = watch::channel(None);

        {
            let mut jobs = self.jobs();
            match jobs.get(&path) {
                Some(newer) if newer.generation > generation => {
                    debug!(
                        path = %path.display(),
                        generation,
                        newer = newer.generation,
                        "stale checksum job dropped"
                    );
                    cancel.cancel();
                }
                _ => {
                    let previous = jobs.insert(
                        path.clone(),
                        Job {
                            generation,
                            cancel: cancel.clone(),
                            done: rx.clone(),
                        },
                    );
                    if let Some(previous) = previous {
                        previous.cancel.cancel();
                    }
                }
            }
        }

        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            let outcome = inner.run_job(&path, generation, &cancel).await;
            inner.finish_job(&path, generation, &outcome);
            let _ = tx.send(Some(outcome));
        });
        rx
    }
}

async fn await_outcome(done: Option<OutcomeReceiver>) -> JobOutcome {
    let Some(mut done) = done else {
        return JobOutcome::Cancelled;
    };
    match done.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(JobOutcome::Cancelled),
        // Sender dropped without a result: the job task panicked
        Err(_) => JobOutcome::Cancelled,
    }
}

impl EngineInner {
    async fn run_job(
        self: &Arc<Self>,
        path: &Path,
        generation: u64,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let slot = match self
            .governor
            .acquire_cancellable(PermitKind::Checksum, cancel)
            .await
        {
            Ok(Some(slot)) => slot,
            Ok(None) | Err(_) => return JobOutcome::Cancelled,
        };

        let mut buffer = self.governor.get_buffer();
        let inner = self.clone();
        let file = path.to_path_buf();
        let token = cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            hash::compute_md5_with_progress(&file, &mut buffer, Some(&token), |read, total| {
                // Completion is published with the hash, never as progress 1.0
                if read < total {
                    inner
                        .cache
                        .set_progress(&file, generation, read as f64 / total as f64);
                }
            })
        })
        .await;
        slot.release();

        match result {
            Ok(Ok(hash)) => JobOutcome::Completed(hash),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => JobOutcome::Cancelled,
            Ok(Err(e)) => JobOutcome::Failed(e.to_string()),
            Err(e) => JobOutcome::Failed(format!("hash task failed: {e}")),
        }
    }

    fn finish_job(&self, path: &Path, generation: u64, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Completed(hash) => {
                if self
                    .cache
                    .complete(path, generation, ChecksumState::Calculated(hash.clone()))
                {
                    debug!(path = %path.display(), checksum = %hash, "checksum calculated");
                }
            }
            JobOutcome::Failed(message) => {
                warn!(path = %path.display(), error = %message, "checksum failed");
                self.cache
                    .complete(path, generation, ChecksumState::Errored(message.clone()));
            }
            JobOutcome::Cancelled => {
                debug!(path = %path.display(), "checksum cancelled");
                self.cache.discard(path, generation);
            }
        }

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs
            .get(path)
            .is_some_and(|job| job.generation == generation)
        {
            jobs.remove(path);
        }
    }
}
