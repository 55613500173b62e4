//! Fingerprint-keyed checksum cache
//!
//! One entry per file path, guarded by a single reader/writer lock that is
//! never held across an `.await`. An entry is only trusted while its
//! fingerprint matches the file on disk; a mismatch is treated exactly like
//! a missing entry.
//!
//! Every computation that claims an entry gets a fresh generation number.
//! Progress updates and results from a computation whose generation no
//! longer owns the entry are discarded, so a superseded job can never
//! overwrite newer state.

use std::collections::HashMap;
use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

/// File identity used to decide whether a cached checksum is still valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub modified: SystemTime,
    pub size: u64,
}

impl Fingerprint {
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        Ok(Self {
            modified: metadata.modified()?,
            size: metadata.len(),
        })
    }

    /// Read the current fingerprint of `path`
    pub async fn of(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Self::from_metadata(&metadata)
    }
}

/// Lifecycle state of a cached entry
///
/// "Uncached" has no variant: it is the absence of an entry, or an entry
/// whose fingerprint no longer matches.
#[derive(Debug, Clone, PartialEq)]
pub enum ChecksumState {
    Calculating { progress: f64 },
    Calculated(String),
    Errored(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub state: ChecksumState,
    pub generation: u64,
}

/// Result of looking up an entry, claiming it when nothing usable exists
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Lookup {
    Hit(String),
    InProgress { progress: f64 },
    Failed(String),
    /// The caller now owns a new `Calculating` entry with this generation.
    /// `superseded` is the generation of a computation for an older
    /// fingerprint that was still running.
    Claimed {
        generation: u64,
        superseded: Option<u64>,
    },
}

#[derive(Debug, Default)]
pub struct ChecksumCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    next_generation: AtomicU64,
}

impl ChecksumCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached checksum, only if calculated and `fingerprint` still matches
    #[must_use]
    pub fn get_cached(&self, path: &Path, fingerprint: Fingerprint) -> Option<String> {
        match self.read().get(path) {
            Some(CacheEntry {
                fingerprint: stored,
                state: ChecksumState::Calculated(hash),
                ..
            }) if *stored == fingerprint => Some(hash.clone()),
            _ => None,
        }
    }

    /// Snapshot of the entry for `path`, regardless of fingerprint
    #[must_use]
    pub fn entry(&self, path: &Path) -> Option<CacheEntry> {
        self.read().get(path).cloned()
    }

    /// Look up `path` and claim it for a new computation if nothing usable exists
    ///
    /// With `clear_errored`, an errored entry is reported once and removed so
    /// the next lookup starts over.
    pub(crate) fn lookup_or_claim(
        &self,
        path: &Path,
        fingerprint: Fingerprint,
        clear_errored: bool,
    ) -> Lookup {
        let mut entries = self.write();

        let mut superseded = None;
        if let Some(entry) = entries.get(path) {
            if entry.fingerprint == fingerprint {
                match &entry.state {
                    ChecksumState::Calculated(hash) => return Lookup::Hit(hash.clone()),
                    ChecksumState::Calculating { progress } => {
                        return Lookup::InProgress {
                            progress: *progress,
                        };
                    }
                    ChecksumState::Errored(message) => {
                        let message = message.clone();
                        if clear_errored {
                            entries.remove(path);
                        }
                        return Lookup::Failed(message);
                    }
                }
            }
            if matches!(entry.state, ChecksumState::Calculating { .. }) {
                superseded = Some(entry.generation);
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                fingerprint,
                state: ChecksumState::Calculating { progress: 0.0 },
                generation,
            },
        );
        Lookup::Claimed {
            generation,
            superseded,
        }
    }

    /// Record progress for a running computation
    pub fn set_progress(&self, path: &Path, generation: u64, progress: f64) {
        if let Some(entry) = self.write().get_mut(path)
            && entry.generation == generation
            && let ChecksumState::Calculating { progress: current } = &mut entry.state
        {
            *current = progress.clamp(0.0, 1.0);
        }
    }

    /// Store the final state of a computation
    ///
    /// Returns `false` if `generation` no longer owns the entry.
    pub fn complete(&self, path: &Path, generation: u64, state: ChecksumState) -> bool {
        match self.write().get_mut(path) {
            Some(entry) if entry.generation == generation => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    /// Drop the entry if `generation` still owns it (back to uncached)
    pub fn discard(&self, path: &Path, generation: u64) {
        let mut entries = self.write();
        if entries
            .get(path)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(path);
        }
    }

    /// Drop whatever is cached for `path`
    pub fn invalidate(&self, path: &Path) {
        self.write().remove(path);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
