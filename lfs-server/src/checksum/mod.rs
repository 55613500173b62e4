//! Checksum cache engine
//!
//! Per-file MD5 cache keyed by a (modification time, size) fingerprint, with
//! background computation bounded by the governor's checksum permits.

mod cache;
mod engine;

pub use cache::{CacheEntry, ChecksumCache, ChecksumState, Fingerprint};
pub use engine::{ChecksumEngine, ChecksumError, ChecksumProgress, ChecksumStatus, JobOutcome};
