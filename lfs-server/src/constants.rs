//! Server constants

// =============================================================================
// Limits
// =============================================================================

/// Concurrent whole-file and chunk uploads
pub const DEFAULT_MAX_UPLOADS: usize = 100;

/// Concurrent range, chunk and whole-file downloads
pub const DEFAULT_MAX_DOWNLOADS: usize = 200;

/// Files hashed at the same time, across background and blocking callers
pub const DEFAULT_MAX_CHECKSUM_JOBS: usize = 3;

/// Wall-clock bound for a whole-file upload, in seconds (0 disables)
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 30;

/// Idle buffers kept by the buffer pool; extra returned buffers are freed
pub const DEFAULT_MAX_IDLE_BUFFERS: usize = 16;

/// Files processed concurrently by batch operations
pub const BATCH_CONCURRENCY: usize = 10;

// =============================================================================
// Storage layout
// =============================================================================

/// Environment variable naming the storage root
pub const ENV_STORAGE_PATH: &str = "LFS_STORAGE_PATH";

/// Storage directory used when the platform has no download directory
pub const FALLBACK_STORAGE_DIR: &str = "storage";

/// Extension of a fully received chunk file
pub const CHUNK_FILE_EXTENSION: &str = "chunk";

/// Extension of a chunk file still being received
pub const CHUNK_PARTIAL_EXTENSION: &str = "part";

// =============================================================================
// CLI messages
// =============================================================================

pub const MSG_BANNER: &str = "lfsd v";
pub const MSG_STORAGE_ROOT: &str = "Storage root: ";
pub const ERR_NO_STORAGE_ROOT: &str = "Failed to create storage root";
pub const ERR_OPEN_INPUT: &str = "Failed to open input file";
pub const ERR_OPEN_OUTPUT: &str = "Failed to open output file";
pub const ERR_SIGNAL_CTRLC: &str = "Failed to listen for Ctrl+C";
