//! Command-line argument parsing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use lfs_common::COPY_BUFFER_SIZE;
use lfs_server::ServiceConfig;
use lfs_server::constants::{
    DEFAULT_MAX_CHECKSUM_JOBS, DEFAULT_MAX_DOWNLOADS, DEFAULT_MAX_IDLE_BUFFERS, DEFAULT_MAX_UPLOADS,
    DEFAULT_UPLOAD_TIMEOUT_SECS, ENV_STORAGE_PATH, FALLBACK_STORAGE_DIR,
};

/// Get default storage root help text for current platform
fn default_storage_help() -> String {
    #[cfg(target_os = "linux")]
    return "Storage root directory (default: ~/Downloads, else ./storage)".to_string();

    #[cfg(target_os = "macos")]
    return "Storage root directory (default: ~/Downloads, else ./storage)".to_string();

    #[cfg(target_os = "windows")]
    return "Storage root directory (default: %USERPROFILE%\\Downloads, else .\\storage)"
        .to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Storage root directory (default: ./storage)".to_string();
}

/// Local file transfer daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Storage root directory (overrides platform default)
    #[arg(short, long, env = ENV_STORAGE_PATH, help = default_storage_help())]
    pub storage_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub debug: bool,

    /// Maximum concurrent uploads
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOADS)]
    pub max_uploads: usize,

    /// Maximum concurrent downloads
    #[arg(long, default_value_t = DEFAULT_MAX_DOWNLOADS)]
    pub max_downloads: usize,

    /// Maximum files hashed at once
    #[arg(long, default_value_t = DEFAULT_MAX_CHECKSUM_JOBS)]
    pub max_checksum_jobs: usize,

    /// Copy buffer size in bytes
    #[arg(long, default_value_t = COPY_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Whole-file upload timeout in seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_UPLOAD_TIMEOUT_SECS)]
    pub upload_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List stored files with any cached checksums
    List,

    /// Show size, modification time and checksum of one file
    Info { name: String },

    /// Upload a local file, optionally resuming at a byte offset
    Put {
        file: PathBuf,

        /// Stored name (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        /// Resume at this byte offset of both files
        #[arg(long)]
        resume: Option<u64>,
    },

    /// Upload several local files concurrently
    PutMany { files: Vec<PathBuf> },

    /// Upload a local file as fixed-size chunks, then merge and verify
    PutChunked {
        file: PathBuf,

        /// Stored name (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        /// Chunk size in bytes
        #[arg(long, default_value_t = 4 * 1024 * 1024)]
        chunk_size: u64,
    },

    /// Download a stored file, whole or a `bytes=<start>-<end>` range
    Get {
        name: String,

        /// Byte range, e.g. `bytes=100-199`
        #[arg(long)]
        range: Option<String>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download one fixed-size chunk of a stored file
    GetChunk {
        name: String,

        #[arg(long)]
        index: u64,

        #[arg(long)]
        size: u64,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that stored files exist
    Check { names: Vec<String> },

    /// Get the MD5 checksum of a stored file
    Checksum {
        name: String,

        /// Wait for a background computation instead of reporting progress
        #[arg(long, default_value = "false")]
        wait: bool,
    },

    /// Show checksum progress of a stored file
    Progress { name: String },

    /// Show which chunks of an unfinished chunked upload are stored
    Status { name: String },

    /// Discard the staged chunks of an unfinished chunked upload
    Abort { name: String },
}

impl Args {
    /// Storage root from the flag, the environment, or the platform default
    pub fn storage_root(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| {
            dirs::download_dir().unwrap_or_else(|| PathBuf::from(FALLBACK_STORAGE_DIR))
        })
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            max_uploads: self.max_uploads,
            max_downloads: self.max_downloads,
            max_checksum_jobs: self.max_checksum_jobs,
            buffer_size: self.buffer_size.max(1),
            max_idle_buffers: DEFAULT_MAX_IDLE_BUFFERS,
            upload_timeout: (self.upload_timeout_secs > 0)
                .then(|| Duration::from_secs(self.upload_timeout_secs)),
            ..ServiceConfig::new(self.storage_root())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["lfsd", "--storage-path", "/tmp/store", "list"]).unwrap();
        let config = args.service_config();
        assert_eq!(config.root, PathBuf::from("/tmp/store"));
        assert_eq!(config.max_uploads, DEFAULT_MAX_UPLOADS);
        assert_eq!(config.upload_timeout, Some(Duration::from_secs(30)));
        assert!(matches!(args.command, Command::List));
    }

    #[test]
    fn test_zero_timeout_disables() {
        let args = Args::try_parse_from([
            "lfsd",
            "--storage-path",
            "/tmp/store",
            "--upload-timeout-secs",
            "0",
            "list",
        ])
        .unwrap();
        assert_eq!(args.service_config().upload_timeout, None);
    }

    #[test]
    fn test_get_with_range() {
        let args = Args::try_parse_from([
            "lfsd",
            "-s",
            "/tmp/store",
            "get",
            "a.bin",
            "--range",
            "bytes=0-9",
        ])
        .unwrap();
        match args.command {
            Command::Get { name, range, output } => {
                assert_eq!(name, "a.bin");
                assert_eq!(range.as_deref(), Some("bytes=0-9"));
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
