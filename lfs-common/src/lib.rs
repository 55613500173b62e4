//! LFS Common Library
//!
//! Transport-free building blocks shared by the LFS file service: MD5 file
//! hashing, HTTP-style byte range parsing, input validators and the
//! machine-readable error kinds reported to clients.

mod error_kind;
pub mod hash;
pub mod range;
pub mod validators;

pub use error_kind::{
    ERROR_KIND_CANCELLED, ERROR_KIND_CHUNK_NOT_FOUND, ERROR_KIND_CONFLICT, ERROR_KIND_INTEGRITY,
    ERROR_KIND_INVALID, ERROR_KIND_INVALID_RANGE, ERROR_KIND_IO_ERROR, ERROR_KIND_NOT_FOUND,
    ERROR_KIND_SHUTTING_DOWN, ERROR_KIND_TIMEOUT, ErrorKind,
};

/// Size of the buffers used for streaming copies and hashing (4MB)
pub const COPY_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Name of the staging directory for chunked uploads, directly under the storage root
pub const STAGING_DIR_NAME: &str = "chunks";

/// Content type sent with every download
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
