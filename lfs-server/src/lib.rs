//! Local file transfer service
//!
//! Resumable uploads, chunked uploads with MD5 verification, range and chunk
//! downloads, and a background checksum cache over a single storage root.
//! [`FileService`] is the entry point; the modules below are its parts.

pub mod checksum;
pub mod chunks;
pub mod constants;
pub mod files;
pub mod governor;
pub mod service;
pub mod transfers;

pub use service::{BatchReport, ChunkReceipt, FileService, ServiceConfig};
