//! MD5 file hashing
//!
//! MD5 is the integrity format clients declare for chunked uploads, so every
//! stored checksum is a lowercase hex MD5. Files are streamed through a
//! caller-supplied buffer so the server can hash with pooled buffers.
//!
//! ## Progress and cancellation
//!
//! [`compute_md5_with_progress`] reports `(bytes_read, file_size)` after every
//! block and checks the cancellation token before each read. A cancelled
//! computation returns `ErrorKind::Interrupted`, at most one buffer after the
//! token fired.
//!
//! Callers must validate paths before hashing.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};
use tokio_util::sync::CancellationToken;

use crate::COPY_BUFFER_SIZE;

/// Compute the MD5 of an entire file
///
/// Runs on a blocking thread pool to avoid blocking async workers.
pub async fn compute_md5(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || compute_md5_sync(&path))
        .await
        .map_err(|e| io::Error::other(format!("hash task failed: {e}")))?
}

/// Synchronous MD5 computation with a freshly allocated buffer
pub fn compute_md5_sync(path: &Path) -> io::Result<String> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    compute_md5_with_progress(path, &mut buffer, None, |_, _| {})
}

/// MD5 of an in-memory byte slice, lowercase hex
#[must_use]
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Streaming MD5 with a progress callback and cancellation support
///
/// This is the core implementation used by all other hash functions.
///
/// # Arguments
///
/// * `path` - File to hash
/// * `buffer` - Read buffer; its length is the block size
/// * `cancel` - Optional token checked before each read
/// * `on_progress` - Called with `(bytes_read, file_size)` after each block
///
/// # Returns
///
/// * `Ok(hash)` - Lowercase hex MD5
/// * `Err` with `ErrorKind::Interrupted` - If cancelled
/// * `Err` with `ErrorKind::InvalidInput` - If `buffer` is empty
/// * `Err` with other kinds - For I/O errors
pub fn compute_md5_with_progress<F>(
    path: &Path,
    buffer: &mut [u8],
    cancel: Option<&CancellationToken>,
    mut on_progress: F,
) -> io::Result<String>
where
    F: FnMut(u64, u64),
{
    if buffer.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "hash buffer must not be empty",
        ));
    }
    if is_cancelled(cancel) {
        return Err(cancelled());
    }

    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut hasher = Md5::new();
    let mut bytes_read: u64 = 0;

    loop {
        if is_cancelled(cancel) {
            return Err(cancelled());
        }

        let n = match file.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
        bytes_read += n as u64;
        on_progress(bytes_read, file_size);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[inline]
fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(CancellationToken::is_cancelled)
}

fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "hash computation cancelled")
}
