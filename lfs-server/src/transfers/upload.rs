//! Offset-aware upload writes

use std::io::SeekFrom;
use std::path::Path;

use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use lfs_common::range::RangeError;

use super::copy::copy_with_cancel;
use super::error::TransferError;

/// Result of a completed single-file upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub name: String,
    pub offset: u64,
    pub bytes_written: u64,
    pub size: u64,
}

/// Stream `source` into `path`, starting at byte `offset`
///
/// The file is created if missing and never truncated up front, so a
/// resumed upload keeps the bytes before `offset`. After a successful copy
/// the file is cut to `offset + written`, which makes a fresh upload at
/// offset 0 overwrite in place.
///
/// An `offset` beyond the current file length is rejected before anything
/// is opened. On cancellation or failure the partially written file is left
/// as-is.
pub async fn write_at_offset<R>(
    path: &Path,
    source: &mut R,
    offset: u64,
    buffer: &mut [u8],
    cancel: Option<&CancellationToken>,
) -> Result<u64, TransferError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let existing = match fs::metadata(path).await {
        Ok(metadata) => metadata.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e.into()),
    };
    if offset > existing {
        return Err(RangeError::Unsatisfiable {
            start: offset,
            end: offset,
            size: existing,
        }
        .into());
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }

    let written = copy_with_cancel(source, &mut file, buffer, None, cancel).await?;
    file.set_len(offset + written).await?;

    Ok(written)
}
