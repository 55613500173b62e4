//! Cancellable streaming copy shared by uploads and downloads

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Why a copy stopped early; every variant records the bytes already written
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("transfer cancelled after {copied} bytes")]
    Cancelled { copied: u64 },
    #[error("read failed after {copied} bytes: {source}")]
    Read {
        copied: u64,
        #[source]
        source: io::Error,
    },
    #[error("write failed after {copied} bytes: {source}")]
    Write {
        copied: u64,
        #[source]
        source: io::Error,
    },
    #[error("short write after {copied} bytes")]
    ShortWrite { copied: u64 },
    #[error("source ended after {copied} of {expected} bytes")]
    SourceEnded { copied: u64, expected: u64 },
}

impl CopyError {
    #[must_use]
    pub fn copied(&self) -> u64 {
        match self {
            Self::Cancelled { copied }
            | Self::Read { copied, .. }
            | Self::Write { copied, .. }
            | Self::ShortWrite { copied }
            | Self::SourceEnded { copied, .. } => *copied,
        }
    }
}

/// Copy from `reader` to `writer` through `buffer`
///
/// Stops after `limit` bytes when given, otherwise at end of input. The
/// cancellation token is checked before every read and also interrupts a
/// read that is waiting on a slow peer. A write that accepts zero bytes is
/// fatal. The writer is flushed on success.
pub async fn copy_with_cancel<R, W>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut [u8],
    limit: Option<u64>,
    cancel: Option<&CancellationToken>,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut copied: u64 = 0;

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(CopyError::Cancelled { copied });
        }

        let want = match limit {
            Some(limit) => {
                let remaining = limit - copied;
                if remaining == 0 {
                    break;
                }
                buffer.len().min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            None => buffer.len(),
        };

        let read = reader.read(&mut buffer[..want]);
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(CopyError::Cancelled { copied }),
                result = read => result,
            },
            None => read.await,
        };
        let n = result.map_err(|source| CopyError::Read { copied, source })?;

        if n == 0 {
            if let Some(expected) = limit {
                return Err(CopyError::SourceEnded { copied, expected });
            }
            break;
        }

        let mut written = 0;
        while written < n {
            let w = writer
                .write(&buffer[written..n])
                .await
                .map_err(|source| CopyError::Write {
                    copied: copied + written as u64,
                    source,
                })?;
            if w == 0 {
                return Err(CopyError::ShortWrite {
                    copied: copied + written as u64,
                });
            }
            written += w;
        }
        copied += n as u64;
    }

    writer
        .flush()
        .await
        .map_err(|source| CopyError::Write { copied, source })?;
    Ok(copied)
}
