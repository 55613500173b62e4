//! Range-aware download streaming

use std::io::SeekFrom;
use std::path::Path;

use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lfs_common::range::{ByteRange, RangeError};

use super::copy::{CopyError, copy_with_cancel};
use super::error::TransferError;
use super::response::{ContentRange, ResponseHead, ResponseSink};

/// Which part of a file to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// The whole file, as an attachment
    Full,
    /// A client-requested byte range
    Range(ByteRange),
    /// Fixed-size chunk `index` of `size` bytes; the last chunk may be shorter
    Chunk { index: u64, size: u64 },
}

impl Window {
    /// Resolve against the file size into a response head and starting offset
    pub fn resolve(&self, file_name: &str, file_size: u64) -> Result<(ResponseHead, u64), RangeError> {
        let range = match *self {
            Self::Full => return Ok((ResponseHead::full(file_name, file_size), 0)),
            Self::Range(range) => range,
            Self::Chunk { index, size } => {
                if size == 0 {
                    return Err(RangeError::Malformed("chunk size must be positive".into()));
                }
                let start = index
                    .checked_mul(size)
                    .ok_or(RangeError::Unsatisfiable {
                        start: u64::MAX,
                        end: u64::MAX,
                        size: file_size,
                    })?;
                ByteRange::new(start, Some(start.saturating_add(size - 1)))
            }
        };

        let (start, end) = range.resolve(file_size)?;
        let head = ResponseHead::partial(ContentRange {
            start,
            end,
            total: file_size,
        });
        Ok((head, start))
    }
}

/// How a download ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Completed { bytes: u64 },
    /// The consumer went away or the request was cancelled
    Aborted { bytes: u64 },
}

impl DownloadOutcome {
    #[must_use]
    pub fn bytes(&self) -> u64 {
        match self {
            Self::Completed { bytes } | Self::Aborted { bytes } => *bytes,
        }
    }
}

/// Stream one window of `path` into `sink`
///
/// Range problems are reported before the head is sent. Once streaming
/// starts, a failing sink or a cancelled request ends the download as
/// [`DownloadOutcome::Aborted`]; only read failures on the file are errors.
pub async fn stream_window<S>(
    path: &Path,
    file_name: &str,
    sink: &mut S,
    window: Window,
    buffer: &mut [u8],
    cancel: Option<&CancellationToken>,
) -> Result<DownloadOutcome, TransferError>
where
    S: ResponseSink,
{
    let mut file = File::open(path)
        .await
        .map_err(|e| TransferError::from_open(file_name, e))?;
    let file_size = file.metadata().await?.len();
    let (head, start) = window.resolve(file_name, file_size)?;

    if cancel.is_some_and(CancellationToken::is_cancelled) {
        debug!(name = %file_name, "download cancelled before start");
        return Ok(DownloadOutcome::Aborted { bytes: 0 });
    }
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }

    if let Err(e) = sink.send_head(&head).await {
        debug!(name = %file_name, error = %e, "client went away before response head");
        return Ok(DownloadOutcome::Aborted { bytes: 0 });
    }

    match copy_with_cancel(&mut file, sink, buffer, Some(head.content_length), cancel).await {
        Ok(bytes) => Ok(DownloadOutcome::Completed { bytes }),
        Err(
            e @ (CopyError::Cancelled { .. }
            | CopyError::Write { .. }
            | CopyError::ShortWrite { .. }),
        ) => {
            debug!(name = %file_name, error = %e, "download aborted");
            Ok(DownloadOutcome::Aborted { bytes: e.copied() })
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfers::response::{ResponseStatus, ResponseWriter};

    #[test]
    fn test_full_window() {
        let (head, start) = Window::Full.resolve("a.bin", 10).unwrap();
        assert_eq!(start, 0);
        assert_eq!(head.status, ResponseStatus::Ok);
        assert_eq!(head.content_length, 10);
    }

    #[test]
    fn test_range_window() {
        let window = Window::Range(ByteRange::new(100, Some(199)));
        let (head, start) = window.resolve("a.bin", 1000).unwrap();
        assert_eq!(start, 100);
        assert_eq!(head.status, ResponseStatus::PartialContent);
        assert_eq!(head.content_length, 100);
        assert_eq!(
            head.content_range.map(|r| r.to_string()).as_deref(),
            Some("bytes 100-199/1000")
        );
    }

    #[test]
    fn test_chunk_window_clamped() {
        let window = Window::Chunk {
            index: 2,
            size: 1024,
        };
        let (head, start) = window.resolve("a.bin", 2500).unwrap();
        assert_eq!(start, 2048);
        assert_eq!(head.content_length, 452);
    }

    #[test]
    fn test_chunk_window_invalid() {
        assert!(
            Window::Chunk { index: 0, size: 0 }
                .resolve("a.bin", 10)
                .is_err()
        );
        assert!(
            Window::Chunk { index: 3, size: 1024 }
                .resolve("a.bin", 2500)
                .is_err()
        );
        assert!(
            Window::Chunk {
                index: u64::MAX,
                size: 2
            }
            .resolve("a.bin", 2500)
            .is_err()
        );
    }

    #[tokio::test]
    async fn test_stream_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let mut sink = ResponseWriter::new(Vec::new());
        let mut buffer = vec![0u8; 32];
        let outcome = stream_window(
            &path,
            "data.bin",
            &mut sink,
            Window::Range(ByteRange::new(100, Some(199))),
            &mut buffer,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, DownloadOutcome::Completed { bytes: 100 });
        assert_eq!(sink.get_ref().as_slice(), &data[100..200]);
        assert_eq!(sink.head().unwrap().status, ResponseStatus::PartialContent);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut sink = ResponseWriter::new(Vec::new());
        let mut buffer = vec![0u8; 32];
        let err = stream_window(
            &dir.path().join("nope"),
            "nope",
            &mut sink,
            Window::Full,
            &mut buffer,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::NotFound(name) if name == "nope"));
        assert!(sink.head().is_none());
    }

    #[tokio::test]
    async fn test_invalid_range_before_head() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::write(&path, b"tiny").unwrap();

        let mut sink = ResponseWriter::new(Vec::new());
        let mut buffer = vec![0u8; 32];
        let err = stream_window(
            &path,
            "small.bin",
            &mut sink,
            Window::Range(ByteRange::new(10, None)),
            &mut buffer,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRange(_)));
        assert!(sink.head().is_none());
    }
}
