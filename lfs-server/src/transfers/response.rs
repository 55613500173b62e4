//! Download response head and sinks
//!
//! The engine never speaks HTTP itself. It describes the response with a
//! [`ResponseHead`] and hands it to a [`ResponseSink`] before streaming the
//! body, so a front end can translate it into status line and headers.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::io::AsyncWrite;

use lfs_common::CONTENT_TYPE_OCTET_STREAM;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    PartialContent,
}

impl ResponseStatus {
    /// HTTP status code
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::PartialContent => 206,
        }
    }
}

/// Inclusive byte window of a partial response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// Bytes in the window
    #[must_use]
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseHead {
    pub status: ResponseStatus,
    pub content_length: u64,
    pub content_range: Option<ContentRange>,
    pub content_type: &'static str,
    pub content_disposition: Option<String>,
}

impl ResponseHead {
    /// Whole-file download offered as an attachment
    #[must_use]
    pub fn full(file_name: &str, size: u64) -> Self {
        Self {
            status: ResponseStatus::Ok,
            content_length: size,
            content_range: None,
            content_type: CONTENT_TYPE_OCTET_STREAM,
            content_disposition: Some(format!(
                "attachment; filename=\"{}\"",
                file_name.replace('"', "\\\"")
            )),
        }
    }

    /// Partial content for an inclusive window
    #[must_use]
    pub fn partial(range: ContentRange) -> Self {
        Self {
            status: ResponseStatus::PartialContent,
            content_length: range.byte_count(),
            content_range: Some(range),
            content_type: CONTENT_TYPE_OCTET_STREAM,
            content_disposition: None,
        }
    }

    /// Header name/value pairs in the order a front end should send them
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(5);
        if let Some(range) = &self.content_range {
            headers.push(("Content-Range", range.to_string()));
        }
        headers.push(("Accept-Ranges", "bytes".to_string()));
        headers.push(("Content-Length", self.content_length.to_string()));
        headers.push(("Content-Type", self.content_type.to_string()));
        if let Some(disposition) = &self.content_disposition {
            headers.push(("Content-Disposition", disposition.clone()));
        }
        headers
    }
}

/// Destination of a download
///
/// `send_head` is called exactly once, before any body bytes are written.
pub trait ResponseSink: AsyncWrite + Unpin + Send {
    fn send_head(&mut self, head: &ResponseHead) -> impl Future<Output = io::Result<()>> + Send;
}

/// Sink that records the head and forwards the body to any writer
///
/// Used by the command-line front end (stdout or a file) and by tests
/// (a `Vec<u8>`).
#[derive(Debug)]
pub struct ResponseWriter<W> {
    writer: W,
    head: Option<ResponseHead>,
}

impl<W> ResponseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, head: None }
    }

    pub fn head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin + Send> ResponseSink for ResponseWriter<W> {
    async fn send_head(&mut self, head: &ResponseHead) -> io::Result<()> {
        self.head = Some(head.clone());
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ResponseWriter<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
