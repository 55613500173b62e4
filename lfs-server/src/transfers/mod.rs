//! Single-file transfer primitives
//!
//! Offset-aware uploads, range-aware downloads and the cancellable copy loop
//! they share. Permits, buffers and name validation are applied by the
//! service layer on top of these.

mod copy;
mod download;
mod error;
mod response;
mod upload;

pub use copy::{CopyError, copy_with_cancel};
pub use download::{DownloadOutcome, Window, stream_window};
pub use error::TransferError;
pub use response::{ContentRange, ResponseHead, ResponseSink, ResponseStatus, ResponseWriter};
pub use upload::{UploadReceipt, write_at_offset};
