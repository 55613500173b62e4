//! Integration tests for the file service
//!
//! These tests drive [`FileService`] end to end against a temporary storage
//! root: resumable uploads, chunked uploads with merge verification, range
//! and chunk downloads, listing, and the checksum cache.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use lfs_common::ErrorKind;
use lfs_common::hash::checksum_bytes;
use lfs_server::checksum::{ChecksumStatus, JobOutcome};
use lfs_server::chunks::ChunkDescriptor;
use lfs_server::governor::PermitKind;
use lfs_server::transfers::{
    DownloadOutcome, ResponseHead, ResponseSink, ResponseStatus, ResponseWriter, TransferError,
};
use lfs_server::{FileService, ServiceConfig};
use tempfile::TempDir;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helper Functions
// ============================================================================

/// Service over a fresh temp root with small buffers
fn create_service() -> (TempDir, FileService) {
    create_service_with(|_| {})
}

fn create_service_with(configure: impl FnOnce(&mut ServiceConfig)) -> (TempDir, FileService) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = ServiceConfig::new(temp_dir.path());
    config.buffer_size = 64;
    configure(&mut config);
    (temp_dir, FileService::new(config))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn chunk(
    name: &str,
    data: &[u8],
    index: u32,
    chunk_size: usize,
    md5: &str,
) -> (ChunkDescriptor, Vec<u8>) {
    let total_chunks = data.len().div_ceil(chunk_size) as u32;
    let start = index as usize * chunk_size;
    let end = (start + chunk_size).min(data.len());
    let descriptor = ChunkDescriptor {
        file_name: name.to_string(),
        total_size: data.len() as u64,
        chunk_index: index,
        chunk_size: (end - start) as u64,
        total_chunks,
        md5: (index + 1 == total_chunks).then(|| md5.to_string()),
    };
    (descriptor, data[start..end].to_vec())
}

/// Sink that accepts `limit` body bytes, then fails like a closed socket
struct DisconnectingSink {
    accepted: usize,
    limit: usize,
}

impl AsyncWrite for DisconnectingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let room = self.limit - self.accepted;
        if room == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer went away",
            )));
        }
        let n = buf.len().min(room);
        self.accepted += n;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl ResponseSink for DisconnectingSink {
    async fn send_head(&mut self, _head: &ResponseHead) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Upload Tests
// ============================================================================

#[tokio::test]
async fn test_upload_then_resume() {
    let (dir, service) = create_service();
    let cancel = CancellationToken::new();
    let data = pattern(1000);

    for offset in [0usize, 1, 399, 999, 1000] {
        let name = format!("movie-{offset}.bin");

        let first = service
            .save_file(&name, &mut &data[..offset], None, &cancel)
            .await
            .unwrap();
        assert_eq!(first.size, offset as u64);

        let resumed = service
            .save_file(&name, &mut &data[offset..], Some(offset as u64), &cancel)
            .await
            .unwrap();
        assert_eq!(resumed.offset, offset as u64);
        assert_eq!(resumed.bytes_written, (1000 - offset) as u64);
        assert_eq!(resumed.size, 1000);

        assert_eq!(
            std::fs::read(dir.path().join(&name)).unwrap(),
            data,
            "resume at {offset}"
        );
    }
}

#[tokio::test]
async fn test_resume_past_end_rejected() {
    let (_dir, service) = create_service();
    let cancel = CancellationToken::new();
    service
        .save_file("a.bin", &mut &b"12345"[..], None, &cancel)
        .await
        .unwrap();

    let err = service
        .save_file("a.bin", &mut &b"more"[..], Some(50), &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRange);
}

#[tokio::test]
async fn test_upload_rejects_traversal() {
    let (_dir, service) = create_service();
    let cancel = CancellationToken::new();

    for name in ["../escape.txt", "a/b.txt", "", "chunks"] {
        let err = service
            .save_file(name, &mut &b"x"[..], None, &cancel)
            .await
            .unwrap_err();
        assert!(
            matches!(err, TransferError::InvalidName { .. }),
            "{name:?} gave {err:?}"
        );
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
}

#[tokio::test]
async fn test_upload_timeout() {
    let (_dir, service) = create_service_with(|config| {
        config.upload_timeout = Some(Duration::from_millis(50));
    });
    let cancel = CancellationToken::new();

    // The writer half stays open, so the upload never sees end of input
    let (_writer, mut reader) = tokio::io::duplex(64);
    let err = service
        .save_file("stalled.bin", &mut reader, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_upload_cancelled() {
    let (_dir, service) = create_service();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service
        .save_file("a.bin", &mut &b"data"[..], None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_batch_upload_and_check() {
    let (_dir, service) = create_service();
    let cancel = CancellationToken::new();

    let batch: Vec<(String, &[u8])> = vec![
        ("one.txt".into(), &b"one"[..]),
        ("../bad.txt".into(), &b"bad"[..]),
        ("two.txt".into(), &b"two"[..]),
    ];
    let report = service.save_files(batch, &cancel).await;
    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(report.errors[0].starts_with("../bad.txt"));

    let names = vec!["one.txt".to_string(), "two.txt".into(), "three.txt".into()];
    let report = service.check_files(&names).await;
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(report.errors[0].starts_with("three.txt"));
}

// ============================================================================
// Chunked Upload Tests
// ============================================================================

#[tokio::test]
async fn test_chunked_upload_merges_and_verifies() {
    let (dir, service) = create_service();
    let cancel = CancellationToken::new();
    let data = pattern(2500);
    let md5 = checksum_bytes(&data);

    // Middle chunks may arrive in any order before the last one
    for index in [1, 0, 2] {
        let (descriptor, bytes) = chunk("video.mp4", &data, index, 1024, &md5);
        let receipt = service
            .save_chunk(&descriptor, &mut bytes.as_slice(), &cancel)
            .await
            .unwrap();
        assert_eq!(receipt.bytes_received, bytes.len() as u64);
        if index == 2 {
            let merged = receipt.merged.expect("last chunk merges");
            assert_eq!(merged.size, 2500);
            assert_eq!(merged.checksum, md5);
        } else {
            assert!(receipt.merged.is_none());
        }
    }

    assert_eq!(std::fs::read(dir.path().join("video.mp4")).unwrap(), data);
    assert!(!dir.path().join("chunks").join("video.mp4").exists());
    assert_eq!(
        service.get_checksum("video.mp4").await.unwrap(),
        ChecksumStatus::Ready { checksum: md5 }
    );
}

#[tokio::test]
async fn test_chunked_upload_accepts_uppercase_md5() {
    let (_dir, service) = create_service();
    let cancel = CancellationToken::new();
    let data = pattern(100);
    let md5 = checksum_bytes(&data).to_uppercase();

    let (descriptor, bytes) = chunk("single.bin", &data, 0, 1024, &md5);
    let receipt = service
        .save_chunk(&descriptor, &mut bytes.as_slice(), &cancel)
        .await
        .unwrap();
    assert!(receipt.merged.is_some());
}

#[tokio::test]
async fn test_chunked_upload_mismatch_deletes_destination() {
    let (dir, service) = create_service();
    let cancel = CancellationToken::new();
    let data = pattern(2048);
    let wrong = checksum_bytes(b"something else");

    for index in 0..2 {
        let (descriptor, bytes) = chunk("doc.pdf", &data, index, 1024, &wrong);
        let result = service
            .save_chunk(&descriptor, &mut bytes.as_slice(), &cancel)
            .await;
        if index == 1 {
            let err = result.unwrap_err();
            assert!(matches!(
                &err,
                TransferError::IntegrityMismatch { expected, actual }
                    if *expected == wrong && *actual == checksum_bytes(&data)
            ));
            assert_eq!(err.kind(), ErrorKind::Integrity);
        } else {
            result.unwrap();
        }
    }

    assert!(!dir.path().join("doc.pdf").exists());
    let files = service.list_files().await.unwrap();
    assert!(files.is_empty());
}

#[tokio::test]
async fn test_chunked_upload_missing_chunk() {
    let (_dir, service) = create_service();
    let cancel = CancellationToken::new();
    let data = pattern(3000);
    let md5 = checksum_bytes(&data);

    for index in [0, 2] {
        let (descriptor, bytes) = chunk("gap.bin", &data, index, 1024, &md5);
        let result = service
            .save_chunk(&descriptor, &mut bytes.as_slice(), &cancel)
            .await;
        if index == 2 {
            let err = result.unwrap_err();
            assert!(matches!(err, TransferError::ChunkNotFound(1)));
            assert_eq!(err.kind(), ErrorKind::ChunkNotFound);
        } else {
            result.unwrap();
        }
    }

    // Staged chunks survive a failed merge so the client can fill the gap
    assert_eq!(service.chunk_status("gap.bin").await.unwrap(), vec![0, 2]);

    let (descriptor, bytes) = chunk("gap.bin", &data, 1, 1024, &md5);
    service
        .save_chunk(&descriptor, &mut bytes.as_slice(), &cancel)
        .await
        .unwrap();
    let (descriptor, bytes) = chunk("gap.bin", &data, 2, 1024, &md5);
    let receipt = service
        .save_chunk(&descriptor, &mut bytes.as_slice(), &cancel)
        .await
        .unwrap();
    assert_eq!(receipt.merged.unwrap().size, 3000);
}

#[tokio::test]
async fn test_chunk_status_and_abort() {
    let (dir, service) = create_service();
    let cancel = CancellationToken::new();
    let data = pattern(3000);
    let md5 = checksum_bytes(&data);

    assert!(service.chunk_status("late.bin").await.unwrap().is_empty());
    for index in [0, 1] {
        let (descriptor, bytes) = chunk("late.bin", &data, index, 1024, &md5);
        service
            .save_chunk(&descriptor, &mut bytes.as_slice(), &cancel)
            .await
            .unwrap();
    }
    assert_eq!(service.chunk_status("late.bin").await.unwrap(), vec![0, 1]);

    assert!(service.abort_chunks("late.bin").await.unwrap());
    assert!(!service.abort_chunks("late.bin").await.unwrap());
    assert!(!dir.path().join("chunks").join("late.bin").exists());
}

#[tokio::test]
async fn test_last_chunk_without_md5_rejected() {
    let (_dir, service) = create_service();
    let cancel = CancellationToken::new();
    let descriptor = ChunkDescriptor {
        file_name: "a.bin".into(),
        total_size: 4,
        chunk_index: 0,
        chunk_size: 4,
        total_chunks: 1,
        md5: None,
    };
    let err = service
        .save_chunk(&descriptor, &mut &b"data"[..], &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

// ============================================================================
// Download Tests
// ============================================================================

#[tokio::test]
async fn test_download_full_file() {
    let (dir, service) = create_service();
    let data = pattern(1000);
    std::fs::write(dir.path().join("a.bin"), &data).unwrap();

    let mut sink = ResponseWriter::new(Vec::new());
    let outcome = service
        .download_file("a.bin", &mut sink, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Completed { bytes: 1000 });

    let head = sink.head().unwrap();
    assert_eq!(head.status, ResponseStatus::Ok);
    assert_eq!(head.content_length, 1000);
    assert_eq!(sink.get_ref(), &data);
}

#[tokio::test]
async fn test_download_range() {
    let (dir, service) = create_service();
    let data = pattern(1000);
    std::fs::write(dir.path().join("a.bin"), &data).unwrap();

    let mut sink = ResponseWriter::new(Vec::new());
    let outcome = service
        .download_file(
            "a.bin",
            &mut sink,
            Some("bytes=100-199"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Completed { bytes: 100 });

    let head = sink.head().unwrap();
    assert_eq!(head.status.code(), 206);
    assert_eq!(
        head.content_range.unwrap().to_string(),
        "bytes 100-199/1000"
    );
    assert_eq!(sink.get_ref().as_slice(), &data[100..200]);
}

#[tokio::test]
async fn test_download_open_ended_range() {
    let (dir, service) = create_service();
    let data = pattern(1000);
    std::fs::write(dir.path().join("a.bin"), &data).unwrap();

    let mut sink = ResponseWriter::new(Vec::new());
    service
        .download_file("a.bin", &mut sink, Some("bytes=900-"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sink.get_ref().as_slice(), &data[900..]);
}

#[tokio::test]
async fn test_download_invalid_range() {
    let (dir, service) = create_service();
    std::fs::write(dir.path().join("a.bin"), pattern(1000)).unwrap();
    let cancel = CancellationToken::new();

    for range in ["bytes=2000-", "bytes=500-100", "items=0-1", "bytes=-100"] {
        let mut sink = ResponseWriter::new(Vec::new());
        let err = service
            .download_file("a.bin", &mut sink, Some(range), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRange, "{range}");
        assert!(sink.head().is_none());
    }
}

#[tokio::test]
async fn test_download_chunk_clamped_to_file() {
    let (dir, service) = create_service();
    let data = pattern(2500);
    std::fs::write(dir.path().join("a.bin"), &data).unwrap();

    let mut sink = ResponseWriter::new(Vec::new());
    let outcome = service
        .download_chunk("a.bin", &mut sink, 2, 1024, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Completed { bytes: 452 });
    assert_eq!(
        sink.head().unwrap().content_range.unwrap().to_string(),
        "bytes 2048-2499/2500"
    );
    assert_eq!(sink.get_ref().as_slice(), &data[2048..]);
}

#[tokio::test]
async fn test_download_missing_file() {
    let (_dir, service) = create_service();
    let mut sink = ResponseWriter::new(Vec::new());
    let err = service
        .download_file("nope.bin", &mut sink, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_download_client_disconnect_is_not_an_error() {
    let (dir, service) = create_service();
    std::fs::write(dir.path().join("a.bin"), pattern(1000)).unwrap();

    let mut sink = DisconnectingSink {
        accepted: 0,
        limit: 100,
    };
    let outcome = service
        .download_file("a.bin", &mut sink, None, &CancellationToken::new())
        .await
        .unwrap();
    match outcome {
        DownloadOutcome::Aborted { bytes } => assert!(bytes <= 100),
        other => panic!("expected abort, got {other:?}"),
    }
    // The download slot was released
    assert_eq!(
        service.governor().available(PermitKind::Download),
        service.governor().limit(PermitKind::Download)
    );
}

#[tokio::test]
async fn test_download_cancelled_request() {
    let (dir, service) = create_service();
    std::fs::write(dir.path().join("a.bin"), pattern(1000)).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut sink = ResponseWriter::new(Vec::new());
    let outcome = service
        .download_file("a.bin", &mut sink, None, &cancel)
        .await
        .unwrap();
    assert_eq!(outcome, DownloadOutcome::Aborted { bytes: 0 });
    assert!(sink.get_ref().is_empty());
}

// ============================================================================
// Listing and Checksum Tests
// ============================================================================

#[tokio::test]
async fn test_listing_fills_checksums_in_background() {
    let (dir, service) = create_service();
    std::fs::write(dir.path().join("b.txt"), b"hello world").unwrap();
    std::fs::write(dir.path().join("a.txt"), b"").unwrap();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();

    let first = service.list_files().await.unwrap();
    let names: Vec<_> = first.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt"]);
    assert_eq!(first[1].size, 11);

    for name in ["a.txt", "b.txt"] {
        if let Some(outcome) = service.wait_for_checksum(name).await.unwrap() {
            assert!(matches!(outcome, JobOutcome::Completed(_)));
        }
    }

    let second = service.list_files().await.unwrap();
    assert_eq!(
        second[0].checksum.as_deref(),
        Some("d41d8cd98f00b204e9800998ecf8427e")
    );
    assert_eq!(
        second[1].checksum.as_deref(),
        Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
    );
}

#[tokio::test]
async fn test_checksum_in_progress_while_permit_held() {
    let (dir, service) = create_service_with(|config| config.max_checksum_jobs = 1);
    let data = pattern(4096);
    std::fs::write(dir.path().join("big.bin"), &data).unwrap();

    let held = service
        .governor()
        .acquire(PermitKind::Checksum)
        .await
        .unwrap();

    let listed = service.list_files().await.unwrap();
    assert_eq!(listed[0].checksum, None);
    assert!(matches!(
        service.get_checksum("big.bin").await.unwrap(),
        ChecksumStatus::InProgress { .. }
    ));
    let progress = service.checksum_progress("big.bin").unwrap();
    assert!(progress.in_flight);
    assert!(progress.checksum.is_none());

    drop(held);
    assert_eq!(
        service.wait_for_checksum("big.bin").await.unwrap(),
        Some(JobOutcome::Completed(checksum_bytes(&data)))
    );
    assert_eq!(
        service.get_checksum("big.bin").await.unwrap(),
        ChecksumStatus::Ready {
            checksum: checksum_bytes(&data)
        }
    );
    let progress = service.checksum_progress("big.bin").unwrap();
    assert!(!progress.in_flight);
    assert_eq!(progress.progress, 1.0);
}

#[tokio::test]
async fn test_cancel_checksum() {
    let (dir, service) = create_service_with(|config| config.max_checksum_jobs = 1);
    std::fs::write(dir.path().join("a.bin"), b"abc").unwrap();

    let _held = service
        .governor()
        .acquire(PermitKind::Checksum)
        .await
        .unwrap();
    service.list_files().await.unwrap();

    assert!(service.cancel_checksum("a.bin").unwrap());
    // The job may already be gone by the time we ask
    assert!(matches!(
        service.wait_for_checksum("a.bin").await.unwrap(),
        None | Some(JobOutcome::Cancelled)
    ));
    assert_eq!(service.checksum_progress("a.bin").unwrap().checksum, None);
    assert!(!service.cancel_checksum("a.bin").unwrap());
}

#[tokio::test]
async fn test_checksum_follows_file_changes() {
    let (dir, service) = create_service();
    let cancel = CancellationToken::new();

    service
        .save_file("notes.txt", &mut &b"hello"[..], None, &cancel)
        .await
        .unwrap();
    assert_eq!(
        service.get_checksum("notes.txt").await.unwrap(),
        ChecksumStatus::Ready {
            checksum: checksum_bytes(b"hello")
        }
    );

    // Replaced through the service
    service
        .save_file("notes.txt", &mut &b"hello world"[..], None, &cancel)
        .await
        .unwrap();
    assert_eq!(
        service.get_checksum("notes.txt").await.unwrap(),
        ChecksumStatus::Ready {
            checksum: checksum_bytes(b"hello world")
        }
    );

    // Replaced behind the service's back; the size change alone invalidates
    std::fs::write(dir.path().join("notes.txt"), b"changed on disk").unwrap();
    assert_eq!(
        service.get_checksum("notes.txt").await.unwrap(),
        ChecksumStatus::Ready {
            checksum: checksum_bytes(b"changed on disk")
        }
    );
}

#[tokio::test]
async fn test_checksum_missing_file() {
    let (_dir, service) = create_service();
    let err = service.get_checksum("ghost.bin").await.unwrap_err();
    assert!(matches!(err, TransferError::NotFound(_)));
}

#[tokio::test]
async fn test_file_info() {
    let (dir, service) = create_service();
    std::fs::write(dir.path().join("a.txt"), b"hello world").unwrap();

    let info = service.file_info("a.txt").await.unwrap();
    assert_eq!(info.name, "a.txt");
    assert_eq!(info.size, 11);
    assert_eq!(
        info.checksum.as_deref(),
        Some("5eb63bbbe01eeed093cb22bb8f5acdc3")
    );

    let err = service.file_info("b.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_refuses_new_work() {
    let (dir, service) = create_service();
    std::fs::write(dir.path().join("a.bin"), b"abc").unwrap();
    service.shutdown().await;

    let err = service
        .save_file("b.bin", &mut &b"x"[..], None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShuttingDown);

    let err = service.get_checksum("a.bin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ShuttingDown);
}
