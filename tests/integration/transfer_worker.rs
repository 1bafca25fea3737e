//! Integration tests for the HTTP transfer worker against a local CDN double

use httpmock::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;
use vaimm::cancel::{CancelReason, RunCancellation};
use vaimm::downloader::{NullSink, ProgressEvent, ProgressSink};
use vaimm::fetcher::{ClientIdentity, FileTransfer, HttpTransfer, TransferError};
use vaimm::FileDescriptor;

fn worker() -> HttpTransfer {
    HttpTransfer::new(&ClientIdentity::new("test-cookie")).unwrap()
}

#[derive(Default)]
struct CountingSink {
    bytes: AtomicU64,
}

impl ProgressSink for CountingSink {
    fn on_event(&self, event: ProgressEvent<'_>) {
        if let ProgressEvent::Chunk { bytes, .. } = event {
            self.bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }
}

#[tokio::test]
async fn test_successful_transfer_publishes_file() {
    let server = MockServer::start_async().await;
    let body = vec![7u8; 20_000];
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/alq-v13-fp16.tz")
                .header("cookie", "cf_clearance=test-cookie")
                .header("accept-encoding", "identity");
            then.status(200).body(body.clone());
        })
        .await;

    let dir = TempDir::new().unwrap();
    let descriptor = FileDescriptor::new(
        "alq-13",
        "alq-v13-fp16.tz",
        server.url("/alq-v13-fp16.tz"),
        body.len() as u64,
    );
    let sink = CountingSink::default();

    let bytes = worker()
        .transfer(&descriptor, dir.path(), &sink, &RunCancellation::new())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(bytes, 20_000);
    assert_eq!(sink.bytes.load(Ordering::Relaxed), 20_000);
    assert_eq!(std::fs::read(descriptor.final_path(dir.path())).unwrap(), body);
    assert!(!descriptor.temp_path(dir.path()).exists());
}

#[tokio::test]
async fn test_stale_temp_file_is_overwritten() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/prob-v3.tz");
            then.status(200).body("fresh bytes");
        })
        .await;

    let dir = TempDir::new().unwrap();
    let descriptor = FileDescriptor::new("prob-3", "prob-v3.tz", server.url("/prob-v3.tz"), 11);
    std::fs::write(descriptor.temp_path(dir.path()), vec![0u8; 64]).unwrap();

    worker()
        .transfer(&descriptor, dir.path(), &NullSink, &RunCancellation::new())
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(descriptor.final_path(dir.path())).unwrap(),
        b"fresh bytes"
    );
    assert!(!descriptor.temp_path(dir.path()).exists());
}

#[tokio::test]
async fn test_forbidden_is_fatal() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/alq.tz");
            then.status(403).body("cloudflare challenge");
        })
        .await;

    let dir = TempDir::new().unwrap();
    let descriptor = FileDescriptor::new("alq-13", "alq.tz", server.url("/alq.tz"), 10);

    let err = worker()
        .transfer(&descriptor, dir.path(), &NullSink, &RunCancellation::new())
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Status { status: 403, .. }));
    assert!(err.is_fatal());
    assert!(!descriptor.final_path(dir.path()).exists());
    assert!(!descriptor.temp_path(dir.path()).exists());
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/alq.tz");
            then.status(502);
        })
        .await;

    let dir = TempDir::new().unwrap();
    let descriptor = FileDescriptor::new("alq-13", "alq.tz", server.url("/alq.tz"), 10);

    let err = worker()
        .transfer(&descriptor, dir.path(), &NullSink, &RunCancellation::new())
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(!descriptor.final_path(dir.path()).exists());
}

#[tokio::test]
async fn test_short_body_is_never_published() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/alq.tz");
            then.status(200).body("0123456789");
        })
        .await;

    let dir = TempDir::new().unwrap();
    let descriptor = FileDescriptor::new("alq-13", "alq.tz", server.url("/alq.tz"), 12);

    let err = worker()
        .transfer(&descriptor, dir.path(), &NullSink, &RunCancellation::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransferError::LengthMismatch {
            expected: 12,
            advertised: 10,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert!(!descriptor.final_path(dir.path()).exists());
}

#[tokio::test]
async fn test_cancelled_run_makes_no_request() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/alq.tz");
            then.status(200).body("0123456789");
        })
        .await;

    let dir = TempDir::new().unwrap();
    let descriptor = FileDescriptor::new("alq-13", "alq.tz", server.url("/alq.tz"), 10);
    let cancel = RunCancellation::new();
    cancel.cancel(CancelReason::Interrupted);

    let err = worker()
        .transfer(&descriptor, dir.path(), &NullSink, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::Cancelled));
    assert_eq!(mock.calls_async().await, 0);
}
