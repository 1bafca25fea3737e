//! Coordinator pool bound and cancellation, with a scripted transfer worker

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vaimm::cancel::{CancelReason, RunCancellation};
use vaimm::downloader::{
    DownloadExecutor, NullSink, ProgressEvent, ProgressSink, RetryPolicy, RunStatus,
};
use vaimm::fetcher::{FileTransfer, RetryErrorType, TransferError};
use vaimm::FileDescriptor;

/// Writes the expected bytes after a delay and tracks how many transfers
/// overlap.
#[derive(Default)]
struct SlowTransfer {
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowTransfer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait]
impl FileTransfer for SlowTransfer {
    async fn transfer(
        &self,
        descriptor: &FileDescriptor,
        dir: &Path,
        progress: &dyn ProgressSink,
        cancel: &RunCancellation,
    ) -> Result<u64, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let finished = tokio::select! {
            _ = tokio::time::sleep(self.delay) => true,
            _ = cancel.cancelled() => false,
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        if !finished {
            return Err(TransferError::Cancelled);
        }

        let size = descriptor.expected_size();
        let path = descriptor.final_path(dir);
        std::fs::write(&path, vec![0u8; size as usize]).map_err(|e| TransferError::io(&path, e))?;
        progress.on_event(ProgressEvent::Chunk {
            descriptor_id: descriptor.id(),
            filename: descriptor.filename(),
            bytes: size,
        });
        Ok(size)
    }
}

fn descriptors(count: usize) -> Vec<FileDescriptor> {
    (0..count)
        .map(|i| {
            FileDescriptor::new(
                "prob-3",
                format!("file-{i:02}.tz"),
                format!("https://veai-models.topazlabs.com/file-{i:02}.tz"),
                16,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_pool_never_exceeds_concurrency() {
    for threads in [1usize, 4, 16] {
        let dir = TempDir::new().unwrap();
        let transfer = Arc::new(SlowTransfer::new(Duration::from_millis(20)));

        let result = DownloadExecutor::new(transfer.clone(), dir.path())
            .with_concurrency(threads)
            .with_retry_policy(RetryPolicy::immediate(1))
            .execute(descriptors(40), Arc::new(NullSink))
            .await;

        assert_eq!(result.files_succeeded, 40);
        assert_eq!(result.total_bytes_transferred, 40 * 16);
        assert_eq!(
            transfer.max_active.load(Ordering::SeqCst),
            threads,
            "pool of {threads} must be saturated but never exceeded"
        );
    }
}

#[tokio::test]
async fn test_interrupt_stops_run_and_publishes_nothing_partial() {
    let dir = TempDir::new().unwrap();
    let transfer = Arc::new(SlowTransfer::new(Duration::from_secs(30)));
    let cancel = RunCancellation::shared();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel(CancelReason::Interrupted);
        }
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        DownloadExecutor::new(transfer.clone(), dir.path())
            .with_concurrency(4)
            .with_retry_policy(RetryPolicy::immediate(3))
            .with_cancellation(cancel)
            .execute(descriptors(10), Arc::new(NullSink)),
    )
    .await
    .expect("cancellation must end the run promptly");

    assert_eq!(result.files_succeeded, 0);
    assert_eq!(result.files_cancelled, 10);
    assert_eq!(result.cancelled_by, Some(CancelReason::Interrupted));
    assert_eq!(result.exit_code(), 1);
    assert_eq!(transfer.calls.load(Ordering::SeqCst), 4);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

/// Rejects `bad.tz` with 401 after a short delay; every other file hangs
/// until the run is cancelled.
struct RejectingTransfer;

#[async_trait]
impl FileTransfer for RejectingTransfer {
    async fn transfer(
        &self,
        descriptor: &FileDescriptor,
        _dir: &Path,
        _progress: &dyn ProgressSink,
        cancel: &RunCancellation,
    ) -> Result<u64, TransferError> {
        if descriptor.filename() == "bad.tz" {
            tokio::time::sleep(Duration::from_millis(50)).await;
            return Err(TransferError::Status {
                url: descriptor.url().to_string(),
                status: 401,
                kind: RetryErrorType::AuthFailed(401),
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(descriptor.expected_size()),
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
        }
    }
}

#[tokio::test]
async fn test_fatal_failure_cancels_in_flight_transfers() {
    let dir = TempDir::new().unwrap();
    let mut files = descriptors(6);
    files.insert(
        1,
        FileDescriptor::new("alq-13", "bad.tz", "https://veai-models.topazlabs.com/bad.tz", 16),
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        DownloadExecutor::new(Arc::new(RejectingTransfer), dir.path())
            .with_concurrency(4)
            .with_retry_policy(RetryPolicy::immediate(5))
            .execute(files, Arc::new(NullSink)),
    )
    .await
    .expect("a fatal failure must end the run promptly");

    assert_eq!(result.total_files_requested, 7);
    assert_eq!(result.files_failed, 1);
    assert_eq!(result.files_cancelled, 6);
    assert_eq!(result.files_succeeded, 0);
    assert_eq!(result.failures[0].filename, "bad.tz");
    assert!(matches!(
        result.status(),
        RunStatus::Aborted(CancelReason::Fatal { ref filename, .. }) if filename == "bad.tz"
    ));
    assert_eq!(result.exit_code(), 1);
}
