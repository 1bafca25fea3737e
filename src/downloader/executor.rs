//! Download coordinator
//!
//! Scans the target directory, schedules every file that is not complete onto
//! a pool of at most `concurrency` simultaneous transfers, retries each unit
//! under the [`RetryPolicy`] and folds the outcomes into an [`AggregateResult`].
//! A fatal failure in any unit cancels the whole run.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::DEFAULT_CONCURRENCY;
use super::inventory::{scan, InventorySummary};
use super::job::{AggregateResult, TransferOutcome, TransferStatus};
use super::progress::{ProgressEvent, ProgressSink};
use super::retry::RetryPolicy;
use crate::cancel::{CancelReason, RunCancellation, SharedCancellation};
use crate::fetcher::{FailureClass, FileTransfer};
use crate::metrics::DownloadMetrics;
use crate::FileDescriptor;

/// Coordinates a download run
pub struct DownloadExecutor {
    transfer: Arc<dyn FileTransfer>,
    target_dir: PathBuf,
    concurrency: usize,
    retry_policy: RetryPolicy,
    cancel: SharedCancellation,
}

impl DownloadExecutor {
    /// Create a coordinator that publishes into `target_dir`.
    pub fn new(transfer: Arc<dyn FileTransfer>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            transfer,
            target_dir: target_dir.into(),
            concurrency: DEFAULT_CONCURRENCY,
            retry_policy: RetryPolicy::default(),
            cancel: RunCancellation::shared(),
        }
    }

    /// Set the maximum number of simultaneous transfers (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the retry policy applied to every unit.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Share a cancellation signal, e.g. one fired by a Ctrl+C handler.
    pub fn with_cancellation(mut self, cancel: SharedCancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// The run's cancellation signal.
    pub fn cancellation(&self) -> SharedCancellation {
        self.cancel.clone()
    }

    /// Directory files are published into.
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Scan the target directory and fetch every descriptor that is not complete.
    pub async fn execute(
        &self,
        descriptors: Vec<FileDescriptor>,
        sink: Arc<dyn ProgressSink>,
    ) -> AggregateResult {
        let descriptors = dedupe(descriptors);
        let inventory = scan(&self.target_dir, &descriptors);
        let summary = InventorySummary::from_entries(&inventory);

        info!(
            dir = %self.target_dir.display(),
            complete = summary.complete,
            missing = summary.missing,
            incomplete = summary.incomplete,
            "Inventory scanned: {} of {} files need fetching",
            summary.to_transfer(),
            inventory.len()
        );

        let scheduled = inventory
            .into_iter()
            .filter(|entry| entry.status.needs_transfer())
            .map(|entry| entry.descriptor)
            .collect();

        self.execute_scheduled(scheduled, sink).await
    }

    /// Fetch exactly `scheduled`, without consulting the inventory.
    pub async fn execute_scheduled(
        &self,
        scheduled: Vec<FileDescriptor>,
        sink: Arc<dyn ProgressSink>,
    ) -> AggregateResult {
        let started = Instant::now();
        let mut result = AggregateResult::new(scheduled.len());

        if scheduled.is_empty() {
            info!("No missing model files to download");
            result.cancelled_by = self.cancel.reason().cloned();
            sink.on_finish(&result);
            return result;
        }

        let total_bytes: u64 = scheduled.iter().map(FileDescriptor::expected_size).sum();
        sink.on_start(scheduled.len(), total_bytes);

        let span = info_span!(
            "download_run",
            dir = %self.target_dir.display(),
            files = scheduled.len(),
            concurrency = self.concurrency
        );

        async {
            let mut outcomes = stream::iter(scheduled)
                .map(|descriptor| self.run_unit(descriptor, sink.as_ref()))
                .buffer_unordered(self.concurrency);

            while let Some(outcome) = outcomes.next().await {
                if let TransferStatus::Failed { reason, fatal: true } = &outcome.status {
                    let fired = self.cancel.cancel(CancelReason::Fatal {
                        filename: outcome.descriptor.filename().to_string(),
                        message: reason.clone(),
                    });
                    if fired {
                        error!(
                            filename = %outcome.descriptor.filename(),
                            "Fatal failure, cancelling remaining transfers"
                        );
                    }
                }
                sink.on_file_finished(&outcome);
                result.record(&outcome);
            }
        }
        .instrument(span)
        .await;

        result.elapsed = started.elapsed();
        result.cancelled_by = self.cancel.reason().cloned();
        sink.on_finish(&result);
        result
    }

    async fn run_unit(&self, descriptor: FileDescriptor, sink: &dyn ProgressSink) -> TransferOutcome {
        if self.cancel.is_cancelled() {
            return TransferOutcome::cancelled(descriptor, 0);
        }

        let span = info_span!("file", filename = %descriptor.filename());
        async {
            let metrics = DownloadMetrics::start(descriptor.id(), descriptor.filename());
            let meter = AttemptMeter::new(sink, &descriptor);

            let outcome = self
                .retry_policy
                .run(descriptor.filename(), &self.cancel, |attempt| {
                    let meter = &meter;
                    let descriptor = &descriptor;
                    async move {
                        debug!(attempt, "Starting attempt");
                        let result = self
                            .transfer
                            .transfer(descriptor, &self.target_dir, meter, &self.cancel)
                            .await;
                        if result.is_err() {
                            meter.discard_attempt();
                        }
                        result
                    }
                })
                .await;

            match outcome.result {
                Ok(bytes) => {
                    metrics.record_success(bytes, outcome.attempts);
                    TransferOutcome::success(descriptor, bytes, outcome.attempts)
                }
                Err(err) => match err.class() {
                    FailureClass::Cancelled => {
                        debug!("Cancelled");
                        TransferOutcome::cancelled(descriptor, outcome.attempts)
                    }
                    class => {
                        metrics.record_failure(&err);
                        TransferOutcome::failed(
                            descriptor,
                            outcome.attempts,
                            err.to_string(),
                            class == FailureClass::Fatal,
                        )
                    }
                },
            }
        }
        .instrument(span)
        .await
    }
}

/// Drop descriptors whose filename was already seen. The first one wins.
fn dedupe(descriptors: Vec<FileDescriptor>) -> Vec<FileDescriptor> {
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter(|d| {
            let first = seen.insert(d.filename().to_string());
            if !first {
                warn!(filename = %d.filename(), id = %d.id(), "Duplicate file in request, ignoring");
            }
            first
        })
        .collect()
}

/// Forwards one unit's progress and remembers how much the current attempt
/// reported, so a failed attempt can be taken back out of the totals.
struct AttemptMeter<'a> {
    inner: &'a dyn ProgressSink,
    descriptor: &'a FileDescriptor,
    attempt_bytes: AtomicU64,
}

impl<'a> AttemptMeter<'a> {
    fn new(inner: &'a dyn ProgressSink, descriptor: &'a FileDescriptor) -> Self {
        Self {
            inner,
            descriptor,
            attempt_bytes: AtomicU64::new(0),
        }
    }

    fn discard_attempt(&self) {
        let bytes = self.attempt_bytes.swap(0, Ordering::Relaxed);
        if bytes > 0 {
            self.inner.on_event(ProgressEvent::Discarded {
                descriptor_id: self.descriptor.id(),
                filename: self.descriptor.filename(),
                bytes,
            });
        }
    }
}

impl ProgressSink for AttemptMeter<'_> {
    fn on_event(&self, event: ProgressEvent<'_>) {
        if let ProgressEvent::Chunk { bytes, .. } = event {
            self.attempt_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
        self.inner.on_event(event);
    }
}
