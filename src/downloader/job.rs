//! Per-file outcomes and the aggregate result of a run

use serde::Serialize;
use std::time::Duration;

use crate::cancel::CancelReason;
use crate::FileDescriptor;

/// Terminal state of one scheduled file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferStatus {
    /// The file was published at its final path with the expected size.
    Success,
    /// Every attempt failed, or a single attempt failed fatally.
    Failed {
        /// Description of the last error
        reason: String,
        /// Whether the failure aborted the whole run
        fatal: bool,
    },
    /// The run was cancelled before this file finished.
    Cancelled,
}

/// Outcome of transferring one file.
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    /// File this outcome belongs to
    pub descriptor: FileDescriptor,
    /// Bytes of the published file (zero unless successful)
    pub bytes_transferred: u64,
    /// Attempts made, including the last one
    pub attempts: u32,
    /// Terminal state
    pub status: TransferStatus,
}

impl TransferOutcome {
    /// Successful outcome.
    pub fn success(descriptor: FileDescriptor, bytes: u64, attempts: u32) -> Self {
        Self {
            descriptor,
            bytes_transferred: bytes,
            attempts,
            status: TransferStatus::Success,
        }
    }

    /// Failed outcome.
    pub fn failed(
        descriptor: FileDescriptor,
        attempts: u32,
        reason: impl Into<String>,
        fatal: bool,
    ) -> Self {
        Self {
            descriptor,
            bytes_transferred: 0,
            attempts,
            status: TransferStatus::Failed {
                reason: reason.into(),
                fatal,
            },
        }
    }

    /// Cancelled outcome.
    pub fn cancelled(descriptor: FileDescriptor, attempts: u32) -> Self {
        Self {
            descriptor,
            bytes_transferred: 0,
            attempts,
            status: TransferStatus::Cancelled,
        }
    }

    /// Whether the file was published.
    pub fn is_success(&self) -> bool {
        matches!(self.status, TransferStatus::Success)
    }

    /// Whether this failure should abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self.status, TransferStatus::Failed { fatal: true, .. })
    }
}

/// A file that did not make it, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    /// File name
    pub filename: String,
    /// Last error
    pub reason: String,
}

/// Overall verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Every scheduled file was published.
    Succeeded,
    /// The run finished but some files failed after exhausting retries.
    PartialFailure,
    /// The run was cancelled, by a fatal failure or by the user.
    Aborted(CancelReason),
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateResult {
    /// Files scheduled for transfer
    pub total_files_requested: usize,
    /// Files published
    pub files_succeeded: usize,
    /// Files that failed
    pub files_failed: usize,
    /// Files abandoned because the run was cancelled
    pub files_cancelled: usize,
    /// Sum of the published files' sizes
    pub total_bytes_transferred: u64,
    /// Wall time of the run
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Failed files and their last errors
    pub failures: Vec<FileFailure>,
    /// Why the run was cancelled, if it was
    #[serde(skip)]
    pub cancelled_by: Option<CancelReason>,
}

impl AggregateResult {
    /// Empty result for a run that schedules `total_files_requested` files.
    pub fn new(total_files_requested: usize) -> Self {
        Self {
            total_files_requested,
            ..Self::default()
        }
    }

    /// Fold one terminal outcome into the totals.
    pub fn record(&mut self, outcome: &TransferOutcome) {
        match &outcome.status {
            TransferStatus::Success => {
                self.files_succeeded += 1;
                self.total_bytes_transferred += outcome.bytes_transferred;
            }
            TransferStatus::Failed { reason, .. } => {
                self.files_failed += 1;
                self.failures.push(FileFailure {
                    filename: outcome.descriptor.filename().to_string(),
                    reason: reason.clone(),
                });
            }
            TransferStatus::Cancelled => self.files_cancelled += 1,
        }
    }

    /// Count a file that failed before it could be scheduled (its size could
    /// not be determined).
    pub fn record_unscheduled_failure(
        &mut self,
        filename: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.total_files_requested += 1;
        self.files_failed += 1;
        self.failures.push(FileFailure {
            filename: filename.into(),
            reason: reason.into(),
        });
    }

    /// Overall verdict.
    pub fn status(&self) -> RunStatus {
        if let Some(reason) = &self.cancelled_by {
            RunStatus::Aborted(reason.clone())
        } else if self.files_failed > 0 || self.files_cancelled > 0 {
            RunStatus::PartialFailure
        } else {
            RunStatus::Succeeded
        }
    }

    /// Whether every scheduled file was published.
    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Succeeded
    }

    /// Process exit code: 0 on success, 1 if anything failed or the run was cancelled.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
