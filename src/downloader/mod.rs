//! Download orchestration
//!
//! This module provides the engine that turns a list of
//! [`FileDescriptor`](crate::FileDescriptor)s into published files.
//!
//! # Overview
//!
//! A run goes through these steps:
//!
//! 1. **Inventory**: [`inventory::scan`] classifies each file as complete, missing or incomplete
//! 2. **Scheduling**: [`DownloadExecutor`] queues everything that is not complete
//! 3. **Transfer**: at most `concurrency` [`FileTransfer`](crate::fetcher::FileTransfer)s run at once
//! 4. **Retry**: [`RetryPolicy`] retries transient failures with `k³` second backoff
//! 5. **Reporting**: outcomes are folded into an [`AggregateResult`] and streamed to a [`ProgressSink`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vaimm::downloader::{DownloadExecutor, LogSink, RetryPolicy};
//! use vaimm::fetcher::{ClientIdentity, HttpTransfer};
//! use vaimm::FileDescriptor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transfer = Arc::new(HttpTransfer::new(&ClientIdentity::new("cookie"))?);
//! let executor = DownloadExecutor::new(transfer, "./models")
//!     .with_concurrency(8)
//!     .with_retry_policy(RetryPolicy::new(3));
//!
//! let files = vec![FileDescriptor::new("alq-13", "alq-v13-fp16.tz", "https://veai-models.topazlabs.com/alq-v13-fp16.tz", 42)];
//! let result = executor.execute(files, Arc::new(LogSink::new())).await;
//! println!("{} of {} files fetched", result.files_succeeded, result.total_files_requested);
//! # Ok(())
//! # }
//! ```
//!
//! # Failure Handling
//!
//! - Network errors, 5xx, 408, 429 and size mismatches are retried
//! - Authentication and other 4xx errors are fatal and cancel the whole run
//! - Files never become visible under their final name unless their size is exact

pub mod config;
pub mod executor;
pub mod inventory;
pub mod job;
pub mod progress;
pub mod retry;

pub use executor::DownloadExecutor;
pub use inventory::{InventoryEntry, InventoryStatus, InventorySummary};
pub use job::{AggregateResult, FileFailure, RunStatus, TransferOutcome, TransferStatus};
pub use progress::{LogSink, NullSink, ProgressEvent, ProgressSink, ProgressState};
pub use retry::{RetryOutcome, RetryPolicy};
