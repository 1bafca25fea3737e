//! # VAI Models Manager Library
//!
//! Downloads the inference model files that Topaz Video AI expects to find in
//! its model data directory, for one hardware backend at a time.
//!
//! ## Features
//!
//! - **Manifest Catalog**: Reads the model JSON manifests shipped with the application
//! - **Inventory Scan**: Classifies every file as complete, missing or incomplete
//! - **Bounded Concurrency**: A fixed-size pool of concurrent transfers
//! - **Safe Publishing**: Streams into `<file>.incomplete` and renames only after a size check
//! - **Retry with Backoff**: Cubic backoff for transient failures, fail-fast on bad credentials
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vaimm::downloader::{DownloadExecutor, NullSink};
//! use vaimm::fetcher::{ClientIdentity, HttpTransfer};
//! use vaimm::FileDescriptor;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = ClientIdentity::new("<cf_clearance cookie>");
//! let transfer = Arc::new(HttpTransfer::new(&identity)?);
//!
//! let descriptors = vec![FileDescriptor::new(
//!     "prap-3",
//!     "prap-v3-fp32-ov.tz",
//!     "https://veai-models.topazlabs.com/prap-v3-fp32-ov.tz",
//!     104_857_600,
//! )];
//!
//! let executor = DownloadExecutor::new(transfer, "/opt/TopazVideoAIBETA/models-data")
//!     .with_concurrency(4);
//! let result = executor.execute(descriptors, Arc::new(NullSink)).await;
//! std::process::exit(result.exit_code());
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`catalog`] - Manifest parsing, backend/model listing and file derivation
//! - [`config`] - Layered flag / environment / platform-default resolution
//! - [`downloader`] - Inventory scan, retry policy and the download coordinator
//! - [`fetcher`] - HTTP transfer worker and size probe
//! - [`cancel`] - Cooperative run cancellation
//! - [`cli`] - Command line front-end

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Cooperative cancellation shared by every unit of a run
pub mod cancel;

/// Manifest catalog
pub mod catalog;

/// CLI command implementations
pub mod cli;

/// Layered configuration resolution
pub mod config;

/// Download orchestration
pub mod downloader;

/// Transfer workers
pub mod fetcher;

/// Metrics collection
pub mod metrics;

pub use downloader::{AggregateResult, DownloadExecutor, InventoryStatus};

/// Suffix appended to a filename while its bytes are still being fetched
pub const TEMP_SUFFIX: &str = "incomplete";

/// One downloadable model file
///
/// Two descriptors refer to the same artifact when their filenames are equal;
/// the other fields are carried along for transfer and reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    id: String,
    filename: String,
    url: String,
    expected_size: u64,
}

impl FileDescriptor {
    /// Create a new descriptor
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        url: impl Into<String>,
        expected_size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            url: url.into(),
            expected_size,
        }
    }

    /// Logical model id (e.g. "prap-3")
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File name inside the target directory
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Source URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Exact size the published file must have
    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    /// Final location of this file inside `dir`
    pub fn final_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.filename)
    }

    /// Temporary location used while the file is being fetched
    pub fn temp_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.filename, TEMP_SUFFIX))
    }
}

impl PartialEq for FileDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.filename == other.filename
    }
}

impl Eq for FileDescriptor {}

impl std::hash::Hash for FileDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.filename.hash(state);
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.filename, self.expected_size)
    }
}
