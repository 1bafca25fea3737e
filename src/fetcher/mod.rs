//! Transfer workers
//!
//! A [`FileTransfer`] moves one file from its URL into a target directory,
//! streaming into the temporary sibling and publishing with an atomic rename.
//! [`HttpTransfer`] is the production implementation; tests substitute their own.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::cancel::RunCancellation;
use crate::downloader::progress::ProgressSink;
use crate::FileDescriptor;

pub mod http;
pub mod probe;
pub mod retry_formatter;

pub use http::{build_client, ClientIdentity, HttpTransfer};
pub use probe::{ProbeReport, SizeProbe};
pub use retry_formatter::{extract_error_type, RetryContext, RetryErrorType};

/// How the retry policy must treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Another attempt may succeed.
    Retryable,
    /// Retrying cannot help, and the run should stop.
    Fatal,
    /// The run was cancelled while the attempt was in flight.
    Cancelled,
}

/// Errors from a single transfer attempt
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The server answered with a non-success status
    #[error("HTTP {status} for {url} ({})", .kind.description())]
    Status {
        /// Requested URL
        url: String,
        /// Response status code
        status: u16,
        /// Classification of the status
        kind: RetryErrorType,
    },

    /// The request failed before a status was received, or the body stream broke
    #[error("request to {url} failed ({}): {message}", .kind.description())]
    Request {
        /// Requested URL
        url: String,
        /// Classification of the failure
        kind: RetryErrorType,
        /// Underlying error text
        message: String,
    },

    /// The server advertised a body length different from the expected size
    #[error("server advertised {advertised} bytes for {filename}, expected {expected}")]
    LengthMismatch {
        /// File being fetched
        filename: String,
        /// Expected size
        expected: u64,
        /// Content-Length returned by the server
        advertised: u64,
    },

    /// The bytes written differ from the expected size
    #[error("incomplete data from server for {filename} - expected: {expected}, got: {actual}")]
    SizeMismatch {
        /// File being fetched
        filename: String,
        /// Expected size
        expected: u64,
        /// Bytes actually written
        actual: u64,
    },

    /// The server did not say how large the file is
    #[error("no Content-Length returned for {url}")]
    UnknownSize {
        /// Requested URL
        url: String,
    },

    /// Local filesystem error
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being written
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be configured
    #[error("invalid client configuration: {0}")]
    Client(String),

    /// The run was cancelled
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Build from a reqwest error raised while talking to `url`.
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        let status = err.status();
        let kind = extract_error_type(status, Some(err));
        match status {
            Some(status) => Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
                kind,
            },
            None => Self::Request {
                url: url.to_string(),
                kind,
                message: err.to_string(),
            },
        }
    }

    /// Wrap an I/O error on `path`.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Classification used in retry messages and metrics labels.
    pub fn kind(&self) -> RetryErrorType {
        match self {
            Self::Status { kind, .. } | Self::Request { kind, .. } => *kind,
            Self::LengthMismatch { .. } | Self::SizeMismatch { .. } => RetryErrorType::SizeMismatch,
            Self::UnknownSize { .. } => RetryErrorType::NetworkGeneric,
            Self::Io { .. } => RetryErrorType::LocalIo,
            Self::Client(_) => RetryErrorType::InvalidRequest,
            Self::Cancelled => RetryErrorType::NetworkGeneric,
        }
    }

    /// How the retry policy must react.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Cancelled => FailureClass::Cancelled,
            _ if self.kind().is_retryable() => FailureClass::Retryable,
            _ => FailureClass::Fatal,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }

    /// Whether this failure must abort the run.
    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::Fatal
    }
}

/// Moves one file into a directory.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Perform a single attempt: fetch `descriptor` into
    /// `descriptor.temp_path(dir)`, verify the size and rename it to
    /// `descriptor.final_path(dir)`.
    ///
    /// Implementations report every chunk to `progress`, stop promptly once
    /// `cancel` fires, and never leave a final file whose size differs from
    /// the expected size. Returns the number of bytes published.
    async fn transfer(
        &self,
        descriptor: &FileDescriptor,
        dir: &Path,
        progress: &dyn ProgressSink,
        cancel: &RunCancellation,
    ) -> Result<u64, TransferError>;
}
