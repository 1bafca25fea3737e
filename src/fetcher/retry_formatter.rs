//! Failure classification and retry message formatting.
//!
//! [`RetryErrorType`] decides whether a failed attempt may be retried; the
//! [`RetryContext`] builds the log lines shown while retrying and the final
//! failure block with actionable suggestions.

use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

/// Classification of a failed transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Network timeout, or HTTP 408
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400, or a URL that cannot be requested at all
    InvalidRequest,
    /// Authentication failures (401/403), usually a stale cookie
    AuthFailed(u16),
    /// Other client errors (4xx, except 408 and 429)
    ClientError(u16),
    /// Downloaded byte count differs from the expected size
    SizeMismatch,
    /// Writing the temporary file failed
    LocalIo,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "file not found",
                410 => "file no longer available",
                _ => "client error",
            },
            Self::SizeMismatch => "incomplete data from server",
            Self::LocalIo => "local write error",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented with actionable guidance after failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Lower --threads and try again in a few minutes",
            Self::ServerError(_) => "The Topaz CDN may be having issues, try again later",
            Self::InvalidRequest => "Check the --backend and --include values for typos",
            Self::AuthFailed(_) => {
                "Copy a fresh cf_clearance cookie from your browser (--cookie or TVAI_COOKIE)"
            }
            Self::ClientError(_) => {
                "The manifest may reference a file the CDN does not serve; check --include"
            }
            Self::SizeMismatch => "The connection was cut short, re-run to fetch the rest",
            Self::LocalIo => "Check free disk space and write permissions on --dir",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Credential and request problems fail the same way every time, so they
    /// are never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RetryErrorType::InvalidRequest
                | RetryErrorType::AuthFailed(_)
                | RetryErrorType::ClientError(_)
        )
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// File being downloaded
    pub filename: String,
    /// Original error message for details
    pub error_message: String,
}

impl RetryContext {
    /// Convenience constructor used throughout the retry logic.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        filename: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            filename: filename.into(),
            error_message: error_message.into(),
        }
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        format!(
            "Attempt {}/{} for {} failed with {} - retrying in {} seconds...",
            self.attempt,
            self.max_attempts,
            self.filename,
            self.error_type.description(),
            self.backoff_duration.as_secs()
        )
    }

    /// Format retry success message when a previous attempt eventually works.
    pub fn format_success(&self) -> String {
        format!(
            "Attempt {}/{} for {} succeeded",
            self.attempt, self.max_attempts, self.filename
        )
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        if self.error_type.is_retryable() {
            lines.push(format!(
                "[FAILED] {} failed after {} attempts",
                self.filename, self.attempt
            ));
        } else {
            lines.push(format!(
                "[FAILED] {} failed with a non-retryable error",
                self.filename
            ));
        }
        lines.push(format!("  Last error: {}", self.error_message));
        lines.push("  Suggestions:".to_string());

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-attempts (current: {})",
                self.max_attempts
            ));
        }
        suggestions
    }
}

/// Extract a [`RetryErrorType`] from an HTTP status or reqwest error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        match status.as_u16() {
            400 => return RetryErrorType::InvalidRequest,
            401 | 403 => return RetryErrorType::AuthFailed(status.as_u16()),
            408 => return RetryErrorType::NetworkTimeout,
            429 => return RetryErrorType::RateLimit,
            _ => {}
        }

        if status.is_server_error() {
            return RetryErrorType::ServerError(status.as_u16());
        }

        if status.is_client_error() {
            return RetryErrorType::ClientError(status.as_u16());
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }

        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }

        if err.is_builder() {
            return RetryErrorType::InvalidRequest;
        }
    }

    RetryErrorType::NetworkGeneric
}
