//! Optional Prometheus metrics for download runs
//!
//! Nothing is exported unless [`init_metrics`] is called (`--metrics-addr`).
//! Without an installed recorder the `metrics` macros are no-ops, so callers
//! record unconditionally.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::fetcher::{RetryErrorType, TransferError};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Errors raised while installing the exporter
#[derive(Debug, thiserror::Error)]
#[error("failed to install Prometheus exporter on {addr}: {message}")]
pub struct MetricsError {
    addr: SocketAddr,
    message: String,
}

/// Install the Prometheus exporter on `addr`.
///
/// Idempotent: later calls are ignored.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError {
            addr,
            message: e.to_string(),
        })?;

    describe_counter!(
        "downloads_completed_total",
        Unit::Count,
        "Model files published"
    );
    describe_counter!(
        "downloads_failed_total",
        Unit::Count,
        "Model files that failed after all attempts"
    );
    describe_counter!(
        "download_bytes_total",
        Unit::Bytes,
        "Bytes of published model files"
    );
    describe_counter!(
        "download_retries_total",
        Unit::Count,
        "Retried transfer attempts"
    );
    describe_histogram!(
        "download_duration_seconds",
        Unit::Seconds,
        "Time from first attempt to a published file"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    *initialized = true;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Check if the exporter is installed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

fn kind_label(kind: RetryErrorType) -> &'static str {
    match kind {
        RetryErrorType::NetworkTimeout => "timeout",
        RetryErrorType::NetworkOffline => "offline",
        RetryErrorType::RateLimit => "rate_limit",
        RetryErrorType::ServerError(_) => "server_error",
        RetryErrorType::InvalidRequest => "invalid_request",
        RetryErrorType::AuthFailed(_) => "auth",
        RetryErrorType::ClientError(_) => "client_error",
        RetryErrorType::SizeMismatch => "size_mismatch",
        RetryErrorType::LocalIo => "local_io",
        RetryErrorType::NetworkGeneric => "network",
    }
}

/// Record one retry and its backoff
pub fn record_retry_backoff(duration: Duration, attempt: u32, kind: RetryErrorType) {
    counter!("download_retries_total", "kind" => kind_label(kind)).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Per-file download metrics
pub struct DownloadMetrics {
    model: String,
    filename: String,
    start_time: Instant,
}

impl DownloadMetrics {
    /// Start tracking one file
    pub fn start(model: impl Into<String>, filename: impl Into<String>) -> Self {
        let model = model.into();
        let filename = filename.into();
        debug!(model = %model, filename = %filename, "Transfer started");

        Self {
            model,
            filename,
            start_time: Instant::now(),
        }
    }

    /// Record a published file
    pub fn record_success(&self, bytes: u64, attempts: u32) {
        let duration = self.start_time.elapsed();

        counter!("downloads_completed_total").increment(1);
        counter!("download_bytes_total").increment(bytes);
        histogram!("download_duration_seconds").record(duration.as_secs_f64());

        info!(
            model = %self.model,
            filename = %self.filename,
            bytes = bytes,
            attempts = attempts,
            duration_ms = duration.as_millis() as u64,
            "Download completed successfully"
        );
    }

    /// Record a file that failed
    pub fn record_failure(&self, error: &TransferError) {
        counter!("downloads_failed_total", "kind" => kind_label(error.kind())).increment(1);

        warn!(
            model = %self.model,
            filename = %self.filename,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Download failed"
        );
    }
}
