//! Progress reporting for a download run.
//!
//! Transfers emit a [`ProgressEvent`] for every chunk they write. The events
//! reach a [`ProgressSink`], which may render a progress bar, write log lines
//! or do nothing at all. A sink's methods return nothing, so rendering can never
//! change the outcome of a transfer.
//!
//! [`ProgressState`] contains the byte accounting (percentage, rate and ETA)
//! shared by the sinks.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use super::job::{AggregateResult, TransferOutcome};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_DOWNLOAD_DURATION: Duration = Duration::from_secs(30);

/// A single progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent<'a> {
    /// A chunk of `bytes` was written to the temporary file.
    Chunk {
        /// Model id of the file
        descriptor_id: &'a str,
        /// File being fetched
        filename: &'a str,
        /// Bytes written by this chunk
        bytes: u64,
    },
    /// A failed attempt's bytes were thrown away and will be fetched again.
    Discarded {
        /// Model id of the file
        descriptor_id: &'a str,
        /// File being fetched
        filename: &'a str,
        /// Bytes reported by the failed attempt
        bytes: u64,
    },
}

impl ProgressEvent<'_> {
    /// Signed byte delta this event contributes to the run total.
    pub fn delta(&self) -> i128 {
        match self {
            Self::Chunk { bytes, .. } => i128::from(*bytes),
            Self::Discarded { bytes, .. } => -i128::from(*bytes),
        }
    }

    /// File this event belongs to.
    pub fn filename(&self) -> &str {
        match self {
            Self::Chunk { filename, .. } | Self::Discarded { filename, .. } => filename,
        }
    }
}

/// Consumer of progress events and the final result.
///
/// Events arrive concurrently from every running transfer, so
/// implementations must be cheap and internally synchronized.
pub trait ProgressSink: Send + Sync {
    /// Called once before the first transfer starts.
    fn on_start(&self, _files: usize, _total_bytes: u64) {}

    /// Called for every chunk written (and every discarded attempt).
    fn on_event(&self, event: ProgressEvent<'_>);

    /// Called when a unit reaches its terminal state.
    fn on_file_finished(&self, _outcome: &TransferOutcome) {}

    /// Called once with the final aggregate.
    fn on_finish(&self, _result: &AggregateResult) {}
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_event(&self, _event: ProgressEvent<'_>) {}
}

/// Byte accounting for a whole run.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Bytes fetched so far (net of discarded attempts).
    pub bytes_downloaded: u64,
    /// Total bytes scheduled for this run.
    pub total_expected: u64,
    /// Files finished so far, whatever their outcome.
    pub files_finished: usize,
    /// Files scheduled for this run.
    pub files_total: usize,
    /// Timestamp when the run started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based updates.
    pub update_interval: Duration,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create state for a run of `files_total` files totalling `total_expected` bytes.
    pub fn new(files_total: usize, total_expected: u64) -> Self {
        let now = Instant::now();
        Self {
            bytes_downloaded: 0,
            total_expected,
            files_finished: 0,
            files_total,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Apply a progress event.
    pub fn apply(&mut self, event: &ProgressEvent<'_>) {
        let next = i128::from(self.bytes_downloaded) + event.delta();
        self.bytes_downloaded = next.clamp(0, i128::from(u64::MAX)) as u64;
    }

    /// Average transfer rate since the run started, in bytes per second.
    pub fn rate(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bytes_downloaded as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_expected == 0 {
            return 100.0;
        }
        (self.bytes_downloaded as f64 / self.total_expected as f64 * 100.0).min(100.0)
    }

    /// Estimated time until every scheduled byte has arrived.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let rate = self.rate();
        let remaining = self.total_expected.saturating_sub(self.bytes_downloaded);
        if rate > 0.0 && remaining > 0 {
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        }
    }

    /// Whether a progress update should be emitted based on time or percentage.
    pub fn should_emit_update(&self) -> bool {
        if self.bytes_downloaded == 0 {
            return false;
        }

        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }

        self.start_time.elapsed() >= MIN_DOWNLOAD_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Human readable progress line.
    pub fn format_progress(&self) -> String {
        let mut line = format!(
            "[PROGRESS] Downloaded {} of {} - {:.1}% complete ({}/{} files) at {}/s",
            format_bytes(self.bytes_downloaded),
            format_bytes(self.total_expected),
            self.percentage(),
            self.files_finished,
            self.files_total,
            format_bytes(self.rate() as u64),
        );
        if let Some(eta) = self.estimate_remaining() {
            line.push_str(&format!(" - ~{} remaining", format_duration(eta)));
        }
        line
    }
}

/// Sink that periodically writes progress lines through `tracing`.
///
/// Used when stderr is not a terminal, so captured logs still show how a long
/// run is going.
#[derive(Debug)]
pub struct LogSink {
    state: Mutex<ProgressState>,
}

impl LogSink {
    /// Create a log sink. The totals are filled in by [`ProgressSink::on_start`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProgressState::new(0, 0)),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for LogSink {
    fn on_start(&self, files: usize, total_bytes: u64) {
        if let Ok(mut state) = self.state.lock() {
            *state = ProgressState::new(files, total_bytes);
        }
        info!(
            files = files,
            total_bytes = total_bytes,
            "Downloading {} files ({})",
            files,
            format_bytes(total_bytes)
        );
    }

    fn on_event(&self, event: ProgressEvent<'_>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.apply(&event);
        if state.should_emit_update() {
            info!("{}", state.format_progress());
            state.mark_emitted();
        }
    }

    fn on_file_finished(&self, _outcome: &TransferOutcome) {
        if let Ok(mut state) = self.state.lock() {
            state.files_finished += 1;
        }
    }
}

/// Format a byte count with binary units and two decimals ("1.50 MiB").
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Format a duration as "1h 2m", "3m 4s" or "5s".
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}
