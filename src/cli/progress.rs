//! Terminal progress bar

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::downloader::job::{AggregateResult, TransferOutcome, TransferStatus};
use crate::downloader::progress::{ProgressEvent, ProgressSink};

/// Byte-based progress bar on stderr
pub struct TerminalSink {
    bar: ProgressBar,
    files_total: AtomicUsize,
    files_done: AtomicUsize,
}

impl TerminalSink {
    /// Create a bar; it is sized by [`ProgressSink::on_start`].
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
                )
                .expect("hardcoded template is valid")
                .progress_chars("#>-"),
        );
        Self {
            bar,
            files_total: AtomicUsize::new(0),
            files_done: AtomicUsize::new(0),
        }
    }

    fn update_message(&self) {
        self.bar.set_message(format!(
            "{}/{} files",
            self.files_done.load(Ordering::Relaxed),
            self.files_total.load(Ordering::Relaxed)
        ));
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalSink {
    fn on_start(&self, files: usize, total_bytes: u64) {
        self.files_total.store(files, Ordering::Relaxed);
        self.bar.set_length(total_bytes);
        self.update_message();
    }

    fn on_event(&self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::Chunk { bytes, .. } => self.bar.inc(bytes),
            ProgressEvent::Discarded { bytes, .. } => {
                let position = self.bar.position().saturating_sub(bytes);
                self.bar.set_position(position);
            }
        }
    }

    fn on_file_finished(&self, outcome: &TransferOutcome) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
        if let TransferStatus::Failed { reason, .. } = &outcome.status {
            self.bar
                .println(format!("[FAILED] {}: {}", outcome.descriptor.filename(), reason));
        }
        self.update_message();
    }

    fn on_finish(&self, _result: &AggregateResult) {
        self.bar.finish_and_clear();
    }
}
