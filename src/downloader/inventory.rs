//! Inventory scan of the target directory
//!
//! Pure observation: the scan stats files and never modifies the directory.

use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;

use crate::FileDescriptor;

/// On-disk state of one descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    /// Final file exists with exactly the expected size.
    Complete,
    /// Neither the final file nor its temporary sibling exists.
    Missing,
    /// Something is there but it is not a complete file: a final file of the
    /// wrong size, a leftover temporary file, or an entry that is not a
    /// regular file.
    Incomplete,
}

impl InventoryStatus {
    /// Whether the file must be (re)fetched.
    pub fn needs_transfer(&self) -> bool {
        !matches!(self, Self::Complete)
    }
}

/// One descriptor with its observed status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    /// Scanned descriptor
    pub descriptor: FileDescriptor,
    /// Observed status
    pub status: InventoryStatus,
}

/// Counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InventorySummary {
    /// Files already present
    pub complete: usize,
    /// Files absent
    pub missing: usize,
    /// Files present but unusable
    pub incomplete: usize,
}

impl InventorySummary {
    /// Tally a scan.
    pub fn from_entries(entries: &[InventoryEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut summary, entry| {
            match entry.status {
                InventoryStatus::Complete => summary.complete += 1,
                InventoryStatus::Missing => summary.missing += 1,
                InventoryStatus::Incomplete => summary.incomplete += 1,
            }
            summary
        })
    }

    /// Files that will be scheduled.
    pub fn to_transfer(&self) -> usize {
        self.missing + self.incomplete
    }
}

/// Classify a single descriptor against `dir`.
///
/// A final file with the right size is complete even when a stale temporary
/// sibling is still lying around; the next transfer of that file would
/// overwrite the temporary anyway.
pub fn classify(dir: &Path, descriptor: &FileDescriptor) -> InventoryStatus {
    let final_path = descriptor.final_path(dir);
    match fs::metadata(&final_path) {
        Ok(meta) if meta.is_file() && meta.len() == descriptor.expected_size() => {
            InventoryStatus::Complete
        }
        Ok(_) => InventoryStatus::Incomplete,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if fs::symlink_metadata(descriptor.temp_path(dir)).is_ok() {
                InventoryStatus::Incomplete
            } else {
                InventoryStatus::Missing
            }
        }
        Err(e) => {
            warn!(path = %final_path.display(), error = %e, "Cannot stat file, scheduling it again");
            InventoryStatus::Incomplete
        }
    }
}

/// Whether `filename` is already published in `dir` as a regular file.
///
/// Files only reach their final name after a size check, so a present final
/// file needs no remote size lookup.
pub fn is_published(dir: &Path, filename: &str) -> bool {
    fs::metadata(dir.join(filename)).is_ok_and(|meta| meta.is_file())
}

/// Classify every descriptor, preserving input order.
pub fn scan(dir: &Path, descriptors: &[FileDescriptor]) -> Vec<InventoryEntry> {
    descriptors
        .iter()
        .map(|descriptor| InventoryEntry {
            status: classify(dir, descriptor),
            descriptor: descriptor.clone(),
        })
        .collect()
}
