//! Remote size discovery
//!
//! Manifests name files but not their sizes, so each catalog file is probed
//! with a `HEAD` request before the inventory scan. Probes share the transfer
//! worker's client, concurrency bound and retry policy.

use futures::stream::{self, StreamExt};
use reqwest::Client;
use tracing::{debug, error, info};

use super::http::{advertised_length, build_client, ClientIdentity};
use super::{extract_error_type, FailureClass, TransferError};
use crate::cancel::{CancelReason, RunCancellation};
use crate::catalog::CatalogFile;
use crate::downloader::job::FileFailure;
use crate::downloader::retry::RetryPolicy;
use crate::FileDescriptor;

/// Result of probing a batch of catalog files
#[derive(Debug, Default)]
pub struct ProbeReport {
    /// Files whose size is known, in catalog order
    pub descriptors: Vec<FileDescriptor>,
    /// Files whose size could not be determined
    pub failures: Vec<FileFailure>,
}

/// Looks up remote file sizes with `HEAD` requests
#[derive(Debug, Clone)]
pub struct SizeProbe {
    client: Client,
}

impl SizeProbe {
    /// Create a probe presenting `identity`.
    pub fn new(identity: &ClientIdentity) -> Result<Self, TransferError> {
        Ok(Self {
            client: build_client(identity)?,
        })
    }

    /// Create a probe on an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Size of the resource at `url`, from its `Content-Length`.
    pub async fn content_length(
        &self,
        url: &str,
        cancel: &RunCancellation,
    ) -> Result<u64, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let response = tokio::select! {
            response = self.client.head(url).send() => {
                response.map_err(|e| TransferError::from_reqwest(url, &e))?
            }
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                kind: extract_error_type(Some(status), None),
            });
        }

        advertised_length(response.headers()).ok_or_else(|| TransferError::UnknownSize {
            url: url.to_string(),
        })
    }

    /// Probe every file with at most `concurrency` requests in flight.
    ///
    /// A fatal answer (bad cookie, missing file) cancels `cancel` with a
    /// [`CancelReason::Fatal`]; the caller is expected to check it before
    /// scheduling downloads. Files that exhaust their retries are reported in
    /// [`ProbeReport::failures`].
    pub async fn probe_all(
        &self,
        files: Vec<CatalogFile>,
        concurrency: usize,
        policy: &RetryPolicy,
        cancel: &RunCancellation,
    ) -> ProbeReport {
        info!(files = files.len(), "Looking up remote file sizes");

        let mut results = stream::iter(files)
            .map(|file| async move {
                let outcome = policy
                    .run(&file.filename, cancel, |_| self.content_length(&file.url, cancel))
                    .await;
                (file, outcome.result)
            })
            .buffered(concurrency.max(1));

        let mut report = ProbeReport::default();
        while let Some((file, result)) = results.next().await {
            match result {
                Ok(size) => {
                    debug!(filename = %file.filename, size, "Probed");
                    report.descriptors.push(FileDescriptor::new(
                        file.model_key,
                        file.filename,
                        file.url,
                        size,
                    ));
                }
                Err(err) => match err.class() {
                    FailureClass::Cancelled => {}
                    FailureClass::Fatal => {
                        error!(filename = %file.filename, error = %err, "Size lookup failed fatally");
                        cancel.cancel(CancelReason::Fatal {
                            filename: file.filename.clone(),
                            message: err.to_string(),
                        });
                        report.failures.push(FileFailure {
                            filename: file.filename,
                            reason: err.to_string(),
                        });
                    }
                    FailureClass::Retryable => report.failures.push(FileFailure {
                        filename: file.filename,
                        reason: err.to_string(),
                    }),
                },
            }
        }
        report
    }
}
