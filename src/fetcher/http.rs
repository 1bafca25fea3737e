//! HTTP transfer worker for the Topaz model CDN
//!
//! Every request carries the same identity: the Cloudflare clearance cookie,
//! a `vaimm/<version>` user agent and `Accept-Encoding: identity`, so the
//! advertised length is the length of the bytes written to disk.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONTENT_LENGTH, COOKIE, USER_AGENT,
};
use reqwest::Client;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, trace};

use super::probe::SizeProbe;
use super::{extract_error_type, FileTransfer, RetryErrorType, TransferError};
use crate::cancel::RunCancellation;
use crate::downloader::config::{CHUNK_SIZE, CHUNK_TIMEOUT, CONNECT_TIMEOUT};
use crate::downloader::progress::{ProgressEvent, ProgressSink};
use crate::FileDescriptor;

/// Identity presented to the CDN
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    cookie: String,
    user_agent: String,
}

impl ClientIdentity {
    /// Identity with the given `cf_clearance` cookie value and the default user agent.
    pub fn new(cookie: impl Into<String>) -> Self {
        Self {
            cookie: cookie.into(),
            user_agent: format!("vaimm/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Override the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// User agent sent with each request.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn headers(&self) -> Result<HeaderMap, TransferError> {
        let cookie = HeaderValue::from_str(&format!("cf_clearance={}", self.cookie))
            .map_err(|_| TransferError::Client("cookie contains invalid characters".into()))?;
        let user_agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|_| TransferError::Client("user agent contains invalid characters".into()))?;

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, cookie);
        headers.insert(USER_AGENT, user_agent);
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        Ok(headers)
    }
}

/// Build the HTTP client shared by the transfer worker and the size probe.
pub fn build_client(identity: &ClientIdentity) -> Result<Client, TransferError> {
    Client::builder()
        .default_headers(identity.headers()?)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| TransferError::Client(e.to_string()))
}

/// `Content-Length` header value, read directly so HEAD responses work too.
pub(crate) fn advertised_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Streaming HTTP implementation of [`FileTransfer`]
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    /// Create a worker presenting `identity`.
    pub fn new(identity: &ClientIdentity) -> Result<Self, TransferError> {
        Ok(Self {
            client: build_client(identity)?,
        })
    }

    /// Create a worker on an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Size probe sharing this worker's connection pool.
    pub fn size_probe(&self) -> SizeProbe {
        SizeProbe::with_client(self.client.clone())
    }
}

#[async_trait]
impl FileTransfer for HttpTransfer {
    async fn transfer(
        &self,
        descriptor: &FileDescriptor,
        dir: &Path,
        progress: &dyn ProgressSink,
        cancel: &RunCancellation,
    ) -> Result<u64, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let url = descriptor.url();
        let expected = descriptor.expected_size();

        let response = tokio::select! {
            response = self.client.get(url).send() => {
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

        if let Some(advertised) = advertised_length(response.headers()) {
            if advertised != expected {
                return Err(TransferError::LengthMismatch {
                    filename: descriptor.filename().to_string(),
                    expected,
                    advertised,
                });
            }
        }

        // A fresh temp file per attempt; leftovers from earlier runs are truncated.
        let temp_path = descriptor.temp_path(dir);
        let file = File::create(&temp_path)
            .await
            .map_err(|e| TransferError::io(&temp_path, e))?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        debug!(filename = %descriptor.filename(), expected, "Streaming into temporary file");

        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(CHUNK_TIMEOUT, stream.next()) => next,
                _ = cancel.cancelled() => {
                    let _ = writer.flush().await;
                    return Err(TransferError::Cancelled);
                }
            };

            let chunk = match next {
                Err(_) => {
                    return Err(TransferError::Request {
                        url: url.to_string(),
                        kind: RetryErrorType::NetworkTimeout,
                        message: format!("no data received for {}s", CHUNK_TIMEOUT.as_secs()),
                    })
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(TransferError::from_reqwest(url, &e)),
                Ok(Some(Ok(chunk))) => chunk,
            };

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(&temp_path, e))?;
            written += chunk.len() as u64;
            trace!(filename = %descriptor.filename(), written, "Chunk written");

            progress.on_event(ProgressEvent::Chunk {
                descriptor_id: descriptor.id(),
                filename: descriptor.filename(),
                bytes: chunk.len() as u64,
            });

            if written > expected {
                let _ = writer.flush().await;
                return Err(TransferError::SizeMismatch {
                    filename: descriptor.filename().to_string(),
                    expected,
                    actual: written,
                });
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| TransferError::io(&temp_path, e))?;
        let file = writer.into_inner();
        file.sync_all()
            .await
            .map_err(|e| TransferError::io(&temp_path, e))?;
        drop(file);

        let actual = fs::metadata(&temp_path)
            .await
            .map_err(|e| TransferError::io(&temp_path, e))?
            .len();
        if actual != expected {
            return Err(TransferError::SizeMismatch {
                filename: descriptor.filename().to_string(),
                expected,
                actual,
            });
        }

        let final_path = descriptor.final_path(dir);
        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| TransferError::io(&final_path, e))?;

        debug!(filename = %descriptor.filename(), bytes = actual, "Published");
        Ok(actual)
    }
}
