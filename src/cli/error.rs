//! CLI error types and conversions

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::fetcher::TransferError;
use crate::metrics::MetricsError;

/// Exit code for configuration and argument errors (matches clap's usage errors)
pub const EXIT_CONFIG: i32 = 2;

/// Exit code for download and runtime failures
pub const EXIT_FAILURE: i32 = 1;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Manifest catalog error
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// HTTP client setup error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Writing output failed
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Catalog(_) => EXIT_CONFIG,
            Self::Transfer(TransferError::Client(_)) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }
}
