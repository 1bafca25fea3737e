//! CLI definition and the download command

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};

use super::list::{ListFilesArgs, ListModelsArgs};
use super::progress::TerminalSink;
use super::CliError;
use crate::cancel::SharedCancellation;
use crate::catalog::{Catalog, GpuFamily, TensorRtTarget};
use crate::config::{ConfigResolver, DownloadSettings};
use crate::downloader::config::MAX_CONCURRENCY;
use crate::downloader::inventory::is_published;
use crate::downloader::job::{AggregateResult, RunStatus};
use crate::downloader::progress::{format_bytes, format_duration, LogSink, ProgressSink};
use crate::downloader::{DownloadExecutor, RetryPolicy};
use crate::fetcher::{ClientIdentity, HttpTransfer};
use crate::metrics::init_metrics;

/// VAI Models Manager
#[derive(Parser, Debug)]
#[command(name = "vaimm")]
#[command(about = "Download Topaz Video AI models missing from your model data directory", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the model manifests, e.g. alq-13.json [env: TVAI_MODEL_DIR]
    #[arg(long, global = true, value_name = "PATH")]
    pub json_dir: Option<PathBuf>,

    /// Output format for the download summary (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the backends found in the manifests
    ListBackends,
    /// List the models available for a backend
    ListModels(ListModelsArgs),
    /// List the model files a backend needs
    ListFiles(ListFilesArgs),
    /// Download model files missing from the model data directory
    Download(DownloadArgs),
}

/// Backend and model selection shared by `list-files` and `download`
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Backend to operate on [env: TVAI_BACKEND]
    #[arg(long, value_name = "NAME")]
    pub backend: Option<String>,

    /// Comma separated model keys to restrict to, e.g. "alq-13,prob-3"
    #[arg(long, value_name = "IDS")]
    pub include: Option<String>,

    /// GPU family for TensorRT engines (RTX20, RTX30, RTX40)
    #[arg(long, value_name = "FAMILY")]
    pub gpu_family: Option<GpuFamily>,
}

/// Arguments for the download command
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// Model selection
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Model data directory to download into [env: TVAI_MODEL_DATA_DIR]
    #[arg(short = 'd', long = "dir", value_name = "PATH")]
    pub dir: Option<PathBuf>,

    /// Value of the cf_clearance cookie for topazlabs.com [env: TVAI_COOKIE]
    #[arg(short = 'c', long, value_name = "VALUE")]
    pub cookie: Option<String>,

    /// Number of concurrent downloads (1-32)
    #[arg(short = 't', long, default_value = "4", value_parser = parse_concurrency)]
    pub threads: usize,

    /// Attempts per file before giving up (1-20)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: u32,

    /// Serve Prometheus metrics on this address while downloading
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Parse and validate the concurrent download count
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("threads must be at least 1".to_string());
    }

    if value > MAX_CONCURRENCY {
        return Err(format!(
            "threads cannot exceed {MAX_CONCURRENCY} (got {value})"
        ));
    }

    Ok(value)
}

impl DownloadArgs {
    /// Resolve every setting through flags, environment and platform defaults.
    pub fn settings(
        &self,
        cli: &Cli,
        resolver: &ConfigResolver,
    ) -> Result<DownloadSettings, CliError> {
        let json_dir = resolver.json_dir(cli.json_dir.as_deref())?;
        let backend = resolver.backend(self.selection.backend.as_deref())?;
        let model_dir = resolver.model_dir(self.dir.as_deref())?;
        let cookie = resolver.cookie(self.cookie.as_deref())?;

        info!(
            json_dir = %json_dir.value.display(),
            json_dir_source = ?json_dir.source,
            backend = %backend.value,
            model_dir = %model_dir.value.display(),
            cookie_source = ?cookie.source,
            "Configuration resolved"
        );

        let settings = DownloadSettings {
            json_dir: json_dir.value,
            backend: backend.value,
            include: self.selection.include.clone(),
            model_dir: model_dir.value,
            cookie: cookie.value,
            threads: self.threads,
            max_attempts: self.max_attempts,
            gpu_family: self.selection.gpu_family,
            metrics_addr: self.metrics_addr,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Execute the download command and print its summary.
    pub async fn execute(
        &self,
        cli: &Cli,
        cancel: SharedCancellation,
    ) -> Result<AggregateResult, CliError> {
        let settings = self.settings(cli, &ConfigResolver::from_process_env())?;

        if let Some(addr) = settings.metrics_addr {
            init_metrics(addr).await?;
            info!(%addr, "Prometheus metrics listener started");
        }

        let catalog = Catalog::load(&settings.json_dir)?;
        let sink: Arc<dyn ProgressSink> = if std::io::stderr().is_terminal() {
            Arc::new(TerminalSink::new())
        } else {
            Arc::new(LogSink::new())
        };

        let policy = RetryPolicy::new(settings.max_attempts);
        let result = run_download(&settings, &catalog, policy, sink, cancel).await?;

        match cli.output_format {
            OutputFormat::Human => println!("{}", render_summary(&result)),
            OutputFormat::Json => println!("{}", summary_json(&result)?),
        }
        Ok(result)
    }
}

/// Select files from `catalog`, look up their sizes and fetch the ones missing
/// from `settings.model_dir`.
///
/// Files already published under their final name are left alone without any
/// request. The others get a size lookup: files whose size cannot be
/// determined are reported as failures, and a fatal answer aborts the run
/// before any download starts.
pub async fn run_download(
    settings: &DownloadSettings,
    catalog: &Catalog,
    policy: RetryPolicy,
    sink: Arc<dyn ProgressSink>,
    cancel: SharedCancellation,
) -> Result<AggregateResult, CliError> {
    settings.validate()?;
    let started = Instant::now();

    let tensorrt = settings
        .gpu_family
        .map(TensorRtTarget::for_current_os)
        .transpose()?;
    let files = catalog.files(
        &settings.backend,
        settings.include.as_deref(),
        tensorrt.as_ref(),
    )?;
    let selected = files.len();
    let (present, absent): (Vec<_>, Vec<_>) = files
        .into_iter()
        .partition(|file| is_published(&settings.model_dir, &file.filename));
    info!(
        backend = %settings.backend,
        files = selected,
        present = present.len(),
        "Model files selected, {} already present",
        present.len()
    );

    let transfer = HttpTransfer::new(&ClientIdentity::new(&settings.cookie))?;
    let probe = transfer
        .size_probe()
        .probe_all(absent, settings.threads, &policy, &cancel)
        .await;

    let mut result = if cancel.is_cancelled() {
        warn!("Run cancelled while looking up file sizes, nothing downloaded");
        AggregateResult {
            cancelled_by: cancel.reason().cloned(),
            ..AggregateResult::default()
        }
    } else {
        DownloadExecutor::new(Arc::new(transfer), &settings.model_dir)
            .with_concurrency(settings.threads)
            .with_retry_policy(policy)
            .with_cancellation(cancel.clone())
            .execute(probe.descriptors, sink)
            .instrument(info_span!("download", backend = %settings.backend))
            .await
    };

    for failure in probe.failures {
        result.record_unscheduled_failure(failure.filename, failure.reason);
    }
    result.elapsed = started.elapsed();
    Ok(result)
}

/// Human readable end-of-run summary.
pub fn render_summary(result: &AggregateResult) -> String {
    let fetched = format_bytes(result.total_bytes_transferred);
    let elapsed = format_duration(result.elapsed);

    match result.status() {
        RunStatus::Succeeded if result.total_files_requested == 0 => {
            "No missing model files to download".to_string()
        }
        RunStatus::Succeeded => format!(
            "Download completed successfully with {fetched} of data fetched.\n\
             {} files downloaded in {elapsed}",
            result.files_succeeded
        ),
        status => {
            let mut out = format!(
                "Download finished with errors: {} succeeded, {} failed, {} cancelled, \
                 {fetched} of data fetched in {elapsed}",
                result.files_succeeded, result.files_failed, result.files_cancelled
            );
            for failure in &result.failures {
                out.push_str(&format!("\n  [FAILED] {}: {}", failure.filename, failure.reason));
            }
            if let RunStatus::Aborted(reason) = status {
                out.push_str(&format!("\nRun aborted: {reason}"));
            }
            out
        }
    }
}

/// Machine readable end-of-run summary.
pub fn summary_json(result: &AggregateResult) -> Result<String, CliError> {
    let mut value = serde_json::to_value(result)?;
    value["success"] = json!(result.is_success());
    value["aborted"] = json!(result.cancelled_by.as_ref().map(ToString::to_string));
    Ok(serde_json::to_string_pretty(&value)?)
}
