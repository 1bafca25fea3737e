//! CLI command implementations

pub mod download;
pub mod error;
pub mod list;
pub mod progress;

pub use download::{run_download, Cli, Commands, DownloadArgs, OutputFormat, SelectionArgs};
pub use error::CliError;
pub use list::{ListFilesArgs, ListModelsArgs};
pub use progress::TerminalSink;
