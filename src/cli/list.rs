//! Listing commands: backends, models and files

use clap::Args;
use std::path::PathBuf;

use super::download::{Cli, SelectionArgs};
use super::CliError;
use crate::catalog::{Catalog, GpuFamily, Model, TensorRtTarget};
use crate::config::ConfigResolver;

/// Average model file size used for the download estimate, in MiB
const AVERAGE_FILE_MIB: f64 = 91.0;

const DESCRIPTION_WIDTH: usize = 78;
const DESCRIPTION_INDENT: usize = 11;

/// Arguments for the list-models command
#[derive(Args, Debug)]
pub struct ListModelsArgs {
    /// Backend to list models for [env: TVAI_BACKEND]
    #[arg(long, value_name = "NAME")]
    pub backend: Option<String>,

    /// GPU family for TensorRT engines (RTX20, RTX30, RTX40)
    #[arg(long, value_name = "FAMILY")]
    pub gpu_family: Option<GpuFamily>,
}

/// Arguments for the list-files command
#[derive(Args, Debug)]
pub struct ListFilesArgs {
    /// Model selection
    #[command(flatten)]
    pub selection: SelectionArgs,
}

fn load_catalog(cli: &Cli, resolver: &ConfigResolver) -> Result<Catalog, CliError> {
    let json_dir: PathBuf = resolver.json_dir(cli.json_dir.as_deref())?.value;
    Ok(Catalog::load(&json_dir)?)
}

fn tensorrt_target(gpu_family: Option<GpuFamily>) -> Result<Option<TensorRtTarget>, CliError> {
    Ok(gpu_family.map(TensorRtTarget::for_current_os).transpose()?)
}

/// Execute the list-backends command.
pub fn list_backends(cli: &Cli) -> Result<(), CliError> {
    let catalog = load_catalog(cli, &ConfigResolver::from_process_env())?;
    println!("{}", render_backends(&catalog.backends()));
    Ok(())
}

impl ListModelsArgs {
    /// Execute the list-models command.
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let resolver = ConfigResolver::from_process_env();
        let backend = resolver.backend(self.backend.as_deref())?.value;
        let catalog = load_catalog(cli, &resolver)?;
        let tensorrt = tensorrt_target(self.gpu_family)?;

        let models = catalog.models(&backend, tensorrt.as_ref())?;
        println!("{}", render_models(&models));
        Ok(())
    }
}

impl ListFilesArgs {
    /// Execute the list-files command. The header and size estimate go to
    /// stderr so the file list can be piped.
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let resolver = ConfigResolver::from_process_env();
        let backend = resolver.backend(self.selection.backend.as_deref())?.value;
        let catalog = load_catalog(cli, &resolver)?;
        let tensorrt = tensorrt_target(self.selection.gpu_family)?;

        let files = catalog.files(
            &backend,
            self.selection.include.as_deref(),
            tensorrt.as_ref(),
        )?;
        let mut names: Vec<String> = files.into_iter().map(|f| f.filename).collect();
        names.sort();

        eprintln!("Model files:\n");
        println!("{}", names.join("\n"));
        eprintln!(
            "\nEstimated total size: {:.2} GiB",
            estimated_gib(names.len())
        );
        Ok(())
    }
}

/// "Supported backends: a, b, c"
pub fn render_backends(backends: &[String]) -> String {
    format!("Supported backends: {}", backends.join(", "))
}

/// Model listing with each description wrapped and indented under its name.
pub fn render_models(models: &[Model]) -> String {
    let indent = " ".repeat(DESCRIPTION_INDENT);
    let mut out = String::from("Available models:");
    for model in models {
        out.push_str(&format!("\n\n* {:<8} {}", model.key(), model.name));
        for line in wrap(&model.desc, DESCRIPTION_WIDTH) {
            out.push('\n');
            out.push_str(&indent);
            out.push_str(&line);
        }
    }
    out
}

/// Rough download size for `files` model files.
pub fn estimated_gib(files: usize) -> f64 {
    files as f64 * AVERAGE_FILE_MIB / 1024.0
}

/// Greedy word wrap. Whitespace runs collapse to one space; words longer
/// than `width` are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        loop {
            let line_len = line.chars().count();
            let needed = if line.is_empty() { word.len() } else { line_len + 1 + word.len() };
            if needed <= width {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.extend(word.iter());
                break;
            }
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
                continue;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}
