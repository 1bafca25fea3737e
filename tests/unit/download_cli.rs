//! Unit tests for command line parsing

use clap::Parser;
use std::path::PathBuf;
use vaimm::catalog::GpuFamily;
use vaimm::cli::{Cli, Commands, OutputFormat};

#[test]
fn test_download_with_all_flags() {
    let cli = Cli::try_parse_from([
        "vaimm",
        "--json-dir",
        "/opt/TopazVideoAIBETA/models",
        "download",
        "--backend",
        "tensorrt",
        "--include",
        "alq-13,prob-3",
        "-d",
        "/data/models",
        "-c",
        "abc",
        "-t",
        "8",
        "--max-attempts",
        "3",
        "--gpu-family",
        "RTX40",
        "--metrics-addr",
        "127.0.0.1:9100",
    ])
    .unwrap();

    assert_eq!(cli.json_dir, Some(PathBuf::from("/opt/TopazVideoAIBETA/models")));
    let Commands::Download(args) = cli.command else {
        panic!("expected download");
    };
    assert_eq!(args.selection.backend.as_deref(), Some("tensorrt"));
    assert_eq!(args.selection.include.as_deref(), Some("alq-13,prob-3"));
    assert_eq!(args.selection.gpu_family, Some(GpuFamily::Rtx40));
    assert_eq!(args.dir, Some(PathBuf::from("/data/models")));
    assert_eq!(args.cookie.as_deref(), Some("abc"));
    assert_eq!(args.threads, 8);
    assert_eq!(args.max_attempts, 3);
    assert_eq!(args.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
}

#[test]
fn test_listing_commands() {
    let cli = Cli::try_parse_from(["vaimm", "list-backends"]).unwrap();
    assert!(matches!(cli.command, Commands::ListBackends));

    let cli = Cli::try_parse_from(["vaimm", "list-models", "--backend", "onnx"]).unwrap();
    let Commands::ListModels(args) = cli.command else {
        panic!("expected list-models");
    };
    assert_eq!(args.backend.as_deref(), Some("onnx"));

    let cli = Cli::try_parse_from(["vaimm", "list-files", "--include", "alq-13"]).unwrap();
    let Commands::ListFiles(args) = cli.command else {
        panic!("expected list-files");
    };
    assert_eq!(args.selection.include.as_deref(), Some("alq-13"));
}

#[test]
fn test_invalid_invocations() {
    assert!(Cli::try_parse_from(["vaimm"]).is_err());
    assert!(Cli::try_parse_from(["vaimm", "upload"]).is_err());
    assert!(Cli::try_parse_from(["vaimm", "download", "--threads", "-1"]).is_err());
    assert!(Cli::try_parse_from(["vaimm", "download", "--metrics-addr", "nowhere"]).is_err());
    assert!(
        Cli::try_parse_from(["vaimm", "--output-format", "yaml", "list-backends"]).is_err()
    );
}

#[test]
fn test_output_format_default() {
    let cli = Cli::try_parse_from(["vaimm", "list-backends"]).unwrap();
    assert_eq!(cli.output_format, OutputFormat::Human);
}
