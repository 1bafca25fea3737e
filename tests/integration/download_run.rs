//! End-to-end download runs: manifest catalog, size probe, coordinator and
//! transfer worker against a local CDN double

use httpmock::prelude::*;
use httpmock::Method::HEAD;
use httpmock::Mock;
use std::sync::Arc;
use tempfile::TempDir;
use vaimm::cancel::{CancelReason, RunCancellation};
use vaimm::catalog::Catalog;
use vaimm::cli::{run_download, CliError};
use vaimm::config::DownloadSettings;
use vaimm::downloader::{NullSink, RetryPolicy, RunStatus};

const PROB: &str = r#"{
    "shortName": "prob", "version": 3,
    "gui": {"name": "Proteus", "desc": "Fine tune manually."},
    "backends": {
        "onnx": {"scales": {"1": {"nets": ["fp32-[W]x[H]-ox.tz"], "blocks": [128, 64, 256, 128, 512, 256]}}}
    }
}"#;

const FILES: [(&str, usize); 3] = [
    ("prob-v3-fp32-128x64-ox.tz", 1_000),
    ("prob-v3-fp32-256x128-ox.tz", 20_000),
    ("prob-v3-fp32-512x256-ox.tz", 300),
];

struct Fixture {
    json_dir: TempDir,
    model_dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let json_dir = TempDir::new().unwrap();
        std::fs::write(json_dir.path().join("prob-3.json"), PROB).unwrap();
        Self {
            json_dir,
            model_dir: TempDir::new().unwrap(),
        }
    }

    fn settings(&self, threads: usize) -> DownloadSettings {
        DownloadSettings {
            json_dir: self.json_dir.path().to_path_buf(),
            backend: "onnx".to_string(),
            model_dir: self.model_dir.path().to_path_buf(),
            cookie: "test-cookie".to_string(),
            threads,
            ..DownloadSettings::default()
        }
    }

    fn catalog(&self, server: &MockServer) -> Catalog {
        Catalog::load(self.json_dir.path())
            .unwrap()
            .with_base_url(server.base_url())
    }
}

async fn serve_head<'a>(server: &'a MockServer, filename: &str, size: usize) -> Mock<'a> {
    let path = format!("/{filename}");
    server
        .mock_async(|when, then| {
            when.method(HEAD).path(path);
            then.status(200).header("content-length", size.to_string());
        })
        .await
}

async fn serve_get<'a>(server: &'a MockServer, filename: &str, size: usize) -> Mock<'a> {
    let path = format!("/{filename}");
    server
        .mock_async(|when, then| {
            when.method(GET).path(path);
            then.status(200).body(vec![b'x'; size]);
        })
        .await
}

#[tokio::test]
async fn test_fetches_every_missing_file() {
    let server = MockServer::start_async().await;
    let fixture = Fixture::new();
    for (name, size) in FILES {
        serve_head(&server, name, size).await;
        serve_get(&server, name, size).await;
    }

    let result = run_download(
        &fixture.settings(2),
        &fixture.catalog(&server),
        RetryPolicy::immediate(3),
        Arc::new(NullSink),
        RunCancellation::shared(),
    )
    .await
    .unwrap();

    assert_eq!(result.total_files_requested, 3);
    assert_eq!(result.files_succeeded, 3);
    assert_eq!(result.files_failed, 0);
    assert_eq!(result.total_bytes_transferred, 21_300);
    assert_eq!(result.exit_code(), 0);

    for (name, size) in FILES {
        let path = fixture.model_dir.path().join(name);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size as u64);
        assert!(!fixture
            .model_dir
            .path()
            .join(format!("{name}.incomplete"))
            .exists());
    }
}

#[tokio::test]
async fn test_complete_files_are_not_fetched_again() {
    let server = MockServer::start_async().await;
    let fixture = Fixture::new();
    let (present, present_size) = FILES[1];
    std::fs::write(fixture.model_dir.path().join(present), vec![b'x'; present_size]).unwrap();

    let mut heads = Vec::new();
    let mut gets = Vec::new();
    for (name, size) in FILES {
        heads.push(serve_head(&server, name, size).await);
        gets.push(serve_get(&server, name, size).await);
    }

    let result = run_download(
        &fixture.settings(4),
        &fixture.catalog(&server),
        RetryPolicy::immediate(3),
        Arc::new(NullSink),
        RunCancellation::shared(),
    )
    .await
    .unwrap();

    assert_eq!(result.total_files_requested, 2);
    assert_eq!(result.files_succeeded, 2);
    assert_eq!(result.total_bytes_transferred, 1_300);
    assert_eq!(gets[0].calls_async().await, 1);
    assert_eq!(gets[1].calls_async().await, 0);
    assert_eq!(gets[2].calls_async().await, 1);
    assert_eq!(heads[1].calls_async().await, 0, "present files need no size lookup");
}

/// A present file whose size lookup would fail, with the given status.
async fn run_with_failing_lookup_on_present_file(status: u16) {
    let server = MockServer::start_async().await;
    let fixture = Fixture::new();
    let (present, present_size) = FILES[1];
    std::fs::write(fixture.model_dir.path().join(present), vec![b'x'; present_size]).unwrap();

    let mut gets = Vec::new();
    for (i, (name, size)) in FILES.into_iter().enumerate() {
        if i == 1 {
            let path = format!("/{name}");
            server
                .mock_async(|when, then| {
                    when.method(HEAD).path(path);
                    then.status(status);
                })
                .await;
        } else {
            serve_head(&server, name, size).await;
        }
        gets.push(serve_get(&server, name, size).await);
    }

    let result = run_download(
        &fixture.settings(2),
        &fixture.catalog(&server),
        RetryPolicy::immediate(3),
        Arc::new(NullSink),
        RunCancellation::shared(),
    )
    .await
    .unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded, "HTTP {status}");
    assert_eq!(result.files_failed, 0);
    assert_eq!(result.files_succeeded, 2);
    assert_eq!(result.exit_code(), 0);
    assert_eq!(gets[1].calls_async().await, 0);
}

#[tokio::test]
async fn test_unavailable_lookup_on_present_file_is_harmless() {
    run_with_failing_lookup_on_present_file(503).await;
}

#[tokio::test]
async fn test_missing_remote_on_present_file_does_not_abort() {
    run_with_failing_lookup_on_present_file(404).await;
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let server = MockServer::start_async().await;
    let fixture = Fixture::new();
    let mut gets = Vec::new();
    for (name, size) in FILES {
        serve_head(&server, name, size).await;
        gets.push(serve_get(&server, name, size).await);
    }
    let catalog = fixture.catalog(&server);

    for _ in 0..2 {
        let result = run_download(
            &fixture.settings(3),
            &catalog,
            RetryPolicy::immediate(3),
            Arc::new(NullSink),
            RunCancellation::shared(),
        )
        .await
        .unwrap();
        assert!(result.is_success());
    }

    for get in &gets {
        assert_eq!(get.calls_async().await, 1);
    }
}

#[tokio::test]
async fn test_rejected_credentials_abort_the_run() {
    let server = MockServer::start_async().await;
    let fixture = Fixture::new();
    let mut gets = Vec::new();
    for (i, (name, size)) in FILES.into_iter().enumerate() {
        serve_head(&server, name, size).await;
        if i == 0 {
            let path = format!("/{name}");
            gets.push(
                server
                    .mock_async(|when, then| {
                        when.method(GET).path(path);
                        then.status(403);
                    })
                    .await,
            );
        } else {
            gets.push(serve_get(&server, name, size).await);
        }
    }

    let result = run_download(
        &fixture.settings(1),
        &fixture.catalog(&server),
        RetryPolicy::immediate(5),
        Arc::new(NullSink),
        RunCancellation::shared(),
    )
    .await
    .unwrap();

    assert_eq!(gets[0].calls_async().await, 1, "fatal failures are not retried");
    assert_eq!(gets[1].calls_async().await, 0);
    assert_eq!(gets[2].calls_async().await, 0);
    assert_eq!(result.files_failed, 1);
    assert_eq!(result.files_cancelled, 2);
    assert!(matches!(
        result.status(),
        RunStatus::Aborted(CancelReason::Fatal { .. })
    ));
    assert_eq!(result.exit_code(), 1);
    assert!(!fixture.model_dir.path().join(FILES[0].0).exists());
}

#[tokio::test]
async fn test_unknown_size_is_a_file_failure() {
    let server = MockServer::start_async().await;
    let fixture = Fixture::new();
    for (i, (name, size)) in FILES.into_iter().enumerate() {
        if i == 2 {
            let path = format!("/{name}");
            server
                .mock_async(|when, then| {
                    when.method(HEAD).path(path);
                    then.status(503);
                })
                .await;
        } else {
            serve_head(&server, name, size).await;
        }
        serve_get(&server, name, size).await;
    }

    let result = run_download(
        &fixture.settings(2),
        &fixture.catalog(&server),
        RetryPolicy::immediate(2),
        Arc::new(NullSink),
        RunCancellation::shared(),
    )
    .await
    .unwrap();

    assert_eq!(result.total_files_requested, 3);
    assert_eq!(result.files_succeeded, 2);
    assert_eq!(result.files_failed, 1);
    assert_eq!(result.failures[0].filename, FILES[2].0);
    assert_eq!(result.status(), RunStatus::PartialFailure);
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn test_unknown_include_fails_before_any_request() {
    let server = MockServer::start_async().await;
    let fixture = Fixture::new();
    let head = serve_head(&server, FILES[0].0, FILES[0].1).await;

    let mut settings = fixture.settings(2);
    settings.include = Some("prob-3,alq-13".to_string());

    let err = run_download(
        &settings,
        &fixture.catalog(&server),
        RetryPolicy::immediate(2),
        Arc::new(NullSink),
        RunCancellation::shared(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CliError::Catalog(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("alq-13"));
    assert_eq!(head.calls_async().await, 0);
}
