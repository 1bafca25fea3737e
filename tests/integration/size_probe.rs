//! Integration tests for remote size discovery

use httpmock::prelude::*;
use httpmock::Method::HEAD;
use vaimm::cancel::{CancelReason, RunCancellation};
use vaimm::catalog::CatalogFile;
use vaimm::downloader::RetryPolicy;
use vaimm::fetcher::{ClientIdentity, SizeProbe};

fn probe() -> SizeProbe {
    SizeProbe::new(&ClientIdentity::new("test-cookie")).unwrap()
}

fn catalog_file(server: &MockServer, filename: &str) -> CatalogFile {
    CatalogFile {
        model_key: "prob-3".to_string(),
        filename: filename.to_string(),
        url: server.url(format!("/{filename}")),
    }
}

#[tokio::test]
async fn test_head_content_length() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(HEAD)
                .path("/prob-v3.tz")
                .header("cookie", "cf_clearance=test-cookie");
            then.status(200).header("content-length", "4096");
        })
        .await;

    let size = probe()
        .content_length(&server.url("/prob-v3.tz"), &RunCancellation::new())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(size, 4096);
}

#[tokio::test]
async fn test_probe_all_keeps_order_and_reports_failures() {
    let server = MockServer::start_async().await;
    for (name, size) in [("a.tz", "100"), ("c.tz", "300")] {
        let path = format!("/{name}");
        server
            .mock_async(|when, then| {
                when.method(HEAD).path(path);
                then.status(200).header("content-length", size);
            })
            .await;
    }
    let unavailable = server
        .mock_async(|when, then| {
            when.method(HEAD).path("/b.tz");
            then.status(503);
        })
        .await;

    let files = vec![
        catalog_file(&server, "a.tz"),
        catalog_file(&server, "b.tz"),
        catalog_file(&server, "c.tz"),
    ];
    let cancel = RunCancellation::new();
    let report = probe()
        .probe_all(files, 3, &RetryPolicy::immediate(2), &cancel)
        .await;

    let names: Vec<&str> = report.descriptors.iter().map(|d| d.filename()).collect();
    assert_eq!(names, vec!["a.tz", "c.tz"]);
    assert_eq!(report.descriptors[1].expected_size(), 300);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].filename, "b.tz");
    assert_eq!(unavailable.calls_async().await, 2);
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn test_probe_rejection_cancels_run() {
    let server = MockServer::start_async().await;
    let forbidden = server
        .mock_async(|when, then| {
            when.method(HEAD).path("/a.tz");
            then.status(403);
        })
        .await;

    let cancel = RunCancellation::new();
    let report = probe()
        .probe_all(
            vec![catalog_file(&server, "a.tz")],
            1,
            &RetryPolicy::immediate(5),
            &cancel,
        )
        .await;

    assert_eq!(forbidden.calls_async().await, 1);
    assert!(report.descriptors.is_empty());
    assert!(matches!(
        cancel.reason(),
        Some(CancelReason::Fatal { filename, .. }) if filename == "a.tz"
    ));
}
