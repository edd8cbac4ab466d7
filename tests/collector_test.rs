//! Collector behaviour against a live local HTTP server

use axum::http::{StatusCode, header};
use axum::{Router, routing::get};
use gridfetch::collector::{
    ApiDataCollector, BackoffPolicy, CredentialProvider, HttpClient, HttpConfig, RecordingSleep,
    StaticSecrets,
};
use gridfetch::endpoint::EndpointSpec;
use gridfetch::format::DataFormat;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

const LMP_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<FiveMinLmps>
  <FiveMinLmp>
    <BeginDate>2025-06-24T10:05:00.000-04:00</BeginDate>
    <Location LocId="4000" LocType="HUB">.H.INTERNAL_HUB</Location>
    <LmpTotal>31.42</LmpTotal>
  </FiveMinLmp>
  <FiveMinLmp>
    <BeginDate>2025-06-24T10:05:00.000-04:00</BeginDate>
    <Location LocId="4001" LocType="LOAD ZONE">.Z.MAINE</Location>
    <LmpTotal>29.87</LmpTotal>
  </FiveMinLmp>
</FiveMinLmps>"#;

async fn start_mock_server() -> String {
    let app = Router::new()
        .route(
            "/lmp",
            get(|| async { ([(header::CONTENT_TYPE, "application/xml")], LMP_XML) }),
        )
        .route(
            "/load.csv",
            // mislabelled on purpose; detection falls back to content
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/octet-stream")],
                    "hour,zone,mw\n1,ME,1210\n2,ME,1185\n",
                )
            }),
        )
        .route("/empty", get(|| async { StatusCode::OK }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "hour,mw\n1,100\n"
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

fn collector() -> ApiDataCollector {
    ApiDataCollector::new(
        HttpClient::new(HttpConfig::default()).unwrap(),
        CredentialProvider::new(Arc::new(StaticSecrets::new())),
        BackoffPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
            jitter: 0.0,
        },
    )
    .with_sleeper(Arc::new(RecordingSleep::new()))
}

fn spec(base_url: &str, path: &str, name: &str) -> EndpointSpec {
    EndpointSpec::builder()
        .name(name)
        .url(format!("{base_url}{path}"))
        .output_folder(format!("iso_ne/{name}"))
        .max_retries(1)
        .build()
}

#[tokio::test]
async fn test_collect_stages_raw_body() {
    let base_url = start_mock_server().await;
    let staging = TempDir::new().unwrap();
    let collector = collector().with_staging_dir(staging.path());

    let result = collector.collect(&spec(&base_url, "/lmp", "lmp")).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.detected_format, Some(DataFormat::Xml));
    assert_eq!(result.content_type.as_deref(), Some("application/xml"));
    assert_eq!(result.payload_size, LMP_XML.len());

    let path = result.staging_path.expect("payload should be staged");
    assert!(path.starts_with(staging.path().join("iso_ne/lmp")));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("xml"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), LMP_XML);
}

#[tokio::test]
async fn test_collect_all_keeps_input_order() {
    let base_url = start_mock_server().await;
    let collector = collector().with_concurrency(2);

    let specs = vec![
        spec(&base_url, "/lmp", "lmp"),
        spec(&base_url, "/load.csv", "load"),
        spec(&base_url, "/empty", "empty"),
        spec(&base_url, "/missing", "missing"),
    ];

    let results = collector.collect_all(&specs).await;
    let names: Vec<&str> = results.iter().map(|r| r.endpoint.as_str()).collect();
    assert_eq!(names, ["lmp", "load", "empty", "missing"]);

    assert_eq!(results[0].detected_format, Some(DataFormat::Xml));
    assert_eq!(results[1].detected_format, Some(DataFormat::Csv));

    assert!(!results[2].success);
    assert_eq!(results[2].error_code(), Some("FORMAT_DETECTION_ERROR"));
    assert_eq!(results[2].attempts, 1);

    assert_eq!(results[3].error_code(), Some("HTTP_ERROR"));
    assert_eq!(results[3].http_status, Some(404));
    assert_eq!(results[3].attempts, 1);

    let metrics = collector.metrics().snapshot();
    assert_eq!(metrics.collections_succeeded, 2);
    assert_eq!(metrics.collections_failed, 2);
}

#[tokio::test]
async fn test_timeout_is_retried_as_network_error() {
    let base_url = start_mock_server().await;
    let collector = collector();

    let mut slow = spec(&base_url, "/slow", "slow");
    slow.timeout_ms = 100;
    slow.max_retries = 2;

    let result = collector.collect(&slow).await;

    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.error_code(), Some("NETWORK_ERROR"));
    assert_eq!(result.http_status, None);
    assert_eq!(collector.metrics().snapshot().http_retries, 2);
}
