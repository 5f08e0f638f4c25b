use std::path::PathBuf;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use xfer_core::client::Client;
use xfer_core::transport::TransportConfig;
use xfer_core::wire::{STATUS_HEADER, STATUS_SUCCESS};

fn unique_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}-{}", uuid::Uuid::new_v4()))
}

#[tokio::test]
async fn ping_reports_round_trip_latency() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).insert_header(STATUS_HEADER, STATUS_SUCCESS).set_body_string("pong"))
        .mount(&server)
        .await;

    let client = Client::new(&server.uri(), TransportConfig::default()).unwrap();
    let latency = client.ping().await.unwrap();
    assert!(latency.as_secs() < 5);
}

#[tokio::test]
async fn ping_without_status_header_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = Client::new(&server.uri(), TransportConfig::default()).unwrap();
    assert!(client.ping().await.is_err());
}

#[tokio::test]
async fn list_parses_one_file_info_per_line() {
    let server = MockServer::start().await;
    let body = "{\"Name\":\"a.txt\",\"Size\":12,\"ModTime\":1700000000}\n{\"Name\":\"b.txt\",\"Size\":34,\"ModTime\":1700000001}\n";
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).insert_header(STATUS_HEADER, STATUS_SUCCESS).set_body_string(body))
        .mount(&server)
        .await;

    let client = Client::new(&server.uri(), TransportConfig::default()).unwrap();
    let mut names = Vec::new();
    client.list(|info| names.push(info.name)).await.unwrap();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
}

#[tokio::test]
async fn failure_status_header_surfaces_the_body_as_the_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/delete"))
        .respond_with(
            ResponseTemplate::new(400)
                .insert_header(STATUS_HEADER, "failure")
                .set_body_string("thing.txt not exist"),
        )
        .mount(&server)
        .await;

    let client = Client::new(&server.uri(), TransportConfig::default()).unwrap();
    let err = client.delete("thing.txt").await.unwrap_err();
    assert!(err.to_string().contains("not exist"));
}

#[tokio::test]
async fn get_downloads_a_ranged_file_and_reports_progress() {
    let server = MockServer::start().await;
    let body = vec![7u8; 32 * 1024];

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(STATUS_HEADER, STATUS_SUCCESS)
                .set_body_bytes(body.clone())
                .insert_header("Accept-Ranges", "bytes")
                .insert_header("Content-Length", body.len().to_string()),
        )
        .mount(&server)
        .await;

    let client = Client::new(&server.uri(), TransportConfig::default()).unwrap();
    let out = unique_path("client-get");
    let mut seen_bytes: u64 = 0;
    client
        .get(4, "remote.bin", &out, |ev| {
            if !ev.before {
                seen_bytes += ev.bytes_delta as u64;
            }
        })
        .await
        .unwrap();

    let got = tokio::fs::read(&out).await.unwrap();
    assert_eq!(got, body);
    assert_eq!(seen_bytes, body.len() as u64);
    let _ = tokio::fs::remove_file(&out).await;
}
