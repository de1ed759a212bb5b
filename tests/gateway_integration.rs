//! Integration tests for the download gateway
//!
//! Requests are dispatched through the router against in-memory metadata
//! and blob stores, so no MySQL or S3 is needed.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use clap::Parser;
use courier::config::Args;
use courier::db::InMemoryResolver;
use courier::server::{self, AppState};
use courier::storage::{BlobFetcher, ByteStream, FetchError, InMemoryBlobStore};
use courier::types::{FileDescriptor, SizeUnit};
use http_body_util::BodyExt;
use hyper::{header, Method, StatusCode};
use std::io::{Cursor, Read};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const PREFIX: &str = "https://ztfr.s3.eu-west-2.amazonaws.com/";

/// Blob store that refuses every request
struct UnreachableStore;

#[async_trait]
impl BlobFetcher for UnreachableStore {
    async fn open_stream(&self, _key: &str) -> Result<ByteStream, FetchError> {
        Err(FetchError::Transport("connection refused".to_string()))
    }
}

fn test_args() -> Args {
    Args::try_parse_from(["courier", "--bucket", "test-bucket", "--bundle-prefetch", "2"]).unwrap()
}

/// Helper to build state over fresh in-memory stores
fn create_state() -> (AppState, Arc<InMemoryResolver>, Arc<InMemoryBlobStore>) {
    let resolver = Arc::new(InMemoryResolver::new());
    let store = Arc::new(InMemoryBlobStore::with_chunk_size(5));
    let state = AppState::new(test_args(), resolver.clone(), store.clone());
    (state, resolver, store)
}

fn encode(id: &str) -> String {
    urlencoding::encode(&STANDARD.encode(id)).into_owned()
}

async fn get(
    state: &AppState,
    path: &str,
    query: Option<&str>,
) -> (StatusCode, hyper::HeaderMap, Bytes) {
    let response = server::route(state, &Method::GET, path, query).await;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

fn unzip(bytes: Bytes) -> zip::ZipArchive<Cursor<Vec<u8>>> {
    zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap()
}

fn entry(archive: &mut zip::ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    archive.by_name(name).unwrap().read_to_end(&mut out).unwrap();
    out
}

#[tokio::test]
async fn test_download_streams_object() {
    let (state, resolver, store) = create_state();
    resolver.insert(
        "42",
        FileDescriptor::new("uploads/2024/quarterly report.pdf", 2.0, SizeUnit::KB),
    );
    let data: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
    store.put("uploads/2024/quarterly report.pdf", data.clone());

    let query = format!("key={}", encode("42"));
    let (status, headers, body) = get(&state, "/api/download", Some(&query)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"quarterly report.pdf\""
    );
    assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(headers[header::CONTENT_LENGTH], "2048");
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-2047/2048");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(&body[..], &data[..]);
}

#[tokio::test]
async fn test_download_without_key_is_rejected() {
    let (state, resolver, store) = create_state();

    let (status, _, body) = get(&state, "/api/download", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"Invalid fileId");

    let (status, _, _) = get(&state, "/api/download", Some("key=")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(resolver.lookups(), 0);
    assert_eq!(store.opens(), 0);
}

#[tokio::test]
async fn test_download_unknown_identifier() {
    let (state, resolver, store) = create_state();

    let query = format!("key={}", encode("9999"));
    let (status, _, body) = get(&state, "/api/download", Some(&query)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"File not found");
    assert_eq!(resolver.lookups(), 1);
    assert_eq!(store.opens(), 0);
}

#[tokio::test]
async fn test_download_with_unreachable_store() {
    let resolver = Arc::new(InMemoryResolver::new());
    resolver.insert("1", FileDescriptor::new("a/b.txt", 1.0, SizeUnit::B));
    let state = AppState::new(test_args(), resolver, Arc::new(UnreachableStore));

    let query = format!("key={}", encode("1"));
    let (status, _, body) = get(&state, "/api/download", Some(&query)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(String::from_utf8_lossy(&body).contains("connection refused"));
}

#[tokio::test]
async fn test_team_download() {
    let (state, resolver, store) = create_state();
    store.put("team/17/notes.txt", &b"meeting notes"[..]);

    let query = format!("url={}", urlencoding::encode(&format!("{}team/17/notes.txt", PREFIX)));
    let (status, headers, body) = get(&state, "/api/downloadTeam", Some(&query)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notes.txt\""
    );
    assert!(headers.get(header::CONTENT_LENGTH).is_none());
    assert_eq!(&body[..], b"meeting notes");
    assert_eq!(resolver.lookups(), 0);
}

#[tokio::test]
async fn test_team_download_errors() {
    let (state, _, _) = create_state();

    let (status, _, body) = get(&state, "/api/downloadTeam", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], b"Invalid fileId");

    let query = format!("url={}", urlencoding::encode(&format!("{}team/missing.txt", PREFIX)));
    let (status, _, body) = get(&state, "/api/downloadTeam", Some(&query)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"No such key found");

    let broken = AppState::new(
        test_args(),
        Arc::new(InMemoryResolver::new()),
        Arc::new(UnreachableStore),
    );
    let (status, _, body) = get(&broken, "/api/downloadTeam", Some(&query)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], b"Error fetching the S3 object");
}

#[tokio::test]
async fn test_bundle_skips_missing_members() {
    let (state, resolver, store) = create_state();
    resolver.insert("1", FileDescriptor::new("u/alpha.txt", 5.0, SizeUnit::B));
    resolver.insert(
        "2",
        FileDescriptor::new("u/beta.txt", 4.0, SizeUnit::B).with_folder("Invoices"),
    );
    resolver.insert(
        "3",
        FileDescriptor::new("u/gamma.txt", 5.0, SizeUnit::B).with_folder("Invoices"),
    );
    resolver.insert("5", FileDescriptor::new("u/never-uploaded.txt", 1.0, SizeUnit::B));
    store.put("u/alpha.txt", &b"alpha"[..]);
    store.put("u/beta.txt", &b"beta"[..]);
    store.put("u/gamma.txt", &b"gamma"[..]);

    let (status, headers, body) = get(
        &state,
        "/api/download-multiple",
        Some("fileDetails=1&fileDetails=2&fileDetails=3&fileDetails=4&fileDetails=5"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"multiple_files.zip\""
    );

    let mut archive = unzip(body);
    let mut names: Vec<String> = archive.file_names().map(String::from).collect();
    names.sort();
    assert_eq!(
        names,
        vec!["Invoices/", "Invoices/beta.txt", "Invoices/gamma.txt", "alpha.txt"]
    );
    assert_eq!(entry(&mut archive, "alpha.txt"), b"alpha");
    assert_eq!(entry(&mut archive, "Invoices/gamma.txt"), b"gamma");
}

#[tokio::test]
async fn test_bundle_without_identifiers() {
    let (state, _, _) = create_state();

    let (status, _, body) = get(&state, "/api/download-multiple", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unzip(body).len(), 0);
}

#[tokio::test]
async fn test_bundle_bracketed_identifiers() {
    let (state, resolver, store) = create_state();
    resolver.insert("10", FileDescriptor::new("x/ten.bin", 3.0, SizeUnit::B));
    resolver.insert("11", FileDescriptor::new("x/eleven.bin", 3.0, SizeUnit::B));
    store.put("x/ten.bin", &b"ten"[..]);
    store.put("x/eleven.bin", &b"elv"[..]);

    let (_, _, body) = get(
        &state,
        "/api/download-multiple",
        Some("fileDetails%5B%5D=10&fileDetails%5B%5D=11"),
    )
    .await;
    assert_eq!(unzip(body).len(), 2);
}

#[tokio::test]
async fn test_health_and_fallbacks() {
    let (state, _, _) = create_state();

    let (status, headers, body) = get(&state, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["healthy"], true);
    assert_eq!(health["bucket"], "test-bucket");

    let (status, _, body) = get(&state, "/api/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let missing: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(missing["path"], "/api/unknown");

    let response = server::route(&state, &Method::OPTIONS, "/api/download", None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_server_roundtrip_and_shutdown() {
    let (state, resolver, store) = create_state();
    resolver.insert("7", FileDescriptor::new("k/hello.txt", 11.0, SizeUnit::B));
    store.put("k/hello.txt", &b"hello world"[..]);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(server::serve(listener, Arc::new(state), async {
        let _ = stop_rx.await;
    }));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /api/download?key={} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        encode("7")
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.to_ascii_lowercase().contains("content-length: 11"));
    assert!(text.ends_with("hello world"));

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
