#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use roadwatch_contracts::identity::BearerToken;
use roadwatch_contracts::media::{CameraSourceId, UploadSource};
use roadwatch_contracts::violation::TrackerId;
use roadwatch_engines::http_backend::{HttpBackend, HttpBackendConfig};
use roadwatch_engines::{ConsoleBackend, FetchError};
use serde_json::{json, Value};

const GOOD_TOKEN: &str = "good-token";

async fn spawn_backend(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("mock backend addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

fn temp_clip(prefix: &str, bytes: &[u8]) -> std::path::PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    let path = std::env::temp_dir().join(format!("{prefix}-{suffix}.mp4"));
    std::fs::write(&path, bytes).unwrap();
    path
}

fn backend(base_url: String) -> HttpBackend {
    HttpBackend::new(HttpBackendConfig {
        base_url,
        timeout_ms: 2_000,
        ..HttpBackendConfig::mvp_v1()
    })
    .expect("backend config")
}

fn token(value: &str) -> BearerToken {
    BearerToken::new(value, u64::MAX).expect("token")
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {GOOD_TOKEN}"))
        .unwrap_or(false)
}

async fn stats(headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Missing or invalid token"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "in_count": 5,
            "out_count": 3,
            "total_violations": 1,
            "recent_violations": [
                {"type": "SPEEDING", "tracker_id": 42, "frame_index": 300, "timestamp": "20240101_120000", "v_time": 10.0}
            ]
        })),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_01_stats_injects_credential_and_decodes() {
    let base = spawn_backend(Router::new().route("/stats", get(stats))).await;
    let b = backend(base);
    let snap = b.fetch_stats(&token(GOOD_TOKEN)).await.unwrap();
    assert_eq!(snap.inbound_count, 5);
    assert_eq!(snap.outbound_count, 3);
    assert_eq!(snap.total_violation_count, 1);
    assert_eq!(snap.recent_violations[0].tracker_id, TrackerId(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_02_rejected_credential_maps_to_unauthorized() {
    let base = spawn_backend(Router::new().route("/stats", get(stats))).await;
    let err = backend(base)
        .fetch_stats(&token("stale-token"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_03_error_body_is_server_failure() {
    let base = spawn_backend(Router::new().route(
        "/stats",
        get(|| async { Json(json!({"error": "monitoring system not running"})) }),
    ))
    .await;
    let err = backend(base)
        .fetch_stats(&token(GOOD_TOKEN))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FetchError::Server("monitoring system not running".to_string())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_04_archive_listing_keeps_backend_order() {
    let base = spawn_backend(Router::new().route(
        "/violations",
        get(|| async {
            Json(json!([
                {"_id": "b", "type": "LOITERING", "tracker_id": 9, "timestamp": "20240101_130000"},
                {"filename": "WRONG_WAY_ID3_20240101_120000.mp4", "type": "WRONG", "id": "WAY", "time": "20240101 120000"}
            ]))
        }),
    ))
    .await;
    let listing = backend(base)
        .fetch_violations(&token(GOOD_TOKEN))
        .await
        .unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].violation_id.as_str(), "b");
    assert_eq!(listing[1].category, "WRONG_WAY");
    assert_eq!(listing[1].evidence.as_str(), "WRONG_WAY_ID3_20240101_120000.mp4");
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_05_camera_switch_round_trip_and_refusal() {
    let base = spawn_backend(Router::new().route(
        "/switch_camera",
        post(|Json(body): Json<Value>| async move {
            match body.get("source").and_then(Value::as_str) {
                Some("") | None => Json(json!({"status": "error", "message": "Source not provided"})),
                Some(src) => Json(json!({"status": "success", "new_source": src})),
            }
        }),
    ))
    .await;
    let b = backend(base);
    let ack = b
        .switch_camera(&token(GOOD_TOKEN), &CameraSourceId::new("0").unwrap())
        .await
        .unwrap();
    assert_eq!(ack.new_source, "0");
}

#[derive(Default)]
struct UploadCapture {
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn upload(
    State(capture): State<Arc<Mutex<UploadCapture>>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        let mut guard = capture.lock().unwrap();
        guard.file_name = file_name.clone();
        guard.content_type = content_type;
        guard.bytes = bytes;
        return (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "filename": file_name,
                "path": format!("uploads/{}", file_name.unwrap_or_default())
            })),
        );
    }
    (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({})))
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_06_upload_sends_multipart_file() {
    let capture = Arc::new(Mutex::new(UploadCapture::default()));
    let base = spawn_backend(
        Router::new()
            .route("/upload", post(upload))
            .with_state(capture.clone()),
    )
    .await;
    let path = temp_clip("roadwatch-upload", b"\x00\x00\x00\x18ftypmp42");

    let source = UploadSource::from_path(&path).unwrap();
    let ack = backend(base).upload(&token(GOOD_TOKEN), &source).await.unwrap();
    assert_eq!(ack.file_name, source.file_name);
    assert_eq!(
        ack.stored_path.as_deref(),
        Some(format!("uploads/{}", source.file_name).as_str())
    );
    let guard = capture.lock().unwrap();
    assert_eq!(guard.file_name.as_deref(), Some(source.file_name.as_str()));
    assert_eq!(guard.content_type.as_deref(), Some("video/mp4"));
    assert_eq!(guard.bytes, b"\x00\x00\x00\x18ftypmp42");
    drop(guard);
    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_07_missing_upload_file_fails_before_network() {
    let b = backend("http://127.0.0.1:9".to_string());
    let source = UploadSource::from_path("/nonexistent/roadwatch/clip.mp4").unwrap();
    let err = b.upload(&token(GOOD_TOKEN), &source).await.unwrap_err();
    assert!(matches!(err, FetchError::Io(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_08_unreachable_backend_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = backend(format!("http://{addr}"))
        .fetch_stats(&token(GOOD_TOKEN))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transport { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_09_upload_streams_file_with_non_ascii_name() {
    let capture = Arc::new(Mutex::new(UploadCapture::default()));
    let base = spawn_backend(
        Router::new()
            .route("/upload", post(upload))
            .with_state(capture.clone()),
    )
    .await;
    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    let path = temp_clip("Überwachung_路口", &payload);

    let source = UploadSource::from_path(&path).unwrap();
    assert!(source.file_name.starts_with("Überwachung_路口-"));
    backend(base).upload(&token(GOOD_TOKEN), &source).await.unwrap();
    let guard = capture.lock().unwrap();
    assert_eq!(guard.content_type.as_deref(), Some("video/mp4"));
    assert_eq!(guard.bytes.len(), payload.len());
    assert!(guard.bytes == payload);
    drop(guard);
    std::fs::remove_file(path).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn at_backend_http_10_upload_with_rejected_credential_is_unauthorized() {
    let capture = Arc::new(Mutex::new(UploadCapture::default()));
    let base = spawn_backend(
        Router::new()
            .route("/upload", post(upload))
            .with_state(capture),
    )
    .await;
    let path = temp_clip("roadwatch-denied", b"clip");
    let source = UploadSource::from_path(&path).unwrap();
    let err = backend(base)
        .upload(&token("stale-token"), &source)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    std::fs::remove_file(path).unwrap();
}
