use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use xfer_core::hashutil::{file_sha256, hash_hex};
use xfer_core::wire::{UploadInfo, AUTH_HEADER, STATUS_HEADER};
use xfer_server::{router, AppState};

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn temp_root() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("xfer-service-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn ping_is_reachable_without_auth() {
    let root = temp_root();
    let state = AppState::new(root, Some("secret"), Duration::from_secs(3600));
    let app = router(state, "/");

    let req = Request::get("/ping").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "pong");
}

#[tokio::test]
async fn protected_route_without_auth_header_is_rejected() {
    let root = temp_root();
    let state = AppState::new(root, Some("secret"), Duration::from_secs(3600));
    let app = router(state, "/");

    let req = Request::get("/list").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get(STATUS_HEADER).unwrap(), "failure");
}

#[tokio::test]
async fn protected_route_with_correct_auth_succeeds() {
    let root = temp_root();
    let state = AppState::new(root, Some("secret"), Duration::from_secs(3600));
    let app = router(state, "/");

    let req = Request::get("/list")
        .header(AUTH_HEADER, hash_hex("secret"))
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn list_reports_files_and_skips_directories() {
    let root = temp_root();
    std::fs::write(root.join("a.txt"), b"hi").unwrap();
    std::fs::write(root.join("b.txt"), b"there").unwrap();
    std::fs::create_dir(root.join("subdir")).unwrap();
    let state = AppState::new(root.clone(), None, Duration::from_secs(3600));
    let app = router(state, "/");

    let req = Request::get("/list").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_string(resp).await;
    let names: Vec<String> = body
        .lines()
        .map(|line| serde_json::from_str::<xfer_core::wire::FileInfo>(line).unwrap().name)
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"a.txt".to_string()));
    assert!(names.contains(&"b.txt".to_string()));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn multi_level_path_is_rejected() {
    let root = temp_root();
    let state = AppState::new(root, None, Duration::from_secs(3600));
    let app = router(state, "/");

    let req = Request::get("/download?path=a/b.txt").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(resp).await.contains("Multi-level"));
}

#[tokio::test]
async fn traversal_outside_root_is_rejected() {
    let root = temp_root();
    let state = AppState::new(root, None, Duration::from_secs(3600));
    let app = router(state, "/");

    let req = Request::get("/download?path=..").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_slice_upload_round_trips_and_publishes_the_file() {
    let root = temp_root();
    let state = AppState::new(root.clone(), None, Duration::from_secs(3600));
    let app = router(state, "/");

    let payload = b"hello flat namespace".to_vec();
    let hash = hash_hex(&payload);
    let info = UploadInfo {
        path: String::new(),
        task_id: String::new(),
        slice_count: 0,
        total_size: payload.len() as u64,
        slice_size: payload.len() as u64,
        hash: hash.clone(),
        overwrite: false,
    };

    let post_req = Request::post("/upload?path=greeting.txt")
        .body(Body::from(serde_json::to_vec(&info).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(post_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let negotiated: UploadInfo = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(negotiated.slice_count, 1);

    let put_req = Request::put(format!(
        "/upload?path=greeting.txt&taskID={}&hash={}&index=0",
        negotiated.task_id, hash
    ))
    .body(Body::from(payload.clone()))
    .unwrap();
    let resp = app.clone().oneshot(put_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_string(resp).await.contains("uploaded"));

    let published = root.join("greeting.txt");
    assert_eq!(tokio::fs::read(&published).await.unwrap(), payload);
    assert_eq!(file_sha256(&published).await.unwrap(), hash);

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn slice_hash_mismatch_is_rejected() {
    let root = temp_root();
    let state = AppState::new(root.clone(), None, Duration::from_secs(3600));
    let app = router(state, "/");

    let payload = b"some bytes".to_vec();
    let info = UploadInfo {
        path: String::new(),
        task_id: String::new(),
        slice_count: 0,
        total_size: payload.len() as u64,
        slice_size: payload.len() as u64,
        hash: hash_hex(&payload),
        overwrite: false,
    };
    let post_req = Request::post("/upload?path=f.bin")
        .body(Body::from(serde_json::to_vec(&info).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(post_req).await.unwrap();
    let negotiated: UploadInfo = serde_json::from_str(&body_string(resp).await).unwrap();

    let put_req = Request::put(format!(
        "/upload?path=f.bin&taskID={}&hash=deadbeef&index=0",
        negotiated.task_id
    ))
    .body(Body::from(payload))
    .unwrap();
    let resp = app.clone().oneshot(put_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(resp).await.contains("hash mismatch"));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn move_target_escaping_root_is_rejected_as_out_of_bounds() {
    let root = temp_root();
    std::fs::write(root.join("a"), b"hi").unwrap();
    let state = AppState::new(root.clone(), None, Duration::from_secs(3600));
    let app = router(state, "/");

    let req = Request::post("/move?path=a&target=../b&overwrite=true")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(resp).await.contains("out of bounds"));

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn concurrent_upload_without_overwrite_is_rejected() {
    let root = temp_root();
    let state = AppState::new(root.clone(), None, Duration::from_secs(3600));
    let app = router(state, "/");

    let info = UploadInfo {
        path: String::new(),
        task_id: String::new(),
        slice_count: 0,
        total_size: 10,
        slice_size: 10,
        hash: "f".repeat(64),
        overwrite: false,
    };
    let first = Request::post("/upload?path=dup.bin")
        .body(Body::from(serde_json::to_vec(&info).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(first).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let second = Request::post("/upload?path=dup.bin")
        .body(Body::from(serde_json::to_vec(&info).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(second).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(resp).await.contains("already uploading"));

    let _ = std::fs::remove_dir_all(&root);
}
