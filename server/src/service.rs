//! Route table and request handlers: the HTTP surface a client talks to.

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, on, post, MethodFilter};
use axum::Router;
use serde::Serialize;
use tower::ServiceExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeFile;

use xfer_core::hashutil::hash_hex;
use xfer_core::wire::{FileInfo, UploadInfo, AUTH_HEADER, STATUS_FAILURE, STATUS_HEADER, STATUS_SUCCESS};

use crate::pathsafe;
use crate::task::{self, TaskSet, UploadTask};

pub struct AppState {
    pub root: PathBuf,
    auth_hash: Option<String>,
    tasks: Arc<TaskSet>,
    upload_expiry: Duration,
}

impl AppState {
    pub fn new(root: PathBuf, auth: Option<&str>, upload_expiry: Duration) -> Arc<Self> {
        let auth_hash = auth
            .filter(|s| !s.is_empty())
            .map(hash_hex);
        Arc::new(Self {
            root,
            auth_hash,
            tasks: Arc::new(TaskSet::new()),
            upload_expiry,
        })
    }
}

fn with_status(mut resp: Response, success: bool) -> Response {
    let value = HeaderValue::from_static(if success { STATUS_SUCCESS } else { STATUS_FAILURE });
    resp.headers_mut().insert(STATUS_HEADER, value);
    resp
}

fn success_text(msg: impl Into<String>) -> Response {
    with_status((StatusCode::OK, msg.into()).into_response(), true)
}

fn success_json<T: Serialize>(v: &T) -> Response {
    let body = serde_json::to_vec(v).unwrap_or_default();
    with_status((StatusCode::OK, body).into_response(), true)
}

fn bad_error(msg: impl Into<String>) -> Response {
    with_status((StatusCode::BAD_REQUEST, msg.into()).into_response(), false)
}

fn internal_error(msg: impl Into<String>) -> Response {
    with_status((StatusCode::INTERNAL_SERVER_ERROR, msg.into()).into_response(), false)
}

/// Turns the raw `path` query parameter into a `(relative, absolute)` pair
/// or a ready-to-return 400.
fn resolve_path(state: &AppState, raw: &str) -> Result<(String, PathBuf), Response> {
    pathsafe::resolve(&state.root, raw).map_err(|e| bad_error(e.to_string()))
}

/// Same as `resolve_path`, but for the `move` handler's `target` parameter,
/// which checks containment before depth.
fn resolve_target_path(state: &AppState, raw: &str) -> Result<(String, PathBuf), Response> {
    pathsafe::resolve_target(&state.root, raw).map_err(|e| bad_error(e.to_string()))
}

/// Staging file for an in-progress upload: sits next to the destination so
/// the final publish is a same-filesystem rename, named so concurrent
/// uploads of different files never collide.
fn staging_path(abs: &Path) -> PathBuf {
    let digest = hash_hex(abs.to_string_lossy().as_bytes());
    let mut name = abs.as_os_str().to_os_string();
    name.push("-");
    name.push(digest);
    PathBuf::from(name)
}

async fn auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if let Some(expected) = &state.auth_hash {
        let got = req.headers().get(AUTH_HEADER).and_then(|v| v.to_str().ok());
        if got != Some(expected.as_str()) {
            return bad_error("Authentication failed");
        }
    }
    next.run(req).await
}

async fn ping_handler() -> Response {
    success_text("pong")
}

/// Entries are written in NDJSON, flushed to the connection every 10
/// records so a large directory still streams responsively.
const LIST_FLUSH_EVERY: usize = 10;

async fn list_handler(State(state): State<Arc<AppState>>, Query(q): Query<HashMap<String, String>>) -> Response {
    let raw = q.get("path").cloned().unwrap_or_default();
    let (_rel, abs) = match resolve_path(&state, &raw) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if abs != state.root {
        return bad_error("Multi-level directories are not supported");
    }

    let mut entries = match tokio::fs::read_dir(&abs).await {
        Ok(e) => e,
        Err(e) => return internal_error(e.to_string()),
    };

    let stream = async_stream::stream! {
        let mut batch = Vec::new();
        let mut pending = 0usize;
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let meta = match entry.metadata().await {
                        Ok(m) => m,
                        Err(_) => continue,
                    };
                    if meta.is_dir() {
                        continue;
                    }
                    let mod_time = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_secs() as i64)
                        .unwrap_or(0);
                    let info = FileInfo {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        size: meta.len() as i64,
                        mod_time,
                    };
                    if let Ok(mut line) = serde_json::to_vec(&info) {
                        line.push(b'\n');
                        batch.extend_from_slice(&line);
                        pending += 1;
                    }
                    if pending >= LIST_FLUSH_EVERY {
                        pending = 0;
                        yield Ok::<_, Infallible>(Bytes::from(std::mem::take(&mut batch)));
                    }
                }
                Ok(None) => {
                    if !batch.is_empty() {
                        yield Ok::<_, Infallible>(Bytes::from(batch));
                    }
                    break;
                }
                Err(_) => break,
            }
        }
    };
    with_status((StatusCode::OK, Body::from_stream(stream)).into_response(), true)
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    let raw = q.get("path").cloned().unwrap_or_default();
    let (rel, abs) = match resolve_path(&state, &raw) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match tokio::fs::metadata(&abs).await {
        Ok(meta) if meta.is_dir() => {
            return bad_error(format!("{rel} is a directory, not supported"));
        }
        Err(_) => return bad_error(format!("{rel} not exist")),
        Ok(_) => {}
    }

    let resp = ServeFile::new(&abs)
        .oneshot(req)
        .await
        .unwrap_or_else(|e: Infallible| match e {});
    with_status(resp.map(Body::new), true)
}

async fn upload_post_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    state.tasks.clean().await;
    let raw = q.get("path").cloned().unwrap_or_default();
    let (rel, abs) = match resolve_path(&state, &raw) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut info: UploadInfo = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return bad_error(e.to_string()),
    };

    match tokio::fs::metadata(&abs).await {
        Ok(meta) if meta.is_dir() => {
            return bad_error(format!("{rel} is a directory, not supported"));
        }
        Ok(_) if !info.overwrite => {
            return bad_error(format!("{rel} already exist"));
        }
        _ => {}
    }
    if info.total_size == 0 || info.slice_size == 0 {
        return bad_error("invalid upload info");
    }

    info.path = rel.clone();
    let info = task::negotiate(info);
    let overwrite = info.overwrite;
    let upload_task = UploadTask::spawn(info, state.upload_expiry, staging_path(&abs));

    if state.tasks.add(abs, upload_task.clone(), overwrite).await {
        success_json(&upload_task.info)
    } else {
        bad_error(format!("{rel} already uploading"))
    }
}

async fn upload_put_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<HashMap<String, String>>,
    body: Body,
) -> Response {
    state.tasks.clean().await;
    let raw = q.get("path").cloned().unwrap_or_default();
    let (rel, abs) = match resolve_path(&state, &raw) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let hash = q.get("hash").map(|s| s.trim().to_string()).unwrap_or_default();
    let index: Option<i64> = q.get("index").and_then(|s| s.parse().ok());
    let Some(index) = index.filter(|i| *i >= 0) else {
        return bad_error("invalid query");
    };
    if hash.is_empty() {
        return bad_error("invalid query");
    }

    let Some(upload_task) = state.tasks.get(&abs).await else {
        return bad_error(format!("not found upload task for {rel}"));
    };
    if upload_task.info.task_id != q.get("taskID").cloned().unwrap_or_default() {
        return bad_error("task id not match, maybe your task is already stopped");
    }

    match upload_task.handle(index as usize, &hash, body).await {
        Ok(true) => match xfer_core::hashutil::file_sha256(&upload_task.storage_path).await {
            Ok(digest) if digest == upload_task.info.hash => {
                match tokio::fs::rename(&upload_task.storage_path, &abs).await {
                    Ok(()) => success_text(format!("{rel} uploaded")),
                    Err(e) => bad_error(format!("rename file error: {e}")),
                }
            }
            Ok(_) => bad_error("hash not match"),
            Err(e) => internal_error(e.to_string()),
        },
        Ok(false) => success_text(""),
        Err(e) => bad_error(e.to_string()),
    }
}

async fn delete_handler(State(state): State<Arc<AppState>>, Query(q): Query<HashMap<String, String>>) -> Response {
    let raw = q.get("path").cloned().unwrap_or_default();
    let (rel, abs) = match resolve_path(&state, &raw) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if abs == state.root {
        return bad_error("root directory can't be deleted");
    }
    match tokio::fs::metadata(&abs).await {
        Ok(meta) if meta.is_dir() => return bad_error(format!("{rel} is a directory, not supported")),
        Err(_) => return bad_error(format!("{rel} not exist")),
        Ok(_) => {}
    }
    match tokio::fs::remove_file(&abs).await {
        Ok(()) => success_text(format!("{rel} deleted")),
        Err(e) => internal_error(e.to_string()),
    }
}

async fn move_handler(State(state): State<Arc<AppState>>, Query(q): Query<HashMap<String, String>>) -> Response {
    let raw = q.get("path").cloned().unwrap_or_default();
    let (rel, abs) = match resolve_path(&state, &raw) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let target_raw = q.get("target").cloned().unwrap_or_default();
    let (target_rel, target_abs) = match resolve_target_path(&state, &target_raw) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let overwrite = q.get("overwrite").map(|v| !v.is_empty()).unwrap_or(false);

    if abs == state.root || target_abs == state.root {
        return bad_error("root directory can't be moved");
    }
    if abs == target_abs {
        return bad_error("same path, invalid operation");
    }
    match tokio::fs::metadata(&abs).await {
        Ok(meta) if meta.is_dir() => return bad_error(format!("{rel} is a directory, not supported")),
        Err(_) => return bad_error(format!("{rel} not exist")),
        Ok(_) => {}
    }
    match tokio::fs::metadata(&target_abs).await {
        Ok(meta) if meta.is_dir() => {
            return bad_error(format!("{target_rel} is a directory, invalid operation"));
        }
        Ok(_) if !overwrite => return bad_error(format!("{target_rel} already exist")),
        _ => {}
    }

    match tokio::fs::rename(&abs, &target_abs).await {
        Ok(()) => success_text(format!("{rel} moved to {target_rel}")),
        Err(e) => internal_error(e.to_string()),
    }
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    };
    if prefix.len() > 1 && prefix.ends_with('/') {
        prefix.pop();
    }
    prefix
}

/// Builds the full route table. Every route but `ping` is guarded by the
/// auth middleware; `ping` always answers so health checks don't need a
/// secret.
pub fn router(state: Arc<AppState>, prefix: &str) -> Router {
    // Any origin can reach this service; it's a personal file-transfer
    // endpoint, not a browser-facing multi-tenant API.
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::DELETE])
        .allow_headers(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/list", get(list_handler))
        .route("/delete", delete(delete_handler))
        .route("/move", post(move_handler))
        .route("/upload", post(upload_post_handler).put(upload_put_handler))
        .route(
            "/download",
            on(MethodFilter::GET.or(MethodFilter::HEAD), download_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let inner = Router::new()
        .route("/ping", get(ping_handler))
        .merge(protected)
        .layer(cors)
        .with_state(state);

    Router::new().nest(&normalize_prefix(prefix), inner)
}
