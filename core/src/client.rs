use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use futures::future::join_all;
use reqwest::{header::HeaderValue, Method, Request, Response};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::TransferError;
use crate::fetcher::{DownloadOptions, Fetcher, InspectPhase};
use crate::filewriter::FileWriter;
use crate::hashutil::{file_sha256, hash_hex};
use crate::transport::{build_client, TransportConfig};
use crate::urlutil::parse_url;
use crate::wire::{FileInfo, UploadInfo, AUTH_HEADER, STATUS_FAILURE, STATUS_HEADER, STATUS_SUCCESS};

/// Events emitted to a caller-supplied hook during `get`: `before=true`
/// carries the inspect result, `before=false` carries an incremental byte
/// count for whichever range just made progress.
#[derive(Debug, Clone)]
pub struct GetEvent {
    pub before: bool,
    pub supported: bool,
    pub length: i64,
    pub bytes_delta: usize,
}

/// Events emitted to a caller-supplied hook during `put`: `before=true`
/// carries the negotiated `UploadInfo`, `before=false` carries an
/// incremental byte count for whichever slice just made progress.
#[derive(Debug, Clone)]
pub struct PutEvent {
    pub before: bool,
    pub info: UploadInfo,
    pub bytes_delta: usize,
}

/// The high-level verb API a CLI (or any other caller) drives: ping, list,
/// get, put, delete, move. Wraps one `Fetcher` bound to one server.
pub struct Client {
    server_url: Url,
    fetcher: Fetcher,
}

impl Client {
    pub fn new(server_url: &str, transport: TransportConfig) -> Result<Self, TransferError> {
        let mut url = parse_url(server_url)?;
        if !url.path().ends_with('/') {
            let new_path = format!("{}/", url.path());
            url.set_path(&new_path);
        }
        let http_client = build_client(&transport)?;
        let mut fetcher = Fetcher::new(http_client, Default::default());
        fetcher.set_inspector(Arc::new(|phase: InspectPhase, resp: &Response| {
            if phase == InspectPhase::Download && !resp.status().is_success() {
                return Err(TransferError::Transport(format!(
                    "unexpected status {} on ranged GET",
                    resp.status()
                )));
            }
            Ok(())
        }));
        Ok(Self {
            server_url: url,
            fetcher,
        })
    }

    /// Sets (or, with an empty string, clears) the `Auth` header. Unless
    /// `direct` is set, `secret` is hashed with SHA-256 first, matching the
    /// server's own `authHash` comparison.
    pub fn set_auth(&mut self, secret: &str, direct: bool) {
        if secret.is_empty() {
            self.fetcher.headers_mut().remove(AUTH_HEADER);
            return;
        }
        let value = if direct { secret.to_string() } else { hash_hex(secret) };
        if let Ok(hv) = HeaderValue::from_str(&value) {
            self.fetcher.headers_mut().insert(AUTH_HEADER, hv);
        }
    }

    fn url_for(&self, sub_path: &str, query: &[(&str, &str)]) -> String {
        let mut url = self.server_url.clone();
        url.set_path(&format!("{}{}", url.path(), sub_path));
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        url.to_string()
    }

    async fn check_status(resp: Response) -> Result<Response, TransferError> {
        let status = resp
            .headers()
            .get(STATUS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match status.as_deref() {
            Some(STATUS_SUCCESS) => Ok(resp),
            Some(STATUS_FAILURE) => {
                let body = resp.text().await.unwrap_or_default();
                Err(TransferError::Protocol(body.trim().to_string()))
            }
            _ => {
                let status_code = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let excerpt: String = body.chars().take(256).collect();
                Err(TransferError::Transport(format!(
                    "unexpected status header, http status {status_code}, body starts with {excerpt:?}"
                )))
            }
        }
    }

    /// `GET /ping`; returns the round-trip latency if the server answers
    /// `pong`.
    pub async fn ping(&self) -> Result<Duration, TransferError> {
        let start = Instant::now();
        let req = Request::new(Method::GET, self.url_for("ping", &[]).parse()?);
        let resp = self.fetcher.do_request(req).await?;
        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;
        if body.starts_with("pong") {
            Ok(start.elapsed())
        } else {
            Err(TransferError::Protocol(format!("invalid ping response: {body:?}")))
        }
    }

    /// `GET /list`; invokes `cb` once per `FileInfo` line in the response.
    pub async fn list(&self, mut cb: impl FnMut(FileInfo)) -> Result<(), TransferError> {
        let req = Request::new(Method::GET, self.url_for("list", &[]).parse()?);
        let resp = self.fetcher.do_request(req).await?;
        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;
        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let info: FileInfo = serde_json::from_str(line)
                .map_err(|e| TransferError::Protocol(format!("malformed list entry: {e}")))?;
            cb(info);
        }
        Ok(())
    }

    /// `DELETE /delete?path=...`
    pub async fn delete(&self, remote: &str) -> Result<(), TransferError> {
        let req = Request::new(Method::DELETE, self.url_for("delete", &[("path", remote)]).parse()?);
        let resp = self.fetcher.do_request(req).await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    /// `POST /move?path=...&target=...`
    pub async fn mv(&self, remote: &str, target: &str, overwrite: bool) -> Result<(), TransferError> {
        let mut query = vec![("path", remote), ("target", target)];
        if overwrite {
            query.push(("overwrite", "true"));
        }
        let req = Request::new(Method::POST, self.url_for("move", &query).parse()?);
        let resp = self.fetcher.do_request(req).await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn ensure_exists(&self, remote: &str) -> Result<(), TransferError> {
        let req = Request::new(
            Method::GET,
            self.url_for("download", &[("path", remote)]).parse()?,
        );
        let resp = self.fetcher.do_request(req).await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    /// Downloads `remote` into `local`, splitting the body into
    /// `concurrency` ranges when the server supports it.
    pub async fn get(
        &self,
        concurrency: usize,
        remote: &str,
        local: &Path,
        mut hook: impl FnMut(GetEvent) + Send + 'static,
    ) -> Result<(), TransferError> {
        if local.is_dir() {
            return Err(TransferError::Validation(format!(
                "{} is a directory",
                local.display()
            )));
        }
        self.ensure_exists(remote).await?;

        let file_url = self.url_for("download", &[("path", remote)]);
        let (supported, length) = self.fetcher.inspect(&file_url).await?;
        hook(GetEvent {
            before: true,
            supported,
            length,
            bytes_delta: 0,
        });

        let writer = Arc::new(FileWriter::new(local)?);
        let hook = Arc::new(std::sync::Mutex::new(hook));
        {
            let hook = hook.clone();
            writer.on_write(Arc::new(move |n, _index, _start, _end, _length| {
                if let Ok(mut hook) = hook.lock() {
                    hook(GetEvent {
                        before: false,
                        supported,
                        length,
                        bytes_delta: n,
                    });
                }
            }));
        }

        let result = self
            .fetcher
            .download_with_manual(
                &file_url,
                supported,
                length,
                DownloadOptions {
                    concurrency,
                    ..Default::default()
                },
                writer.clone(),
            )
            .await;
        writer.truncate(writer.written_n()).await?;
        result
    }

    /// Negotiates an upload for `local` as `remote`, then PUTs every slice
    /// concurrently. Aborts all in-flight slices on the first failure.
    pub async fn put(
        &self,
        concurrency: usize,
        overwrite: bool,
        local: &Path,
        remote: &str,
        hook: impl Fn(PutEvent) + Send + Sync + 'static,
    ) -> Result<(), TransferError> {
        let concurrency = concurrency.max(1);
        if local.is_dir() {
            return Err(TransferError::Validation(format!(
                "{} is a directory",
                local.display()
            )));
        }
        let metadata = tokio::fs::metadata(local).await?;
        let total_size = metadata.len();
        let hash = file_sha256(local).await?;

        let info = UploadInfo {
            path: String::new(),
            task_id: String::new(),
            slice_count: 0,
            total_size,
            slice_size: (total_size / concurrency as u64).max(1),
            hash,
            overwrite,
        };

        let body = serde_json::to_vec(&info)
            .map_err(|e| TransferError::Validation(format!("failed to encode upload info: {e}")))?;
        let mut req = Request::new(Method::POST, self.url_for("upload", &[("path", remote)]).parse()?);
        *req.body_mut() = Some(body.into());
        let resp = self.fetcher.do_request(req).await?;
        let resp = Self::check_status(resp).await?;
        let bytes = resp.bytes().await?;
        // The server is authoritative from here: it may have clamped
        // `SliceSize`/`SliceCount` and always assigns `TaskID`.
        let info: UploadInfo = serde_json::from_slice(&bytes)
            .map_err(|e| TransferError::Protocol(format!("malformed upload info: {e}")))?;

        hook(PutEvent {
            before: true,
            info: info.clone(),
            bytes_delta: 0,
        });

        let file = Arc::new(std::fs::File::open(local)?);
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let hook = Arc::new(hook);
        let client = self.fetcher.client();
        let auth_headers = self.fetcher.headers_snapshot();
        let mut sends = Vec::new();
        let mut offset: u64 = 0;
        let mut index: u64 = 0;

        while offset < info.total_size {
            let size = (info.total_size - offset).min(info.slice_size);
            let upload_url = self.url_for("upload", &[("path", remote), ("taskID", &info.task_id)]);
            let file = file.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let hook = hook.clone();
            let client = client.clone();
            let auth_headers = auth_headers.clone();
            let info = info.clone();

            sends.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                if cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }

                let chunk_hash = read_offset_and_hash(&file, offset, size)?;
                let mut url: Url = upload_url
                    .parse()
                    .map_err(|_| TransferError::Validation("invalid upload url".into()))?;
                url.query_pairs_mut()
                    .append_pair("hash", &chunk_hash)
                    .append_pair("index", &index.to_string());

                let mut req = Request::new(Method::PUT, url);
                for (name, value) in auth_headers.iter() {
                    req.headers_mut().insert(name, value.clone());
                }
                let stream = OffsetReaderStream::new(file, offset, size, hook, info);
                *req.body_mut() = Some(reqwest::Body::wrap_stream(stream));

                let resp = client.execute(req).await.map_err(TransferError::from);
                let resp = match resp {
                    Ok(r) => r,
                    Err(e) => {
                        cancel.cancel();
                        return Err(e);
                    }
                };
                match Self::check_status(resp).await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        cancel.cancel();
                        Err(e)
                    }
                }
            }));

            offset += size;
            index += 1;
        }

        for res in join_all(sends).await {
            res.map_err(|e| TransferError::Transport(format!("worker panicked: {e}")))??;
        }
        Ok(())
    }
}

/// Reads `size` bytes from `file` starting at `offset` and hashes them.
/// Mirrors the original client's two-pass (hash, then stream) slice prep.
fn read_offset_and_hash(file: &std::fs::File, offset: u64, size: u64) -> Result<String, TransferError> {
    let mut hasher = Sha256::new();
    let mut remaining = size;
    let mut buf = vec![0u8; 64 * 1024];
    let mut pos = offset;
    while remaining > 0 {
        let to_read = remaining.min(buf.len() as u64) as usize;
        let n = file.read_at(&mut buf[..to_read], pos)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        pos += n as u64;
        remaining -= n as u64;
    }
    Ok(hex::encode(hasher.finalize()))
}

/// A byte stream reading `size` bytes of `file` starting at `offset` in
/// 16 KiB chunks, reporting each chunk read through `hook`.
struct OffsetReaderStream {
    file: Arc<std::fs::File>,
    offset: u64,
    remaining: u64,
    hook: Arc<dyn Fn(PutEvent) + Send + Sync>,
    info: UploadInfo,
}

impl OffsetReaderStream {
    fn new(
        file: Arc<std::fs::File>,
        offset: u64,
        size: u64,
        hook: Arc<dyn Fn(PutEvent) + Send + Sync>,
        info: UploadInfo,
    ) -> Self {
        Self {
            file,
            offset,
            remaining: size,
            hook,
            info,
        }
    }
}

impl futures::Stream for OffsetReaderStream {
    type Item = std::io::Result<bytes::Bytes>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if self.remaining == 0 {
            return std::task::Poll::Ready(None);
        }
        let chunk_size = self.remaining.min(16 * 1024) as usize;
        let mut buf = vec![0u8; chunk_size];
        match self.file.read_at(&mut buf, self.offset) {
            Ok(0) => std::task::Poll::Ready(None),
            Ok(n) => {
                buf.truncate(n);
                self.offset += n as u64;
                self.remaining = self.remaining.saturating_sub(n as u64);
                (self.hook)(PutEvent {
                    before: false,
                    info: self.info.clone(),
                    bytes_delta: n,
                });
                std::task::Poll::Ready(Some(Ok(bytes::Bytes::from(buf))))
            }
            Err(e) => std::task::Poll::Ready(Some(Err(e))),
        }
    }
}
