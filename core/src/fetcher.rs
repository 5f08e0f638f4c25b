use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{header::HeaderMap, Client, Method, Request, Response};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

/// When a response-inspecting hook runs: right after a `HEAD`/probe `GET`
/// used to size the transfer, or after each ranged `GET` during download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InspectPhase {
    Inspect,
    Download,
}

pub type ResponseInspector =
    Arc<dyn Fn(InspectPhase, &Response) -> Result<(), TransferError> + Send + Sync>;

/// Receives the body of one downloaded range and is responsible for
/// writing it to wherever it needs to go (a file, in the common case).
#[async_trait]
pub trait RangeSink: Send + Sync {
    /// `length == -1` means the total size is unknown (no `Content-Length`);
    /// in that case `start`/`end` are meaningless and the sink should just
    /// drain the whole body.
    async fn write_range(
        &self,
        cancel: &CancellationToken,
        index: usize,
        start: u64,
        end: u64,
        length: i64,
        response: Response,
    ) -> Result<(), TransferError>;
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub concurrency: usize,
    pub try_count: usize,
    pub cancellation: Option<CancellationToken>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            try_count: 3,
            cancellation: None,
        }
    }
}

/// Concurrent ranged HTTP downloader. One `Fetcher` is built around a single
/// shared `reqwest::Client` and reused across many downloads.
pub struct Fetcher {
    client: Client,
    headers: HeaderMap,
    inspector: Option<ResponseInspector>,
}

impl Fetcher {
    pub fn new(client: Client, headers: HeaderMap) -> Self {
        Self {
            client,
            headers,
            inspector: None,
        }
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Clone of the underlying `reqwest::Client`, for callers (like
    /// `Client::put`) that need to issue requests from spawned tasks.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Snapshot of the headers merged into every outgoing request.
    pub fn headers_snapshot(&self) -> HeaderMap {
        self.headers.clone()
    }

    /// Runs on every response the fetcher receives, before the caller sees
    /// it; used by `Client` to turn a non-2xx status into a `TransferError`.
    pub fn set_inspector(&mut self, inspector: ResponseInspector) {
        self.inspector = Some(inspector);
    }

    /// Sends `req` with this fetcher's headers merged in (overriding any
    /// header of the same name already present on `req`), through the
    /// shared client.
    pub async fn do_request(&self, mut req: Request) -> Result<Response, TransferError> {
        for (name, value) in self.headers.iter() {
            req.headers_mut().insert(name, value.clone());
        }
        self.client.execute(req).await.map_err(TransferError::from)
    }

    async fn run_inspector(&self, phase: InspectPhase, resp: &Response) -> Result<(), TransferError> {
        if let Some(inspector) = &self.inspector {
            inspector(phase, resp)
        } else {
            Ok(())
        }
    }

    async fn inspect_with_head(&self, url: &str) -> Result<(bool, i64), TransferError> {
        let req = Request::new(Method::HEAD, url.parse().map_err(|_| {
            TransferError::Validation(format!("invalid url: {url}"))
        })?);
        let resp = self.do_request(req).await?;
        self.run_inspector(InspectPhase::Inspect, &resp).await?;

        let supported = resp
            .headers()
            .get("Accept-Ranges")
            .map(|v| v == "bytes")
            .unwrap_or(false);
        let length = match resp.headers().get("Content-Length") {
            None => -1,
            Some(v) => v
                .to_str()
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| TransferError::Protocol("bad Content-Length".into()))?,
        };
        if supported && length < 0 {
            return Err(TransferError::Protocol(
                "server claims range support but no length".into(),
            ));
        }
        Ok((supported, length))
    }

    async fn inspect_with_get(&self, url: &str) -> Result<(bool, i64), TransferError> {
        let mut req = Request::new(Method::GET, url.parse().map_err(|_| {
            TransferError::Validation(format!("invalid url: {url}"))
        })?);
        req.headers_mut()
            .insert("Range", "bytes=0-0".parse().unwrap());
        let resp = self.do_request(req).await?;
        self.run_inspector(InspectPhase::Inspect, &resp).await?;

        let content_range = resp
            .headers()
            .get("Content-Range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let Some(content_range) = content_range else {
            return Ok((false, -1));
        };
        let (start, end, length) = crate::urlutil::parse_content_range(&content_range)?;
        if start != 0 || end != 0 {
            return Err(TransferError::Protocol(
                "probe content-range did not start at byte 0".into(),
            ));
        }
        Ok((true, length as i64))
    }

    /// Determines whether the server supports ranged requests and, if so,
    /// how large the resource is. Tries `HEAD` first, then falls back to a
    /// `Range: bytes=0-0` probe `GET`.
    pub async fn inspect(&self, url: &str) -> Result<(bool, i64), TransferError> {
        match self.inspect_with_head(url).await {
            Ok((true, length)) => Ok((true, length)),
            _ => self.inspect_with_get(url).await,
        }
    }

    /// Downloads `url` with an already-known inspect result, splitting it
    /// into `opts.concurrency` ranges (or a single unranged request when
    /// ranges aren't supported or the length is unknown).
    pub async fn download_with_manual(
        &self,
        url: &str,
        supported: bool,
        length: i64,
        opts: DownloadOptions,
        sink: Arc<dyn RangeSink>,
    ) -> Result<(), TransferError> {
        let concurrency = opts.concurrency.max(1);
        let try_count = if opts.try_count == 0 { 3 } else { opts.try_count };
        let cancel = opts.cancellation.unwrap_or_default();

        let length = if length <= 0 { -1 } else { length };
        // A server that can't serve ranges, or one whose length we never
        // learned, gets exactly one worker; everything else still chunks the
        // real byte range into `concurrency` pieces, it just omits the
        // `Range` header when the server doesn't understand it.
        let force_single_worker = !supported || length == -1;
        let concurrency = if force_single_worker { 1 } else { concurrency };
        let unknown_length = length == -1;

        let size = if unknown_length {
            0
        } else {
            (length / concurrency as i64).max(1024)
        };

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = Vec::new();
        let mut count: i64 = 0;
        let mut index = 0usize;

        loop {
            if !unknown_length && count >= length {
                break;
            }
            let (start, end) = if unknown_length {
                (0, 0)
            } else {
                let left = length - count;
                let take = left.min(size);
                let start = count;
                count += take;
                (start, count - 1)
            };

            let url = url.to_string();
            let fetcher_headers = self.headers.clone();
            let client = self.client.clone();
            let inspector = self.inspector.clone();
            let sink = sink.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let idx = index;

            let task = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                for attempt in 0..try_count {
                    if cancel.is_cancelled() {
                        return Err(TransferError::Cancelled);
                    }
                    let mut req = Request::new(Method::GET, url.parse().unwrap());
                    for (name, value) in fetcher_headers.iter() {
                        req.headers_mut().insert(name, value.clone());
                    }
                    if supported && !unknown_length {
                        req.headers_mut().insert(
                            "Range",
                            format!("bytes={start}-{end}").parse().unwrap(),
                        );
                    }

                    let result: Result<Response, TransferError> =
                        client.execute(req).await.map_err(TransferError::from);
                    let resp = match result {
                        Ok(resp) => resp,
                        Err(e) => {
                            if attempt + 1 == try_count {
                                cancel.cancel();
                                return Err(e);
                            }
                            continue;
                        }
                    };
                    if let Some(inspector) = &inspector {
                        if let Err(e) = inspector(InspectPhase::Download, &resp) {
                            if attempt + 1 == try_count {
                                cancel.cancel();
                                return Err(e);
                            }
                            continue;
                        }
                    }

                    return match sink.write_range(&cancel, idx, start as u64, end as u64, length, resp).await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            cancel.cancel();
                            Err(e)
                        }
                    };
                }
                unreachable!("loop always returns within try_count iterations")
            });
            tasks.push(task);

            index += 1;
            if unknown_length {
                break;
            }
        }

        let results = join_all(tasks).await;
        for res in results {
            res.map_err(|e| TransferError::Transport(format!("worker panicked: {e}")))??;
        }
        Ok(())
    }

    /// Inspects then downloads `url`.
    pub async fn download(
        &self,
        url: &str,
        opts: DownloadOptions,
        sink: Arc<dyn RangeSink>,
    ) -> Result<(), TransferError> {
        let (supported, length) = self.inspect(url).await?;
        self.download_with_manual(url, supported, length, opts, sink)
            .await
    }
}
