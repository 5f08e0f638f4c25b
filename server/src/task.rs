//! Resumable sliced-upload engine: one `UploadTask` per in-flight upload,
//! tracked in a `TaskSet` keyed by absolute destination path.

use std::collections::HashMap;
use std::fs::File as StdFile;
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;
use xfer_core::error::TransferError;
use xfer_core::wire::UploadInfo;

/// Minimum slice size, in bytes. Matches the original's 1 KiB floor.
const MIN_SLICE_SIZE: u64 = 1024;
/// Above this many slices, the slice size is grown so the count stays
/// around 100-101. Matches the original's `TotalSize/SliceSize > 100` rule.
const MAX_SLICE_COUNT_SOFT_CAP: u64 = 100;

/// Clamps `info.slice_size` the way the original upload handshake does,
/// then derives `slice_count` from the (possibly adjusted) slice size.
pub fn negotiate(mut info: UploadInfo) -> UploadInfo {
    if info.slice_size < MIN_SLICE_SIZE {
        info.slice_size = MIN_SLICE_SIZE;
    }
    if info.total_size / info.slice_size > MAX_SLICE_COUNT_SOFT_CAP {
        info.slice_size = info.total_size / MAX_SLICE_COUNT_SOFT_CAP;
    }
    info.slice_count = info.total_size / info.slice_size;
    if info.total_size % info.slice_size > 0 {
        info.slice_count += 1;
    }
    info
}

pub struct UploadTask {
    pub info: UploadInfo,
    pub storage_path: PathBuf,
    stopped: AtomicBool,
    finished_count: AtomicU64,
    slice_finished: Mutex<Vec<bool>>,
    file: Mutex<Option<Arc<StdFile>>>,
    expiry_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UploadTask {
    pub fn spawn(info: UploadInfo, expiry: Duration, storage_path: PathBuf) -> Arc<Self> {
        let mut info = info;
        info.task_id = Uuid::new_v4().to_string();
        let slice_count = info.slice_count as usize;

        let task = Arc::new(Self {
            info,
            storage_path,
            stopped: AtomicBool::new(false),
            finished_count: AtomicU64::new(0),
            slice_finished: Mutex::new(vec![false; slice_count]),
            file: Mutex::new(None),
            expiry_handle: Mutex::new(None),
        });

        let weak = Arc::downgrade(&task);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            if let Some(task) = weak.upgrade() {
                task.stop().await;
            }
        });
        *task.expiry_handle.try_lock().expect("no contention on a freshly built task") = Some(handle);
        task
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.finished_count.load(Ordering::SeqCst) == self.info.slice_count
    }

    /// Stops the task: cancels the expiry timer and releases the backing
    /// file. If the upload never finished, the partial staging file is
    /// removed.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.expiry_handle.lock().await.take() {
            handle.abort();
        }
        let had_file = self.file.lock().await.take().is_some();
        if had_file && !self.is_finished() {
            let _ = tokio::fs::remove_file(&self.storage_path).await;
        }
    }

    async fn get_file(&self) -> Result<Arc<StdFile>, TransferError> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let path = self.storage_path.clone();
            let file = tokio::task::spawn_blocking(move || {
                StdFile::options().create(true).write(true).open(path)
            })
            .await
            .map_err(|e| TransferError::Transport(format!("open task file panicked: {e}")))??;
            *guard = Some(Arc::new(file));
        }
        Ok(guard.as_ref().unwrap().clone())
    }

    async fn finish_slice(&self, index: usize) {
        let mut finished = self.slice_finished.lock().await;
        if !finished[index] {
            finished[index] = true;
            self.finished_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Accepts one slice's body, verifies its size and SHA-256 against the
    /// handshake, and writes it at its positional offset. Returns whether
    /// the whole task is now finished.
    pub async fn handle(&self, index: usize, hash: &str, body: Body) -> Result<bool, TransferError> {
        if index >= self.info.slice_count as usize {
            return Err(TransferError::Validation(format!("invalid index {index}")));
        }
        if self.slice_finished.lock().await[index] {
            return Err(TransferError::Protocol(format!("slice {index} already finished")));
        }
        if self.is_stopped() {
            return Err(TransferError::Protocol("task is stopped".into()));
        }

        let file = self.get_file().await?;
        let should_copy = if index as u64 == self.info.slice_count - 1 {
            self.info.total_size - self.info.slice_size * (self.info.slice_count - 1)
        } else {
            self.info.slice_size
        };
        let start = index as u64 * self.info.slice_size;

        let mut count: u64 = 0;
        let mut hasher = Sha256::new();
        let mut stream = body.into_data_stream();
        while count < should_copy {
            if self.is_stopped() {
                return Err(TransferError::Protocol("task stopped".into()));
            }
            let Some(chunk) = stream.next().await else { break };
            let chunk = chunk.map_err(|e| TransferError::Transport(e.to_string()))?;
            if chunk.is_empty() {
                continue;
            }
            let take = (should_copy - count).min(chunk.len() as u64) as usize;
            let piece = chunk[..take].to_vec();
            hasher.update(&piece);

            let file = file.clone();
            let offset = start + count;
            tokio::task::spawn_blocking(move || file.write_at(&piece, offset))
                .await
                .map_err(|e| TransferError::Transport(format!("write panicked: {e}")))??;
            count += take as u64;
        }

        if count != should_copy {
            return Err(TransferError::Protocol(format!(
                "slice {index} size mismatch: expected {should_copy}, got {count}"
            )));
        }
        let digest = hex::encode(hasher.finalize());
        if digest != hash {
            return Err(TransferError::Protocol(format!("slice {index} hash mismatch")));
        }

        self.finish_slice(index).await;
        if self.is_finished() {
            self.stop().await;
        }
        Ok(self.is_finished())
    }
}

/// All in-flight upload tasks, keyed by absolute destination path.
pub struct TaskSet {
    tasks: Mutex<HashMap<PathBuf, Arc<UploadTask>>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, path: &Path) -> Option<Arc<UploadTask>> {
        self.tasks.lock().await.get(path).cloned()
    }

    /// Registers `task` for `path`. If a task is already registered there,
    /// it's stopped first when `overwrite` is set; otherwise `task` itself
    /// is stopped and registration fails.
    pub async fn add(&self, path: PathBuf, task: Arc<UploadTask>, overwrite: bool) -> bool {
        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.get(&path) {
            if overwrite {
                existing.stop().await;
            } else {
                task.stop().await;
                return false;
            }
        }
        tasks.insert(path, task);
        true
    }

    /// Removes every task that has already stopped. Returns how many were
    /// removed.
    pub async fn clean(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let stale: Vec<PathBuf> = tasks
            .iter()
            .filter(|(_, t)| t.is_stopped())
            .map(|(p, _)| p.clone())
            .collect();
        for p in &stale {
            tasks.remove(p);
        }
        stale.len()
    }
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_info() -> UploadInfo {
        UploadInfo {
            path: "file.bin".into(),
            task_id: String::new(),
            slice_count: 0,
            total_size: 250,
            slice_size: 100,
            hash: String::new(),
            overwrite: false,
        }
    }

    #[test]
    fn negotiate_keeps_small_slice_size() {
        let info = negotiate(base_info());
        assert_eq!(info.slice_size, 100);
        assert_eq!(info.slice_count, 3);
    }

    #[test]
    fn negotiate_floors_slice_size_at_1kb() {
        let mut info = base_info();
        info.slice_size = 10;
        let info = negotiate(info);
        assert_eq!(info.slice_size, 1024);
    }

    #[test]
    fn negotiate_grows_slice_size_past_soft_cap() {
        let mut info = base_info();
        info.total_size = 1_000_000;
        info.slice_size = 1024;
        let info = negotiate(info);
        assert!(info.total_size / info.slice_size <= MAX_SLICE_COUNT_SOFT_CAP);
    }
}
