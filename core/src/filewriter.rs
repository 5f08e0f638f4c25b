use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Response;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::fetcher::RangeSink;

pub type WriteListener = Arc<dyn Fn(usize, usize, u64, u64, i64) + Send + Sync>;

/// A single pre-opened file that concurrent workers write into at disjoint
/// byte offsets. Positional writes (`pwrite`) need no exclusive lock across
/// workers — each worker's offset range never overlaps another's.
pub struct FileWriter {
    file: Arc<std::fs::File>,
    written_n: AtomicU64,
    listener: Mutex<Option<WriteListener>>,
}

impl FileWriter {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        Ok(Self {
            file: Arc::new(file),
            written_n: AtomicU64::new(0),
            listener: Mutex::new(None),
        })
    }

    /// Registers a callback invoked after every chunk is written:
    /// `(bytes_in_chunk, range_index, start, end, total_length)`.
    pub fn on_write(&self, cb: WriteListener) {
        *self.listener.lock().unwrap() = Some(cb);
    }

    pub fn written_n(&self) -> u64 {
        self.written_n.load(Ordering::SeqCst)
    }

    pub async fn truncate(&self, size: u64) -> Result<(), TransferError> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.set_len(size))
            .await
            .map_err(|e| TransferError::Resource(io::Error::new(io::ErrorKind::Other, e.to_string())))??;
        Ok(())
    }
}

#[async_trait]
impl RangeSink for FileWriter {
    async fn write_range(
        &self,
        cancel: &CancellationToken,
        index: usize,
        start: u64,
        end: u64,
        length: i64,
        response: Response,
    ) -> Result<(), TransferError> {
        let expected = if length != -1 { Some(end - start + 1) } else { None };
        let mut stream = response.bytes_stream();
        let mut count: u64 = 0;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            let chunk = chunk?;
            let n = chunk.len();
            if n == 0 {
                continue;
            }
            let file = self.file.clone();
            let offset = start + count;
            tokio::task::spawn_blocking(move || file.write_at(&chunk, offset))
                .await
                .map_err(|e| TransferError::Resource(io::Error::new(io::ErrorKind::Other, e.to_string())))??;

            self.written_n.fetch_add(n as u64, Ordering::SeqCst);
            count += n as u64;
            if let Some(listener) = self.listener.lock().unwrap().as_ref() {
                listener(n, index, start, end, length);
            }
        }

        if let Some(expected) = expected {
            if count != expected {
                return Err(TransferError::Protocol(format!(
                    "range {index}: start {start}, end {end}, read {count} bytes, expected {expected}"
                )));
            }
        }
        Ok(())
    }
}
