pub mod notifier;
pub mod observer;
pub mod snapshot;

pub use notifier::ProgressNotifier;
pub use observer::ProgressObserver;
pub use snapshot::{format_bytes, ProgressSnapshot, RangeSnapshot};

/// One unit of progress from a single worker, download range or upload slice.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub range_id: String,
    pub bytes_delta: u64,
    pub total_bytes: Option<u64>,
}
