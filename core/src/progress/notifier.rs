use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::mpsc;

use super::observer::ProgressObserver;
use super::snapshot::{ProgressSnapshot, RangeSnapshot};
use super::ProgressEvent;

/// EMA smoothing factor. 0.3 = responsive but stable.
const EMA_ALPHA: f64 = 0.3;

/// Internal per-range tracking (purely data, no UI).
struct RangeProgress {
    range_id: String,
    bytes_done: u64,
    total_bytes: u64,
    speed: f64,
    last_update: Instant,
}

/// Consumes `Result<ProgressEvent, String>` from the transfer's progress
/// channel, aggregates it into `ProgressSnapshot`s, and fans out to all
/// registered observers.
///
/// | Channel message         | Observer method called         |
/// |--------------------------|--------------------------------|
/// | `Ok(ProgressEvent)`      | `on_progress(&snapshot)`        |
/// | `Err(String)`            | `on_error(&msg)` then stops     |
/// | Channel closed (no err)  | `on_complete(&final_snapshot)`  |
pub struct ProgressNotifier {
    observers: Vec<Box<dyn ProgressObserver>>,
    ranges: HashMap<String, RangeProgress>,
    range_order: Vec<String>,
    start_time: Instant,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            ranges: HashMap::new(),
            range_order: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Register an observer. Must be called before `run()`.
    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    /// Consume progress messages until the channel closes or an error arrives.
    pub async fn run(mut self, mut progress_rx: mpsc::Receiver<Result<ProgressEvent, String>>) {
        while let Some(msg) = progress_rx.recv().await {
            match msg {
                Ok(ev) => {
                    let snapshot = self.handle_event(ev);
                    for observer in &self.observers {
                        observer.on_progress(&snapshot).await;
                    }
                }
                Err(error) => {
                    for observer in &self.observers {
                        observer.on_error(&error).await;
                    }
                    return;
                }
            }
        }
        self.finish().await;
    }

    fn handle_event(&mut self, ev: ProgressEvent) -> ProgressSnapshot {
        let now = Instant::now();

        if !self.ranges.contains_key(&ev.range_id) {
            let total = ev.total_bytes.unwrap_or(0);
            self.range_order.push(ev.range_id.clone());
            self.ranges.insert(
                ev.range_id.clone(),
                RangeProgress {
                    range_id: ev.range_id.clone(),
                    bytes_done: 0,
                    total_bytes: total,
                    speed: 0.0,
                    last_update: now,
                },
            );
        }

        {
            let range = self.ranges.get_mut(&ev.range_id).unwrap();
            range.bytes_done += ev.bytes_delta;

            if range.total_bytes == 0 {
                if let Some(tb) = ev.total_bytes {
                    range.total_bytes = tb;
                }
            }

            let elapsed = now.duration_since(range.last_update).as_secs_f64();
            if elapsed > 0.0 {
                let instant_speed = ev.bytes_delta as f64 / elapsed;
                range.speed = EMA_ALPHA * instant_speed + (1.0 - EMA_ALPHA) * range.speed;
                range.last_update = now;
            }
        }

        self.build_snapshot()
    }

    fn build_snapshot(&self) -> ProgressSnapshot {
        let total_bytes: u64 = self.ranges.values().map(|p| p.total_bytes).sum();
        let total_done: u64 = self.ranges.values().map(|p| p.bytes_done).sum();
        let combined_speed: f64 = self.ranges.values().map(|p| p.speed).sum();
        let remaining = total_bytes.saturating_sub(total_done);
        let eta = if combined_speed > 0.0 {
            remaining as f64 / combined_speed
        } else {
            0.0
        };

        let range_snapshots: Vec<RangeSnapshot> = self
            .range_order
            .iter()
            .filter_map(|id| self.ranges.get(id))
            .map(|p| {
                let rem = p.total_bytes.saturating_sub(p.bytes_done);
                let range_eta = if p.speed > 0.0 { rem as f64 / p.speed } else { 0.0 };
                RangeSnapshot {
                    range_id: p.range_id.clone(),
                    bytes_done: p.bytes_done,
                    total_bytes: p.total_bytes,
                    speed: p.speed,
                    eta_secs: range_eta,
                }
            })
            .collect();

        ProgressSnapshot {
            ranges: range_snapshots,
            total_bytes_done: total_done,
            total_bytes,
            speed: combined_speed,
            eta_secs: eta,
            done: false,
        }
    }

    /// Finalize: build a final snapshot with `done = true`, notify all observers.
    async fn finish(self) {
        let elapsed = self.start_time.elapsed();
        let total_done: u64 = self.ranges.values().map(|p| p.bytes_done).sum();
        let avg_speed = if elapsed.as_secs_f64() > 0.0 {
            total_done as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let mut final_snapshot = self.build_snapshot();
        final_snapshot.done = true;
        final_snapshot.speed = avg_speed;
        final_snapshot.eta_secs = 0.0;

        for observer in &self.observers {
            observer.on_complete(&final_snapshot).await;
        }
    }
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::new()
    }
}
