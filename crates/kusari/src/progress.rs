use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of the progress of a whole sequence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateProgress {
    total: usize,
    completed: usize,
    failed: usize,
    /// Fraction of the in-flight item, `0.0` when nothing is in flight.
    current: f64,
    fraction: f64,
}

impl AggregateProgress {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
            current: 0.,
            fraction: 0.,
        }
    }

    /// Number of targets in the sequence.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of items that settled, successfully or not.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn succeeded(&self) -> usize {
        self.completed - self.failed
    }

    /// Progress of the item in flight, in `[0, 1]`.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Overall completion in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn percentage(&self) -> f64 {
        self.fraction * 100.
    }

    /// Every item settled. An empty sequence completes once it is resumed.
    pub fn is_complete(&self) -> bool {
        self.completed == self.total && self.fraction >= 1.
    }

    fn recompute(&mut self) {
        self.fraction = if self.total == 0 {
            1.
        } else {
            ((self.completed as f64 + self.current) / self.total as f64).min(1.)
        };
    }

    /// Record the settlement of the item at `completed`.
    pub(crate) fn settle(&mut self, failed: bool) {
        self.completed += 1;
        if failed {
            self.failed += 1;
        }
        self.current = 0.;
        self.recompute();
    }

    /// Mark an empty sequence as done.
    pub(crate) fn finish_empty(&mut self) {
        self.recompute();
    }
}

/// Shared writer side of the aggregate progress.
pub(crate) type ProgressSender = Arc<watch::Sender<AggregateProgress>>;

/// Progress reporter handed to a fetcher for a single item.
///
/// Reports are folded into the aggregate progress while the item is in
/// flight. Once the item has settled, further reports are ignored.
#[derive(Clone, Debug)]
pub struct ItemProgress {
    index: usize,
    sender: ProgressSender,
}

impl ItemProgress {
    pub(crate) fn new(index: usize, sender: ProgressSender) -> Self {
        Self { index, sender }
    }

    /// A reporter that is not attached to any sequence.
    pub fn detached() -> Self {
        let (sender, _) = watch::channel(AggregateProgress::new(1));
        Self::new(0, Arc::new(sender))
    }

    /// Report the fraction of this item done so far.
    ///
    /// Values are clamped to `[0, 1]`. A value lower than the last report
    /// is ignored so the aggregate never goes backwards.
    pub fn set(&self, fraction: f64) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0., 1.);
        let index = self.index;
        self.sender.send_if_modified(|progress| {
            if progress.completed != index || progress.current >= fraction {
                return false;
            }
            progress.current = fraction;
            progress.recompute();
            true
        });
    }

    /// Report `done` out of `total` units. Ignored when `total` is zero.
    pub fn set_ratio(&self, done: u64, total: u64) {
        if total > 0 {
            self.set(done as f64 / total as f64);
        }
    }
}
