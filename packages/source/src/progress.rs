//! Progress reporting for long-running phases.
//!
//! The fetch phase and both pipeline passes report through
//! [`ProgressCallback`] so that library code never depends on a rendering
//! backend. Binaries plug in `indicatif` bars; tests use [`NullProgress`];
//! headless runs can use [`LogProgress`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives progress updates from a long-running phase.
///
/// Implementations must be `Send + Sync`: the fetch phase reports from a
/// spawned task.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work (enables percentage/ETA).
    fn set_total(&self, total: u64);

    /// Set the current position (absolute, not delta).
    fn set_position(&self, pos: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn set_position(&self, _pos: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}

/// Reports progress through the `log` facade at every tenth of the total
/// (or every `step` units when the total is unknown).
pub struct LogProgress {
    label: String,
    step: u64,
    total: AtomicU64,
    position: AtomicU64,
    last_logged: AtomicU64,
}

impl LogProgress {
    /// A reporter prefixing each line with `label`.
    #[must_use]
    pub fn new(label: impl Into<String>, step: u64) -> Self {
        Self {
            label: label.into(),
            step: step.max(1),
            total: AtomicU64::new(0),
            position: AtomicU64::new(0),
            last_logged: AtomicU64::new(0),
        }
    }

    fn interval(&self) -> u64 {
        match self.total.load(Ordering::Relaxed) {
            0 => self.step,
            total => (total / 10).max(1),
        }
    }

    fn maybe_log(&self, pos: u64) {
        let last = self.last_logged.load(Ordering::Relaxed);
        if pos >= last + self.interval()
            && self
                .last_logged
                .compare_exchange(last, pos, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            match self.total.load(Ordering::Relaxed) {
                0 => log::info!("[{}] {pos}", self.label),
                total => log::info!("[{}] {pos} / {total}", self.label),
            }
        }
    }
}

impl ProgressCallback for LogProgress {
    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn set_position(&self, pos: u64) {
        self.position.store(pos, Ordering::Relaxed);
        self.maybe_log(pos);
    }

    fn inc(&self, delta: u64) {
        let pos = self.position.fetch_add(delta, Ordering::Relaxed) + delta;
        self.maybe_log(pos);
    }

    fn set_message(&self, msg: String) {
        log::debug!("[{}] {msg}", self.label);
    }

    fn finish(&self, msg: String) {
        log::info!("[{}] {msg}", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_progress_tracks_position() {
        let progress = LogProgress::new("test", 5);
        progress.inc(3);
        progress.inc(4);
        assert_eq!(progress.position.load(Ordering::Relaxed), 7);
        assert_eq!(progress.last_logged.load(Ordering::Relaxed), 7);
        progress.inc(1);
        assert_eq!(progress.last_logged.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn log_interval_follows_total() {
        let progress = LogProgress::new("test", 5);
        progress.set_total(1_000);
        assert_eq!(progress.interval(), 100);
        progress.set_position(99);
        assert_eq!(progress.last_logged.load(Ordering::Relaxed), 0);
        progress.set_position(100);
        assert_eq!(progress.last_logged.load(Ordering::Relaxed), 100);
    }
}
