use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::loop_runner::LoopSummary;

/// Rates over the last completed interval plus session totals.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub tps: f32,
    /// Average simulated ticks per presented frame.
    pub ticks_per_frame: f32,
    pub total_ticks: u64,
    pub dropped_backlog_ms: u64,
}

/// Latest snapshot, readable from outside the loop. A panic while the lock
/// was held leaves the last written value in place.
#[derive(Clone, Debug, Default)]
pub struct MetricsHandle {
    latest: Arc<Mutex<LoopMetricsSnapshot>>,
}

impl MetricsHandle {
    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, snapshot: LoopMetricsSnapshot) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// Turns the running `LoopSummary` into per-interval rates on the loop's own
/// clock, so headless runs report the same numbers on any host.
#[derive(Debug)]
pub(crate) struct MetricsWindow {
    interval: Duration,
    opened_at: Duration,
    baseline: LoopSummary,
}

impl MetricsWindow {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            opened_at: Duration::ZERO,
            baseline: LoopSummary::default(),
        }
    }

    pub(crate) fn observe(
        &mut self,
        summary: &LoopSummary,
        clock: Duration,
    ) -> Option<LoopMetricsSnapshot> {
        let elapsed = clock.saturating_sub(self.opened_at);
        if elapsed < self.interval {
            return None;
        }

        let ticks = summary.ticks.saturating_sub(self.baseline.ticks);
        let frames = summary.frames.saturating_sub(self.baseline.frames);
        let snapshot = LoopMetricsSnapshot {
            tps: ticks as f32 / elapsed.as_secs_f32().max(f32::EPSILON),
            ticks_per_frame: if frames == 0 {
                0.0
            } else {
                ticks as f32 / frames as f32
            },
            total_ticks: summary.ticks,
            dropped_backlog_ms: summary.dropped_backlog.as_millis() as u64,
        };

        self.opened_at = clock;
        self.baseline = *summary;
        Some(snapshot)
    }
}
