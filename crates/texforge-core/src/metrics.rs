//! Global atomic counters for build observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on daemon shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub builds_started: u64,
    pub builds_succeeded: u64,
    pub builds_failed: u64,
    pub builds_timed_out: u64,
    pub runtime_unavailable: u64,
    pub workspaces_created: u64,
    pub workspaces_removed: u64,
}

pub struct Metrics {
    builds_started: AtomicU64,
    builds_succeeded: AtomicU64,
    builds_failed: AtomicU64,
    builds_timed_out: AtomicU64,
    runtime_unavailable: AtomicU64,
    workspaces_created: AtomicU64,
    workspaces_removed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, metric: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = metric, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            builds_started: AtomicU64::new(0),
            builds_succeeded: AtomicU64::new(0),
            builds_failed: AtomicU64::new(0),
            builds_timed_out: AtomicU64::new(0),
            runtime_unavailable: AtomicU64::new(0),
            workspaces_created: AtomicU64::new(0),
            workspaces_removed: AtomicU64::new(0),
        }
    }

    pub fn inc_builds_started(&self) {
        bump(&self.builds_started, "builds_started");
    }

    pub fn inc_builds_succeeded(&self) {
        bump(&self.builds_succeeded, "builds_succeeded");
    }

    pub fn inc_builds_failed(&self) {
        bump(&self.builds_failed, "builds_failed");
    }

    pub fn inc_builds_timed_out(&self) {
        bump(&self.builds_timed_out, "builds_timed_out");
    }

    pub fn inc_runtime_unavailable(&self) {
        bump(&self.runtime_unavailable, "runtime_unavailable");
    }

    pub fn inc_workspaces_created(&self) {
        bump(&self.workspaces_created, "workspaces_created");
    }

    pub fn inc_workspaces_removed(&self) {
        bump(&self.workspaces_removed, "workspaces_removed");
    }

    /// Read every counter at once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            builds_started: self.builds_started.load(Ordering::Relaxed),
            builds_succeeded: self.builds_succeeded.load(Ordering::Relaxed),
            builds_failed: self.builds_failed.load(Ordering::Relaxed),
            builds_timed_out: self.builds_timed_out.load(Ordering::Relaxed),
            runtime_unavailable: self.runtime_unavailable.load(Ordering::Relaxed),
            workspaces_created: self.workspaces_created.load(Ordering::Relaxed),
            workspaces_removed: self.workspaces_removed.load(Ordering::Relaxed),
        }
    }

    /// Workspaces allocated but not yet removed.
    pub fn live_workspaces(&self) -> u64 {
        let s = self.snapshot();
        s.workspaces_created.saturating_sub(s.workspaces_removed)
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            builds_started = s.builds_started,
            builds_succeeded = s.builds_succeeded,
            builds_failed = s.builds_failed,
            builds_timed_out = s.builds_timed_out,
            runtime_unavailable = s.runtime_unavailable,
            workspaces_created = s.workspaces_created,
            workspaces_removed = s.workspaces_removed,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.builds_started,
            &self.builds_succeeded,
            &self.builds_failed,
            &self.builds_timed_out,
            &self.runtime_unavailable,
            &self.workspaces_created,
            &self.workspaces_removed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_builds_started();
        m.inc_builds_started();
        m.inc_builds_succeeded();
        m.inc_builds_timed_out();
        let s = m.snapshot();
        assert_eq!(s.builds_started, 2);
        assert_eq!(s.builds_succeeded, 1);
        assert_eq!(s.builds_timed_out, 1);
        assert_eq!(s.builds_failed, 0);
    }

    #[test]
    fn live_workspaces_tracks_pairing() {
        let m = Metrics::new();
        m.inc_workspaces_created();
        m.inc_workspaces_created();
        m.inc_workspaces_removed();
        assert_eq!(m.live_workspaces(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_builds_failed();
        m.inc_runtime_unavailable();
        m.inc_workspaces_created();
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
