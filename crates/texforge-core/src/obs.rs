//! Structured observability hooks for the build lifecycle.
//!
//! Events are emitted at `info!` level with an `event` field so they can be
//! filtered from JSON logs (`texforge --json`, `TEXFORGE_LOG_JSON=true` for the daemon).

use tracing::{info, warn};

use crate::sandbox::StepOutcome;

/// Build-scoped span; every event inside carries `build_id`.
pub fn build_span(build_id: &str) -> tracing::Span {
    tracing::info_span!("texforge.build", build_id = %build_id)
}

pub fn emit_build_started(build_id: &str, engine: &str, files: usize, check_only: bool) {
    info!(
        event = "build.started",
        build_id = %build_id,
        engine = %engine,
        files = files,
        check_only = check_only,
    );
}

pub fn emit_plan_ready(build_id: &str, steps: usize, engine_passes: usize) {
    info!(event = "build.planned", build_id = %build_id, steps = steps, engine_passes = engine_passes);
}

/// Emit event: one plan step finished inside the container.
pub fn emit_step_finished(container: &str, outcome: &StepOutcome) {
    info!(
        event = "build.step_finished",
        container = %container,
        step = %outcome.kind.name(),
        exit_code = ?outcome.exit_code,
        duration_ms = outcome.duration_ms,
        timed_out = outcome.timed_out,
        tolerant = outcome.tolerant,
    );
}

pub fn emit_build_finished(build_id: &str, duration_ms: u64, errors: usize, success: bool) {
    info!(
        event = "build.finished",
        build_id = %build_id,
        duration_ms = duration_ms,
        errors = errors,
        success = success,
    );
}

pub fn emit_build_timed_out(build_id: &str, timeout_ms: u64) {
    warn!(event = "build.timed_out", build_id = %build_id, timeout_ms = timeout_ms);
}

pub fn emit_runtime_unavailable(build_id: &str, reason: &str) {
    warn!(event = "runtime.unavailable", build_id = %build_id, reason = %reason);
}
