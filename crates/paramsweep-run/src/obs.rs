//! Structured observability hooks for sweep and run lifecycle events.
//!
//! This module provides:
//! - A sweep-scoped tracing span via [`sweep_span`]
//! - Emission functions for key lifecycle events: sweep start, run
//!   completion, retries, release failures, sweep finish
//!
//! Events are emitted at `info!` level (`warn!` for failures) and filtered
//! through `RUST_LOG`.

use tracing::{info, warn};

use crate::collector::{RunResult, SweepSummary};

/// Span tagging every event of one sweep with its id and tool name.
///
/// Attach it with `tracing::Instrument` so spawned runs inherit it.
pub fn sweep_span(sweep_id: &str, tool_name: &str) -> tracing::Span {
    tracing::info_span!("paramsweep.sweep", sweep_id = %sweep_id, tool = %tool_name)
}

/// Emit event: sweep started.
pub fn emit_sweep_started(
    sweep_id: &str,
    tool_name: &str,
    total_runs: u64,
    max_concurrency: usize,
) {
    info!(
        event = "sweep.started",
        sweep_id = %sweep_id,
        tool = %tool_name,
        total_runs = total_runs,
        max_concurrency = max_concurrency,
    );
}

/// Emit event: a run reached its terminal state.
pub fn emit_run_completed(result: &RunResult) {
    if result.succeeded() {
        info!(
            event = "run.completed",
            index = result.index(),
            assignment = %result.assignment,
            state = %result.state,
            attempts = result.attempts,
        );
    } else {
        warn!(
            event = "run.completed",
            index = result.index(),
            assignment = %result.assignment,
            state = %result.state,
            attempts = result.attempts,
            error = result.error.as_deref().unwrap_or(""),
        );
    }
}

/// Emit event: a failed run is about to be re-run from scratch.
pub fn emit_run_retrying(index: u64, attempt: u32, delay_ms: u64, error: Option<&str>) {
    warn!(
        event = "run.retrying",
        index = index,
        attempt = attempt,
        delay_ms = delay_ms,
        error = error.unwrap_or(""),
    );
}

/// Emit event: tearing down compute failed (warning level).
pub fn emit_release_error(index: u64, handle_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.release_error", index = index, handle = %handle_id, error = %error);
}

/// Emit event: the sweep was asked to stop early.
pub fn emit_sweep_cancelled(reason: &str) {
    warn!(event = "sweep.cancelled", reason = %reason);
}

/// Emit event: sweep finished with aggregate counts.
pub fn emit_sweep_finished(summary: &SweepSummary) {
    info!(
        event = "sweep.finished",
        sweep_id = %summary.sweep_id,
        duration_ms = summary.duration_ms(),
        total = summary.counts.total,
        succeeded = summary.counts.succeeded,
        failed = summary.counts.failed(),
        success = summary.all_succeeded(),
    );
}
