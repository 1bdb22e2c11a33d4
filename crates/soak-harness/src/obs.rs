//! Structured observability hooks for soak run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via `soak_span`
//! - Emission functions for run start/finish, phase launch/settle and tally read-back
//!
//! Events are emitted at `info!` level; teardown problems at `warn!`.

use tracing::info;

use crate::workloads::Phase;

/// Run-scoped span tagged with the run id.
///
/// Attach it to the run future with `tracing::Instrument`.
///
/// ```ignore
/// run(plan).instrument(soak_span(&run_id)).await
/// ```
pub fn soak_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("soak.run", run_id = %run_id)
}

/// Emit event: soak run started.
pub fn emit_soak_started(run_id: &str, plan_digest: &str, versions: usize, total: u64, factor: u64) {
    info!(
        event = "soak.started",
        run_id = %run_id,
        plan_digest = %plan_digest,
        versions,
        total_messages_per_queue = total,
        multiply_factor = factor,
    );
}

/// Emit event: a phase's script was evaluated in one environment.
pub fn emit_phase_launched(version: &str, phase: Phase, units: u64) {
    info!(event = "phase.launched", version = %version, phase = %phase, units);
}

/// Emit event: a phase's progress counter reached its target.
pub fn emit_phase_settled(version: &str, phase: Phase, wait_ms: u64) {
    info!(event = "phase.settled", version = %version, phase = %phase, wait_ms);
}

/// Emit event: an error tally was read back.
pub fn emit_tally_read(version: &str, phase: Phase, errors: i64) {
    info!(
        event = "tally.read",
        version = %version,
        tally = phase.tally_name(),
        errors,
    );
}

/// Emit event: soak run finished.
pub fn emit_soak_finished(run_id: &str, duration_ms: u64, passed: bool) {
    info!(
        event = "soak.finished",
        run_id = %run_id,
        duration_ms,
        passed,
    );
}

/// Emit event: teardown step failed (warning level).
pub fn emit_teardown_error(step: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "soak.teardown_error", step = %step, error = %error);
}
