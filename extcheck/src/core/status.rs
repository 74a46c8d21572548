//! Resolution of stored check execution status against the owning run.
//!
//! A record is written `PLANNED` when its run starts and flipped to
//! `SUCCEEDED`/`FAILED` only by an evaluation event. A record that is still
//! planned is disambiguated by the run's lifecycle.

use crate::core::types::{CheckExecutionRecord, RecordStatus, ResolvedStatus, RunRecord, RunStatus};
use crate::error::InvariantViolation;

/// True when the owning run must be looked up to resolve `record`.
pub fn needs_run(record: &CheckExecutionRecord) -> bool {
    record.status == RecordStatus::Planned
}

/// Derive the resolved status of `record`.
///
/// `run` is only consulted for planned records and must be the record's
/// owning run.
pub fn derive_status(
    record: &CheckExecutionRecord,
    run: Option<&RunRecord>,
) -> Result<ResolvedStatus, InvariantViolation> {
    match record.status {
        RecordStatus::Succeeded => Ok(ResolvedStatus::Succeeded),
        RecordStatus::Failed => Ok(ResolvedStatus::Failed),
        RecordStatus::Planned => {
            let run = run.ok_or_else(|| {
                InvariantViolation(format!(
                    "run '{}' for planned execution {} not found",
                    record.run_id, record.id
                ))
            })?;
            if run.run_id != record.run_id {
                return Err(InvariantViolation(format!(
                    "execution {} belongs to run '{}', got run '{}'",
                    record.id, record.run_id, run.run_id
                )));
            }
            Ok(from_run_state(run))
        }
        RecordStatus::Unrecognized => Err(InvariantViolation(format!(
            "unexpected stored status for execution {}",
            record.id
        ))),
    }
}

fn from_run_state(run: &RunRecord) -> ResolvedStatus {
    if !run.is_finished() {
        return ResolvedStatus::InProgress;
    }
    match run.status {
        RunStatus::Failure => ResolvedStatus::ExecutionFailed,
        _ => ResolvedStatus::Skipped,
    }
}
