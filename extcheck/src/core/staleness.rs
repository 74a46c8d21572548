//! Decide whether a resolved execution still describes the asset's latest
//! materialization.
//!
//! The decision is pure. When it can only be settled by comparing run
//! creation times, [`assess`] says so and the caller looks the runs up and
//! finishes with [`created_after`].

use chrono::{DateTime, Utc};

use crate::core::types::{CheckExecutionRecord, MaterializationRecord, ResolvedStatus};
use crate::error::InvariantViolation;

/// Outcome of the pure part of the staleness decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relevance {
    /// Surface the execution.
    Current,
    /// Hide the execution.
    Stale,
    /// Surface iff the execution's run was created after the materialization's run.
    CompareRunCreation {
        execution_run_id: String,
        materialization_run_id: String,
    },
}

impl Relevance {
    fn from_bool(current: bool) -> Self {
        if current { Self::Current } else { Self::Stale }
    }
}

pub fn assess(
    record: &CheckExecutionRecord,
    resolved: ResolvedStatus,
    latest: Option<&MaterializationRecord>,
) -> Result<Relevance, InvariantViolation> {
    match (resolved, latest) {
        (ResolvedStatus::InProgress, _) => Ok(Relevance::Current),
        // Nothing materialized yet, nothing to be stale against.
        (_, None) => Ok(Relevance::Current),
        (ResolvedStatus::Succeeded | ResolvedStatus::Failed, Some(latest)) => {
            let evaluation = record.evaluation.as_ref().ok_or_else(|| {
                InvariantViolation(format!(
                    "execution {} resolved {:?} without an evaluation",
                    record.id, resolved
                ))
            })?;
            // No target: the check ran before any materialization existed.
            let Some(target) = &evaluation.target_materialization else {
                return Ok(Relevance::Stale);
            };
            Ok(Relevance::from_bool(target.storage_id == latest.storage_id))
        }
        (ResolvedStatus::ExecutionFailed | ResolvedStatus::Skipped, Some(latest)) => {
            if record.run_id == latest.run_id {
                return Ok(Relevance::Current);
            }
            Ok(Relevance::CompareRunCreation {
                execution_run_id: record.run_id.clone(),
                materialization_run_id: latest.run_id.clone(),
            })
        }
    }
}

/// Best-effort tie-break on run creation timestamps.
///
/// Assumes creation times are comparable across runs. A missing run is
/// insufficient evidence and yields `false`.
pub fn created_after(
    execution_run_created: Option<DateTime<Utc>>,
    materialization_run_created: Option<DateTime<Utc>>,
) -> bool {
    match (execution_run_created, materialization_run_created) {
        (Some(execution), Some(materialization)) => execution > materialization,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RecordStatus;
    use crate::test_support::{at, evaluated, execution, materialization};

    #[test]
    fn in_progress_is_always_current() {
        let record = execution(1, "r1", RecordStatus::Planned);
        let latest = materialization(99, "other");
        assert_eq!(
            assess(&record, ResolvedStatus::InProgress, Some(&latest)),
            Ok(Relevance::Current)
        );
        assert_eq!(
            assess(&record, ResolvedStatus::InProgress, None),
            Ok(Relevance::Current)
        );
    }

    #[test]
    fn unmaterialized_asset_shows_everything() {
        let record = evaluated(1, "r1", true, None);
        for resolved in [
            ResolvedStatus::Succeeded,
            ResolvedStatus::Failed,
            ResolvedStatus::ExecutionFailed,
            ResolvedStatus::Skipped,
        ] {
            assert_eq!(assess(&record, resolved, None), Ok(Relevance::Current));
        }
    }

    #[test]
    fn evaluation_must_target_latest_storage_id_exactly() {
        let record = evaluated(1, "r1", true, Some(42));
        let same = materialization(42, "r1");
        let newer = materialization(43, "r1");
        assert_eq!(
            assess(&record, ResolvedStatus::Succeeded, Some(&same)),
            Ok(Relevance::Current)
        );
        assert_eq!(
            assess(&record, ResolvedStatus::Succeeded, Some(&newer)),
            Ok(Relevance::Stale)
        );
    }

    #[test]
    fn evaluation_without_target_is_stale() {
        let record = evaluated(1, "r1", false, None);
        let latest = materialization(5, "r1");
        assert_eq!(
            assess(&record, ResolvedStatus::Failed, Some(&latest)),
            Ok(Relevance::Stale)
        );
    }

    #[test]
    fn completed_status_without_evaluation_is_invariant_violation() {
        let record = execution(1, "r1", RecordStatus::Succeeded);
        let latest = materialization(5, "r1");
        assert!(assess(&record, ResolvedStatus::Succeeded, Some(&latest)).is_err());
    }

    #[test]
    fn incomplete_execution_in_materializing_run_is_current() {
        let record = execution(1, "shared", RecordStatus::Planned);
        let latest = materialization(5, "shared");
        for resolved in [ResolvedStatus::ExecutionFailed, ResolvedStatus::Skipped] {
            assert_eq!(
                assess(&record, resolved, Some(&latest)),
                Ok(Relevance::Current)
            );
        }
    }

    #[test]
    fn incomplete_execution_in_other_run_defers_to_timestamps() {
        let record = execution(1, "check-run", RecordStatus::Planned);
        let latest = materialization(5, "mat-run");
        assert_eq!(
            assess(&record, ResolvedStatus::Skipped, Some(&latest)),
            Ok(Relevance::CompareRunCreation {
                execution_run_id: "check-run".to_string(),
                materialization_run_id: "mat-run".to_string(),
            })
        );
    }

    #[test]
    fn created_after_is_strict_and_conservative() {
        assert!(created_after(Some(at(20)), Some(at(10))));
        assert!(!created_after(Some(at(10)), Some(at(10))));
        assert!(!created_after(Some(at(5)), Some(at(10))));
        assert!(!created_after(None, Some(at(10))));
        assert!(!created_after(Some(at(20)), None));
    }
}
