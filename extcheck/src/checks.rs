//! Check queries over the storage collaborators.
//!
//! Every operation takes the stores it reads explicitly and recomputes
//! derived status on each call: runs can finish between two reads.

use tracing::{debug, instrument};

use crate::core::staleness::{Relevance, assess, created_after};
use crate::core::status::{derive_status, needs_run};
use crate::core::types::{
    AssetKey, CheckExecutionRecord, ExternalCheckDefinition, ResolvedExecution, ResolvedStatus,
    StorageId,
};
use crate::error::CheckQueryError;
use crate::io::store::{ExecutionRecordStore, RunStore, Stores};

/// Checks defined for `asset_key`, optionally narrowed to one name.
pub fn list_checks<'a>(
    definitions: &'a [ExternalCheckDefinition],
    asset_key: &AssetKey,
    check_name: Option<&str>,
) -> Vec<&'a ExternalCheckDefinition> {
    definitions
        .iter()
        .filter(|check| &check.asset_key == asset_key)
        .filter(|check| check_name.is_none_or(|name| check.name == name))
        .collect()
}

pub fn has_asset_checks(definitions: &[ExternalCheckDefinition], asset_key: &AssetKey) -> bool {
    !list_checks(definitions, asset_key, None).is_empty()
}

/// Like [`list_checks`], but refuses storage that cannot hold check executions.
pub fn fetch_checks<'a>(
    executions: &dyn ExecutionRecordStore,
    definitions: &'a [ExternalCheckDefinition],
    asset_key: &AssetKey,
    check_name: Option<&str>,
) -> Result<Vec<&'a ExternalCheckDefinition>, CheckQueryError> {
    if !executions.supports_asset_checks() {
        return Err(CheckQueryError::NeedsMigration);
    }
    Ok(list_checks(definitions, asset_key, check_name))
}

/// Derive the current status of one execution record.
///
/// The run store is only read for records still marked planned.
pub fn resolve_status(
    runs: &dyn RunStore,
    record: &CheckExecutionRecord,
) -> Result<ResolvedStatus, CheckQueryError> {
    let run = if needs_run(record) {
        runs.run(&record.run_id)?
    } else {
        None
    };
    let status = derive_status(record, run.as_ref())?;
    debug!(execution = record.id, stored = ?record.status, resolved = ?status, "resolved execution status");
    Ok(status)
}

/// Whether `record` (already resolved) still reflects the asset's latest
/// materialization.
pub fn targets_latest_materialization(
    stores: Stores<'_>,
    check: &ExternalCheckDefinition,
    record: &CheckExecutionRecord,
    resolved: ResolvedStatus,
) -> Result<bool, CheckQueryError> {
    if resolved == ResolvedStatus::InProgress {
        return Ok(true);
    }
    let latest = stores
        .materializations
        .latest_materialization(&check.asset_key)?;
    let current = match assess(record, resolved, latest.as_ref())? {
        Relevance::Current => true,
        Relevance::Stale => false,
        Relevance::CompareRunCreation {
            execution_run_id,
            materialization_run_id,
        } => {
            let materialization_created = stores.runs.run_created_at(&materialization_run_id)?;
            let execution_created = stores.runs.run_created_at(&execution_run_id)?;
            created_after(execution_created, materialization_created)
        }
    };
    debug!(execution = record.id, resolved = ?resolved, current, "assessed staleness");
    Ok(current)
}

/// One page of executions for `check`, newest first, each with its resolved status.
///
/// `cursor` is the decimal storage id of the last record of the previous page.
/// A blank cursor starts from the newest execution.
#[instrument(skip_all, fields(asset = %check.asset_key, check = %check.name, limit = limit))]
pub fn fetch_executions(
    stores: Stores<'_>,
    check: &ExternalCheckDefinition,
    limit: usize,
    cursor: Option<&str>,
) -> Result<Vec<ResolvedExecution>, CheckQueryError> {
    let cursor = cursor
        .filter(|raw| !raw.trim().is_empty())
        .map(parse_cursor)
        .transpose()?;
    let records =
        stores
            .executions
            .check_executions(&check.asset_key, &check.name, limit, cursor)?;

    records
        .into_iter()
        .map(|record| {
            let resolved_status = resolve_status(stores.runs, &record)?;
            Ok(ResolvedExecution {
                record,
                resolved_status,
            })
        })
        .collect()
}

/// The most recent execution of `check`, if it still describes the asset's
/// latest materialization.
///
/// Only the most recent execution is considered; an older one is never
/// promoted when the newest is stale.
#[instrument(skip_all, fields(asset = %check.asset_key, check = %check.name))]
pub fn fetch_execution_for_latest_materialization(
    stores: Stores<'_>,
    check: &ExternalCheckDefinition,
) -> Result<Option<ResolvedExecution>, CheckQueryError> {
    let mut executions =
        stores
            .executions
            .check_executions(&check.asset_key, &check.name, 1, None)?;
    let Some(record) = executions.pop() else {
        return Ok(None);
    };
    let resolved_status = resolve_status(stores.runs, &record)?;
    if !targets_latest_materialization(stores, check, &record, resolved_status)? {
        debug!(execution = record.id, "latest execution is stale");
        return Ok(None);
    }
    Ok(Some(ResolvedExecution {
        record,
        resolved_status,
    }))
}

fn parse_cursor(raw: &str) -> Result<StorageId, CheckQueryError> {
    raw.trim()
        .parse()
        .map_err(|_| CheckQueryError::InvalidCursor(raw.to_string()))
}
