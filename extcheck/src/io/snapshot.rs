//! JSON snapshot of storage state, usable wherever the live stores are.
//!
//! The CLI reads snapshots exported from a deployment; tests build them in
//! memory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{
    AssetKey, CheckExecutionRecord, ExternalCheckDefinition, MaterializationRecord, RunRecord,
    StorageId,
};
use crate::io::store::{ExecutionRecordStore, MaterializationStore, RunStore};

/// Materialization keyed by the asset it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMaterialization {
    pub asset_key: AssetKey,
    #[serde(flatten)]
    pub record: MaterializationRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotStore {
    /// False mimics storage that has not been migrated for asset checks.
    pub supports_asset_checks: bool,
    pub checks: Vec<ExternalCheckDefinition>,
    pub runs: Vec<RunRecord>,
    pub executions: Vec<CheckExecutionRecord>,
    pub materializations: Vec<AssetMaterialization>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self {
            supports_asset_checks: true,
            checks: Vec::new(),
            runs: Vec::new(),
            executions: Vec::new(),
            materializations: Vec::new(),
        }
    }
}

impl SnapshotStore {
    pub fn with_check(mut self, check: ExternalCheckDefinition) -> Self {
        self.checks.push(check);
        self
    }

    pub fn with_run(mut self, run: RunRecord) -> Self {
        self.runs.push(run);
        self
    }

    pub fn with_execution(mut self, execution: CheckExecutionRecord) -> Self {
        self.executions.push(execution);
        self
    }

    pub fn with_materialization(mut self, asset_key: AssetKey, record: MaterializationRecord) -> Self {
        self.materializations
            .push(AssetMaterialization { asset_key, record });
        self
    }
}

/// Load a snapshot from a JSON file.
pub fn load_snapshot(path: &Path) -> Result<SnapshotStore> {
    debug!(path = %path.display(), "loading snapshot");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    let snapshot: SnapshotStore = serde_json::from_str(&contents)
        .with_context(|| format!("parse snapshot {}", path.display()))?;
    debug!(
        checks = snapshot.checks.len(),
        runs = snapshot.runs.len(),
        executions = snapshot.executions.len(),
        "snapshot loaded"
    );
    Ok(snapshot)
}

/// Write a snapshot as pretty JSON with a trailing newline.
pub fn write_snapshot(path: &Path, snapshot: &SnapshotStore) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write snapshot {}", path.display()))
}

impl ExecutionRecordStore for SnapshotStore {
    fn supports_asset_checks(&self) -> bool {
        self.supports_asset_checks
    }

    fn check_executions(
        &self,
        asset_key: &AssetKey,
        check_name: &str,
        limit: usize,
        cursor: Option<StorageId>,
    ) -> Result<Vec<CheckExecutionRecord>> {
        let mut matching: Vec<&CheckExecutionRecord> = self
            .executions
            .iter()
            .filter(|record| &record.asset_key == asset_key && record.check_name == check_name)
            .filter(|record| cursor.is_none_or(|cursor| record.id < cursor))
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(matching.into_iter().take(limit).cloned().collect())
    }
}

impl RunStore for SnapshotStore {
    fn run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.runs.iter().find(|run| run.run_id == run_id).cloned())
    }
}

impl MaterializationStore for SnapshotStore {
    fn latest_materialization(
        &self,
        asset_key: &AssetKey,
    ) -> Result<Option<MaterializationRecord>> {
        Ok(self
            .materializations
            .iter()
            .filter(|entry| &entry.asset_key == asset_key)
            .max_by_key(|entry| entry.record.storage_id)
            .map(|entry| entry.record.clone()))
    }
}
