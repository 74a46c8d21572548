//! Read-only views of the storage collaborators.
//!
//! Implementations are external (event log, run storage). A record that does
//! not exist is `Ok(None)`; `Err` is reserved for failed queries.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::core::types::{
    AssetKey, CheckExecutionRecord, MaterializationRecord, RunRecord, StorageId,
};

pub trait ExecutionRecordStore {
    /// False when the storage schema predates asset checks.
    fn supports_asset_checks(&self) -> bool {
        true
    }

    /// Executions of one check, newest first (descending storage id).
    ///
    /// `cursor` excludes every record with a storage id at or above it.
    fn check_executions(
        &self,
        asset_key: &AssetKey,
        check_name: &str,
        limit: usize,
        cursor: Option<StorageId>,
    ) -> Result<Vec<CheckExecutionRecord>>;
}

pub trait RunStore {
    fn run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Creation time of a run, for stores that index it separately.
    fn run_created_at(&self, run_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.run(run_id)?.map(|run| run.create_timestamp))
    }
}

pub trait MaterializationStore {
    fn latest_materialization(&self, asset_key: &AssetKey)
    -> Result<Option<MaterializationRecord>>;
}

/// The three stores a check query reads from.
#[derive(Clone, Copy)]
pub struct Stores<'a> {
    pub executions: &'a dyn ExecutionRecordStore,
    pub runs: &'a dyn RunStore,
    pub materializations: &'a dyn MaterializationStore,
}

impl<'a> Stores<'a> {
    /// Use one value that implements every store.
    pub fn from_single<S>(store: &'a S) -> Self
    where
        S: ExecutionRecordStore + RunStore + MaterializationStore,
    {
        Self {
            executions: store,
            runs: store,
            materializations: store,
        }
    }
}
