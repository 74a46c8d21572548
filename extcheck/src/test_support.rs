//! Test-only builders for storage records and recording transports.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};

use crate::core::protocol::{EnvVars, OrchestrationContext};
use crate::core::types::{
    AssetKey, CheckEvaluation, CheckExecutionRecord, CheckSeverity, MaterializationRecord,
    RecordStatus, RunRecord, RunStatus, StorageId, TargetMaterialization,
};
use crate::io::file_transport::FileMessageReader;
use crate::io::transport::{ContextInjector, EnvContextInjector, MessageHandler, MessageReader};

/// Deterministic UTC instant `secs` after the epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

pub fn run(run_id: &str, status: RunStatus, created_secs: i64) -> RunRecord {
    RunRecord {
        run_id: run_id.to_string(),
        status,
        create_timestamp: at(created_secs),
    }
}

/// Execution of `orders`/`fresh` without an evaluation payload.
pub fn execution(id: StorageId, run_id: &str, status: RecordStatus) -> CheckExecutionRecord {
    execution_for(&AssetKey::parse("orders"), "fresh", id, run_id, status)
}

pub fn execution_for(
    asset_key: &AssetKey,
    check_name: &str,
    id: StorageId,
    run_id: &str,
    status: RecordStatus,
) -> CheckExecutionRecord {
    CheckExecutionRecord {
        id,
        asset_key: asset_key.clone(),
        check_name: check_name.to_string(),
        run_id: run_id.to_string(),
        status,
        evaluation: None,
        create_timestamp: at(id),
    }
}

/// Completed execution of `orders`/`fresh` targeting `target` (if any).
pub fn evaluated(
    id: StorageId,
    run_id: &str,
    passed: bool,
    target: Option<StorageId>,
) -> CheckExecutionRecord {
    evaluated_for(&AssetKey::parse("orders"), "fresh", id, run_id, passed, target)
}

pub fn evaluated_for(
    asset_key: &AssetKey,
    check_name: &str,
    id: StorageId,
    run_id: &str,
    passed: bool,
    target: Option<StorageId>,
) -> CheckExecutionRecord {
    let status = if passed {
        RecordStatus::Succeeded
    } else {
        RecordStatus::Failed
    };
    CheckExecutionRecord {
        evaluation: Some(CheckEvaluation {
            passed,
            target_materialization: target.map(|storage_id| TargetMaterialization {
                storage_id,
                run_id: run_id.to_string(),
                timestamp: at(storage_id),
            }),
            severity: CheckSeverity::Error,
            metadata: Default::default(),
        }),
        ..execution_for(asset_key, check_name, id, run_id, status)
    }
}

pub fn materialization(storage_id: StorageId, run_id: &str) -> MaterializationRecord {
    materialization_at(storage_id, run_id, storage_id)
}

pub fn materialization_at(storage_id: StorageId, run_id: &str, secs: i64) -> MaterializationRecord {
    MaterializationRecord {
        storage_id,
        run_id: run_id.to_string(),
        timestamp: at(secs),
    }
}

/// Shared, ordered log of transport lifecycle calls.
#[derive(Debug, Clone, Default)]
pub struct TransportLog(Arc<Mutex<Vec<String>>>);

impl TransportLog {
    pub fn record(&self, event: &str) {
        self.0.lock().expect("transport log lock").push(event.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().expect("transport log lock").clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }
}

/// Injector that passes the context inline and records its lifecycle.
pub struct RecordingInjector {
    log: TransportLog,
    inner: EnvContextInjector,
}

impl RecordingInjector {
    pub fn new(log: TransportLog) -> Self {
        Self {
            log,
            inner: EnvContextInjector,
        }
    }
}

impl ContextInjector for RecordingInjector {
    fn prepare(&mut self, context: &OrchestrationContext) -> Result<EnvVars> {
        self.log.record("injector.prepare");
        self.inner.prepare(context)
    }

    fn dispose(&mut self) -> Result<()> {
        self.log.record("injector.dispose");
        self.inner.dispose()
    }
}

/// Injector whose `prepare` always fails.
pub struct FailingInjector;

impl ContextInjector for FailingInjector {
    fn prepare(&mut self, _context: &OrchestrationContext) -> Result<EnvVars> {
        Err(anyhow!("injector unavailable"))
    }

    fn dispose(&mut self) -> Result<()> {
        Err(anyhow!("dispose must not run after a failed prepare"))
    }
}

/// Reader that records its lifecycle, optionally backed by a message file.
pub struct RecordingReader {
    log: TransportLog,
    inner: Option<FileMessageReader>,
    fail_prepare: bool,
}

impl RecordingReader {
    pub fn new(log: TransportLog) -> Self {
        Self {
            log,
            inner: None,
            fail_prepare: false,
        }
    }

    pub fn with_file(log: TransportLog, path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Some(FileMessageReader::new(path)),
            ..Self::new(log)
        }
    }

    pub fn failing_prepare(log: TransportLog) -> Self {
        Self {
            fail_prepare: true,
            ..Self::new(log)
        }
    }
}

impl MessageReader for RecordingReader {
    fn prepare(&mut self, context: &OrchestrationContext) -> Result<EnvVars> {
        self.log.record("reader.prepare");
        if self.fail_prepare {
            return Err(anyhow!("reader unavailable"));
        }
        match &mut self.inner {
            Some(inner) => inner.prepare(context),
            None => Ok(EnvVars::new()),
        }
    }

    fn drain(&mut self, handler: &mut dyn MessageHandler) -> Result<usize> {
        match &mut self.inner {
            Some(inner) => inner.drain(handler),
            None => Ok(0),
        }
    }

    fn finish(&mut self, handler: &mut dyn MessageHandler) -> Result<usize> {
        match &mut self.inner {
            Some(inner) => inner.finish(handler),
            None => Ok(0),
        }
    }

    fn dispose(&mut self) -> Result<()> {
        self.log.record("reader.dispose");
        match &mut self.inner {
            Some(inner) => inner.dispose(),
            None => Ok(()),
        }
    }
}
