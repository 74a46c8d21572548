//! Shared deterministic types for check resolution and external execution.
//!
//! These types define stable contracts between core components and the
//! storage collaborators. They carry no I/O and serialize to stable JSON.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Monotonically increasing event-log identifier.
pub type StorageId = i64;

/// Hierarchical asset identifier, rendered as `a/b/c`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(pub Vec<String>);

impl AssetKey {
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(path.into_iter().map(Into::into).collect())
    }

    /// Parse a slash-separated key. Empty components are dropped.
    pub fn parse(raw: &str) -> Self {
        Self::new(raw.split('/').map(str::trim).filter(|part| !part.is_empty()))
    }

    pub fn to_user_string(&self) -> String {
        self.0.join("/")
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_user_string())
    }
}

/// A check declared against an asset, loaded out of band from definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCheckDefinition {
    pub asset_key: AssetKey,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExternalCheckDefinition {
    pub fn new(asset_key: AssetKey, name: impl Into<String>) -> Self {
        Self {
            asset_key,
            name: name.into(),
            description: None,
        }
    }
}

/// Status as written by the event log.
///
/// `Unrecognized` absorbs values written by storage versions this crate does
/// not know; the resolver rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Planned,
    Succeeded,
    Failed,
    #[serde(other)]
    Unrecognized,
}

/// Severity of a failed check. Unreported severities are `Error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckSeverity {
    Warn,
    #[default]
    Error,
}

/// The materialization a check evaluation looked at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMaterialization {
    pub storage_id: StorageId,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of a completed check evaluation event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckEvaluation {
    pub passed: bool,
    #[serde(default)]
    pub target_materialization: Option<TargetMaterialization>,
    #[serde(default)]
    pub severity: CheckSeverity,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// One attempt to evaluate a check, as stored in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckExecutionRecord {
    pub id: StorageId,
    pub asset_key: AssetKey,
    pub check_name: String,
    pub run_id: String,
    pub status: RecordStatus,
    #[serde(default)]
    pub evaluation: Option<CheckEvaluation>,
    pub create_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    NotStarted,
    Managed,
    Starting,
    Started,
    Success,
    Failure,
    Canceling,
    Canceled,
}

impl RunStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Canceled)
    }
}

/// Owning run lifecycle, read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub create_timestamp: DateTime<Utc>,
}

impl RunRecord {
    pub fn is_finished(&self) -> bool {
        self.status.is_finished()
    }
}

/// Latest successful materialization for an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationRecord {
    pub storage_id: StorageId,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Derived status of an execution. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolvedStatus {
    Succeeded,
    Failed,
    ExecutionFailed,
    Skipped,
    InProgress,
}

/// An execution paired with the status derived for it on this read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedExecution {
    #[serde(flatten)]
    pub record: CheckExecutionRecord,
    pub resolved_status: ResolvedStatus,
}

/// Caller-side step context that launches an external process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub run_id: String,
    pub job_name: String,
    pub step_key: String,
    #[serde(default)]
    pub asset_keys: Vec<AssetKey>,
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub retry_number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_key_parses_slash_path() {
        let key = AssetKey::parse("warehouse/orders/");
        assert_eq!(key, AssetKey::new(["warehouse", "orders"]));
        assert_eq!(key.to_string(), "warehouse/orders");
    }

    #[test]
    fn unknown_record_status_deserializes_as_unrecognized() {
        let status: RecordStatus = serde_json::from_str("\"SKIPPED\"").expect("parse");
        assert_eq!(status, RecordStatus::Unrecognized);
        let planned: RecordStatus = serde_json::from_str("\"PLANNED\"").expect("parse");
        assert_eq!(planned, RecordStatus::Planned);
    }

    #[test]
    fn finished_run_statuses() {
        assert!(RunStatus::Success.is_finished());
        assert!(RunStatus::Failure.is_finished());
        assert!(RunStatus::Canceled.is_finished());
        assert!(!RunStatus::Canceling.is_finished());
        assert!(!RunStatus::Started.is_finished());
        assert!(!RunStatus::Queued.is_finished());
    }

    #[test]
    fn evaluation_severity_defaults_to_error() {
        let evaluation: CheckEvaluation = serde_json::from_str(r#"{"passed": false}"#).expect("parse");
        assert_eq!(evaluation.severity, CheckSeverity::Error);
        assert!(evaluation.target_materialization.is_none());
    }
}
