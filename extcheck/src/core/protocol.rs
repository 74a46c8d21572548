//! Host/child protocol for external execution.
//!
//! The env var names and the message line format are a versioned contract:
//! a child written against `PROTOCOL_VERSION` reads its context location from
//! [`ENV_CONTEXT`] and writes newline-delimited [`ExtMessage`] JSON to the
//! location in [`ENV_MESSAGES`].

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::{AssetKey, CheckSeverity, ExecutionContext};

pub const PROTOCOL_VERSION: &str = "0.1";

/// Env var carrying the JSON-encoded context injector parameters.
pub const ENV_CONTEXT: &str = "EXT_CONTEXT";
/// Env var carrying the JSON-encoded message reader parameters.
pub const ENV_MESSAGES: &str = "EXT_MESSAGES";

/// Opaque user data forwarded verbatim to the child.
pub type Extras = Map<String, Value>;

/// Environment variables, ordered for deterministic composition and logging.
pub type EnvVars = BTreeMap<String, String>;

/// The value serialized for the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationContext {
    pub protocol_version: String,
    pub run_id: String,
    pub job_name: String,
    pub step_key: String,
    pub asset_keys: Vec<AssetKey>,
    pub partition_key: Option<String>,
    pub retry_number: u32,
    pub extras: Extras,
}

impl OrchestrationContext {
    pub fn new(context: &ExecutionContext, extras: Extras) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            run_id: context.run_id.clone(),
            job_name: context.job_name.clone(),
            step_key: context.step_key.clone(),
            asset_keys: context.asset_keys.clone(),
            partition_key: context.partition_key.clone(),
            retry_number: context.retry_number,
            extras,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).context("serialize orchestration context")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One structured record emitted by the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ExtMessage {
    ReportAssetCheck {
        asset_key: AssetKey,
        check_name: String,
        passed: bool,
        #[serde(default)]
        severity: CheckSeverity,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    },
    ReportAssetMaterialization {
        asset_key: AssetKey,
        #[serde(default)]
        data_version: Option<String>,
        #[serde(default)]
        metadata: BTreeMap<String, Value>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

impl ExtMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReportAssetCheck { .. } => "report_asset_check",
            Self::ReportAssetMaterialization { .. } => "report_asset_materialization",
            Self::Log { .. } => "log",
        }
    }
}

/// Parse one message line. Blank lines are `Ok(None)`.
pub fn parse_message_line(line: &str) -> Result<Option<ExtMessage>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let message = serde_json::from_str(trimmed).context("parse message line")?;
    Ok(Some(message))
}

/// Encode transport parameters as the value of a protocol env var.
pub fn encode_params(var: &str, params: &Value) -> Result<EnvVars> {
    let encoded =
        serde_json::to_string(params).with_context(|| format!("encode {var} parameters"))?;
    Ok(EnvVars::from([(var.to_string(), encoded)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_carries_extras_verbatim() {
        let exec = ExecutionContext {
            run_id: "run-1".to_string(),
            job_name: "nightly".to_string(),
            step_key: "orders".to_string(),
            asset_keys: vec![AssetKey::parse("warehouse/orders")],
            partition_key: Some("2024-01-01".to_string()),
            retry_number: 1,
        };
        let mut extras = Extras::new();
        extras.insert("threshold".to_string(), json!({"max_nulls": 3}));

        let value = OrchestrationContext::new(&exec, extras)
            .to_value()
            .expect("serialize");
        assert_eq!(value["protocol_version"], json!(PROTOCOL_VERSION));
        assert_eq!(value["asset_keys"], json!([["warehouse", "orders"]]));
        assert_eq!(value["extras"]["threshold"]["max_nulls"], json!(3));
    }

    #[test]
    fn parses_check_report_with_defaults() {
        let line = r#"{"method":"report_asset_check","params":{"asset_key":["orders"],"check_name":"no_nulls","passed":true}}"#;
        let message = parse_message_line(line).expect("parse").expect("message");
        assert_eq!(message.kind(), "report_asset_check");
        match message {
            ExtMessage::ReportAssetCheck {
                severity, passed, ..
            } => {
                assert!(passed);
                assert_eq!(severity, CheckSeverity::Error);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_ignored_and_unknown_methods_rejected() {
        assert!(parse_message_line("   ").expect("blank").is_none());
        assert!(parse_message_line(r#"{"method":"teleport","params":{}}"#).is_err());
    }

    #[test]
    fn params_encode_to_single_env_var() {
        let env = encode_params(ENV_CONTEXT, &json!({"path": "/tmp/ctx"})).expect("encode");
        assert_eq!(env.len(), 1);
        assert_eq!(env[ENV_CONTEXT], r#"{"path":"/tmp/ctx"}"#);
    }
}
