//! Client configuration stored as TOML (e.g. `extcheck.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::protocol::{ENV_CONTEXT, ENV_MESSAGES, EnvVars};

/// External execution client configuration (TOML).
///
/// Missing fields default to values suitable for local runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Pass the host process environment through to the child.
    pub inherit_env: bool,

    /// Milliseconds between message channel polls while the child runs.
    pub poll_interval_ms: u64,

    /// Default working directory for the child when a call does not set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Parent directory for scoped working areas. System temp dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_root: Option<PathBuf>,

    /// Default child env; overrides per-call env, loses to transport vars.
    pub env: EnvVars,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            inherit_env: true,
            poll_interval_ms: 100,
            cwd: None,
            work_root: None,
            env: EnvVars::new(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if let Some(cwd) = &self.cwd
            && cwd.as_os_str().is_empty()
        {
            return Err(anyhow!("cwd must not be empty when set"));
        }
        if let Some(root) = &self.work_root
            && root.as_os_str().is_empty()
        {
            return Err(anyhow!("work_root must not be empty when set"));
        }
        for name in self.env.keys() {
            if name.is_empty() || name.contains('=') {
                return Err(anyhow!("invalid env var name '{name}'"));
            }
            if name == ENV_CONTEXT || name == ENV_MESSAGES {
                tracing::warn!(
                    name = %name,
                    "configured env var is reserved for transports and will be overridden"
                );
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ClientConfig::default()`.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        let cfg = ClientConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ClientConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ClientConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
