//! Typed errors surfaced to callers.
//!
//! Plumbing inside modules uses `anyhow` with context; these enums are the
//! stable contract at the public seams.

use thiserror::Error;

/// Failure of a single external execution call.
#[derive(Debug, Error)]
pub enum ExternalExecutionError {
    /// Nothing was spawned: command, context serialization, injector or reader setup failed.
    #[error("external execution setup failed: {0:#}")]
    Setup(anyhow::Error),

    /// The child process could not be launched.
    #[error("failed to launch external process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting on the running child failed; it was killed.
    #[error("waiting for external process failed: {0:#}")]
    Wait(anyhow::Error),

    /// The child exited non-zero. `code` is `None` when it was killed by a signal.
    #[error("external execution process failed with {}", describe_exit(.code))]
    Failed { code: Option<i32> },

    /// The child succeeded but a transport or the working area could not be released.
    #[error("external execution teardown failed: {0:#}")]
    Teardown(anyhow::Error),
}

impl ExternalExecutionError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { code } => *code,
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// An impossible stored or derived state was observed. Not retryable.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invariant violated: {0}")]
pub struct InvariantViolation(pub String);

/// Failure of a check query composed over the storage collaborators.
#[derive(Debug, Error)]
pub enum CheckQueryError {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    #[error("asset checks require a storage migration")]
    NeedsMigration,

    #[error("invalid execution cursor '{0}'")]
    InvalidCursor(String),

    #[error("storage query failed: {0:#}")]
    Store(#[from] anyhow::Error),
}
