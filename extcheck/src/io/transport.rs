//! Pluggable channels between the host and an external process.
//!
//! A [`ContextInjector`] hands the orchestration context to the child and a
//! [`MessageReader`] collects the child's messages. Both are scoped
//! resources: `prepare` before launch, `dispose` after exit. The session in
//! [`crate::io::client`] guarantees `dispose` runs at most once and only
//! after a successful `prepare`.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::core::protocol::{
    ENV_CONTEXT, EnvVars, ExtMessage, LogLevel, OrchestrationContext, encode_params,
};

/// Makes the orchestration context readable by the child.
pub trait ContextInjector {
    /// Publish `context` and return the env vars that locate it.
    fn prepare(&mut self, context: &OrchestrationContext) -> Result<EnvVars>;

    /// Tear down whatever `prepare` created.
    fn dispose(&mut self) -> Result<()>;
}

/// Receives messages forwarded from the child.
pub trait MessageHandler {
    fn handle_message(&mut self, message: ExtMessage);
}

/// Reads the child's message stream.
pub trait MessageReader {
    /// Open the channel and return the env vars that locate it.
    fn prepare(&mut self, context: &OrchestrationContext) -> Result<EnvVars>;

    /// Forward every complete message received since the last call.
    ///
    /// Returns the number of messages forwarded.
    fn drain(&mut self, handler: &mut dyn MessageHandler) -> Result<usize>;

    /// Final drain after the child exited; may flush an unterminated last record.
    fn finish(&mut self, handler: &mut dyn MessageHandler) -> Result<usize> {
        self.drain(handler)
    }

    /// Tear down whatever `prepare` created.
    fn dispose(&mut self) -> Result<()>;
}

/// Passes the context inline through the environment.
///
/// Suited to small contexts and to children that cannot share a filesystem
/// with the host.
#[derive(Debug, Default)]
pub struct EnvContextInjector;

impl ContextInjector for EnvContextInjector {
    fn prepare(&mut self, context: &OrchestrationContext) -> Result<EnvVars> {
        let data = context.to_value()?;
        debug!(run_id = %context.run_id, "injecting context through env");
        encode_params(ENV_CONTEXT, &json!({ "data": data }))
            .context("encode inline context params")
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Default handler: keeps every message and mirrors child logs into tracing.
#[derive(Debug, Default)]
pub struct MessageCollector {
    messages: Vec<ExtMessage>,
}

impl MessageCollector {
    pub fn into_messages(self) -> Vec<ExtMessage> {
        self.messages
    }
}

impl MessageHandler for MessageCollector {
    fn handle_message(&mut self, message: ExtMessage) {
        match &message {
            ExtMessage::Log { level, message } => match level {
                LogLevel::Debug => debug!(target: "extcheck::child", "{message}"),
                LogLevel::Info => info!(target: "extcheck::child", "{message}"),
                LogLevel::Warning => warn!(target: "extcheck::child", "{message}"),
                LogLevel::Error => error!(target: "extcheck::child", "{message}"),
            },
            other => debug!(kind = other.kind(), "received external message"),
        }
        self.messages.push(message);
    }
}
