//! External execution client.
//!
//! The [`ExternalClient`] trait decouples callers from how the external step
//! is launched. [`SubprocessClient`] runs a local command: it injects the
//! orchestration context, composes the child environment, blocks until the
//! child exits and forwards the child's messages.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::core::env::{EnvLayers, compose_env};
use crate::core::protocol::{EnvVars, ExtMessage, Extras, OrchestrationContext};
use crate::core::types::ExecutionContext;
use crate::error::ExternalExecutionError;
use crate::io::config::ClientConfig;
use crate::io::file_transport::{FileContextInjector, FileMessageReader};
use crate::io::process::{spawn_child, wait_polling};
use crate::io::transport::{ContextInjector, MessageCollector, MessageHandler, MessageReader};

const CONTEXT_FILENAME: &str = "context";
const MESSAGES_FILENAME: &str = "messages";

/// Parameters for one external execution.
pub struct RunRequest<'a> {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Step context the child runs on behalf of.
    pub context: &'a ExecutionContext,
    /// User data forwarded verbatim to the child.
    pub extras: Extras,
    /// Custom context transport. Defaults to a file in a scoped working area.
    pub injector: Option<&'a mut dyn ContextInjector>,
    /// Custom message transport. Defaults to a file in a scoped working area.
    pub reader: Option<&'a mut dyn MessageReader>,
    /// Per-call env; loses to client defaults and transport vars.
    pub env: EnvVars,
    /// Working directory; falls back to the client's configured `cwd`.
    pub cwd: Option<PathBuf>,
}

impl<'a> RunRequest<'a> {
    pub fn new<I, S>(command: I, context: &'a ExecutionContext) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            context,
            extras: Extras::new(),
            injector: None,
            reader: None,
            env: EnvVars::new(),
            cwd: None,
        }
    }

    pub fn extras(mut self, extras: Extras) -> Self {
        self.extras = extras;
        self
    }

    pub fn env(mut self, env: EnvVars) -> Self {
        self.env = env;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn injector(mut self, injector: &'a mut dyn ContextInjector) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn reader(mut self, reader: &'a mut dyn MessageReader) -> Self {
        self.reader = Some(reader);
        self
    }
}

/// What a successful external execution produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    /// Messages in the order the child emitted them.
    pub messages: Vec<ExtMessage>,
}

impl ExecutionReport {
    /// Check evaluations reported by the child.
    pub fn check_reports(&self) -> impl Iterator<Item = &ExtMessage> {
        self.messages
            .iter()
            .filter(|message| matches!(message, ExtMessage::ReportAssetCheck { .. }))
    }
}

/// Abstraction over external execution backends.
pub trait ExternalClient {
    /// Run the external step once. No retries.
    fn run(&self, request: RunRequest<'_>) -> Result<ExecutionReport, ExternalExecutionError>;
}

/// Client that runs the step as a local subprocess.
#[derive(Debug, Clone, Default)]
pub struct SubprocessClient {
    config: ClientConfig,
}

impl SubprocessClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn base_env(&self) -> EnvVars {
        if !self.config.inherit_env {
            return EnvVars::new();
        }
        // Non-UTF-8 entries cannot be represented in the composed map.
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }
}

impl ExternalClient for SubprocessClient {
    #[instrument(skip_all, fields(run_id = %request.context.run_id, step = %request.context.step_key))]
    fn run(&self, request: RunRequest<'_>) -> Result<ExecutionReport, ExternalExecutionError> {
        let RunRequest {
            command,
            context,
            extras,
            injector,
            reader,
            env,
            cwd,
        } = request;

        let (program, args) = command
            .split_first()
            .ok_or_else(|| ExternalExecutionError::Setup(anyhow!("command must not be empty")))?;
        let orchestration = OrchestrationContext::new(context, extras);

        let (mut session, transport_env) = Session::open(&orchestration, injector, reader, self.config.work_root.as_deref())?;

        let base = self.base_env();
        let child_env = compose_env(EnvLayers {
            base: &base,
            call: &env,
            client: &self.config.env,
            transport: &transport_env,
        });

        let mut cmd = Command::new(program);
        cmd.args(args).env_clear().envs(&child_env);
        if let Some(dir) = cwd.as_ref().or(self.config.cwd.as_ref()) {
            cmd.current_dir(dir);
        }

        info!(program = %program, args = args.len(), "launching external process");
        let mut collector = MessageCollector::default();
        let outcome = session.supervise(&mut cmd, self.config.poll_interval(), &mut collector);
        let drained = match &outcome {
            Ok(_) => session.finish_messages(&mut collector),
            Err(_) => Ok(()),
        };
        let released = session.close();

        let status = match outcome {
            Ok(status) => status,
            Err(err) => {
                log_secondary(released, "release after launch failure");
                return Err(err);
            }
        };
        if !status.success() {
            warn!(exit_code = ?status.code(), "external process failed");
            log_secondary(drained, "read messages after failure");
            log_secondary(released, "release after failure");
            return Err(ExternalExecutionError::Failed {
                code: status.code(),
            });
        }
        drained.map_err(ExternalExecutionError::Teardown)?;
        released.map_err(ExternalExecutionError::Teardown)?;

        let messages = collector.into_messages();
        info!(messages = messages.len(), "external process completed");
        Ok(ExecutionReport { messages })
    }
}

fn log_secondary(result: anyhow::Result<()>, what: &str) {
    if let Err(err) = result {
        warn!(error = %format!("{err:#}"), "{what} failed");
    }
}

/// A transport either created by the session or lent by the caller.
enum Held<'a, T: ?Sized> {
    Owned(Box<T>),
    Borrowed(&'a mut T),
}

impl<T: ?Sized> Held<'_, T> {
    fn get(&mut self) -> &mut T {
        match self {
            Held::Owned(inner) => &mut **inner,
            Held::Borrowed(inner) => &mut **inner,
        }
    }
}

/// Resources owned by one external execution.
///
/// Acquired in order working area, injector, reader; released in reverse,
/// each at most once and only if acquired.
struct Session<'a> {
    working_area: Option<TempDir>,
    injector: Held<'a, dyn ContextInjector + 'a>,
    reader: Held<'a, dyn MessageReader + 'a>,
    injector_prepared: bool,
    reader_prepared: bool,
    closed: bool,
}

impl<'a> Session<'a> {
    fn open(
        context: &OrchestrationContext,
        injector: Option<&'a mut (dyn ContextInjector + 'a)>,
        reader: Option<&'a mut (dyn MessageReader + 'a)>,
        work_root: Option<&Path>,
    ) -> Result<(Self, EnvVars), ExternalExecutionError> {
        let (working_area, injector, reader) = match (injector, reader) {
            (Some(injector), Some(reader)) => {
                (None, Held::Borrowed(injector), Held::Borrowed(reader))
            }
            (injector, reader) => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("extcheck-");
                let area = match work_root {
                    Some(root) => builder.tempdir_in(root),
                    None => builder.tempdir(),
                }
                .context("create working area")
                    .map_err(ExternalExecutionError::Setup)?;
                debug!(path = %area.path().display(), "working area created");
                let injector: Held<'a, dyn ContextInjector + 'a> = match injector {
                    Some(custom) => Held::Borrowed(custom),
                    None => Held::Owned(Box::new(FileContextInjector::new(
                        area.path().join(CONTEXT_FILENAME),
                    ))),
                };
                let reader: Held<'a, dyn MessageReader + 'a> = match reader {
                    Some(custom) => Held::Borrowed(custom),
                    None => Held::Owned(Box::new(FileMessageReader::new(
                        area.path().join(MESSAGES_FILENAME),
                    ))),
                };
                (Some(area), injector, reader)
            }
        };

        let mut session = Session {
            working_area,
            injector,
            reader,
            injector_prepared: false,
            reader_prepared: false,
            closed: false,
        };

        let mut env = EnvVars::new();
        match session.injector.get().prepare(context) {
            Ok(vars) => {
                session.injector_prepared = true;
                env.extend(vars);
            }
            Err(err) => return Err(session.abort(err.context("prepare context injector"))),
        }
        match session.reader.get().prepare(context) {
            Ok(vars) => {
                session.reader_prepared = true;
                env.extend(vars);
            }
            Err(err) => return Err(session.abort(err.context("prepare message reader"))),
        }
        Ok((session, env))
    }

    fn abort(&mut self, err: anyhow::Error) -> ExternalExecutionError {
        warn!(error = %format!("{err:#}"), "external execution setup failed");
        log_secondary(self.close(), "release after setup failure");
        ExternalExecutionError::Setup(err)
    }

    fn supervise(
        &mut self,
        cmd: &mut Command,
        poll_interval: Duration,
        handler: &mut dyn MessageHandler,
    ) -> Result<ExitStatus, ExternalExecutionError> {
        let mut child = spawn_child(cmd).map_err(ExternalExecutionError::Spawn)?;
        let reader = self.reader.get();
        wait_polling(&mut child, poll_interval, || {
            if let Err(err) = reader.drain(&mut *handler) {
                warn!(error = %format!("{err:#}"), "reading external messages failed");
            }
        })
        .map_err(ExternalExecutionError::Wait)
    }

    fn finish_messages(&mut self, handler: &mut dyn MessageHandler) -> anyhow::Result<()> {
        self.reader
            .get()
            .finish(handler)
            .context("read remaining messages")?;
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut failures = Vec::new();
        if std::mem::take(&mut self.reader_prepared)
            && let Err(err) = self.reader.get().dispose()
        {
            failures.push(err.context("dispose message reader"));
        }
        if std::mem::take(&mut self.injector_prepared)
            && let Err(err) = self.injector.get().dispose()
        {
            failures.push(err.context("dispose context injector"));
        }
        if let Some(area) = self.working_area.take() {
            let path = area.path().to_path_buf();
            if let Err(err) = area.close() {
                failures.push(
                    anyhow::Error::new(err)
                        .context(format!("remove working area {}", path.display())),
                );
            } else {
                debug!(path = %path.display(), "working area removed");
            }
        }

        let mut failures = failures.into_iter();
        match failures.next() {
            None => Ok(()),
            Some(first) => {
                for other in failures {
                    warn!(error = %format!("{other:#}"), "additional release failure");
                }
                Err(first)
            }
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if !self.closed {
            log_secondary(self.close(), "release during unwind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingInjector, RecordingInjector, RecordingReader, TransportLog};

    fn exec_context() -> ExecutionContext {
        ExecutionContext {
            run_id: "run-1".to_string(),
            job_name: "job".to_string(),
            step_key: "step".to_string(),
            ..ExecutionContext::default()
        }
    }

    #[test]
    fn empty_command_is_setup_failure() {
        let context = exec_context();
        let client = SubprocessClient::default();
        let err = client
            .run(RunRequest::new(Vec::<String>::new(), &context))
            .unwrap_err();
        assert!(matches!(err, ExternalExecutionError::Setup(_)));
    }

    #[test]
    fn setup_failure_releases_prepared_transports_in_reverse() {
        let log = TransportLog::default();
        let mut injector = RecordingInjector::new(log.clone());
        let mut reader = RecordingReader::failing_prepare(log.clone());
        let context = exec_context();

        let err = SubprocessClient::default()
            .run(
                RunRequest::new(["true"], &context)
                    .injector(&mut injector)
                    .reader(&mut reader),
            )
            .unwrap_err();

        assert!(matches!(err, ExternalExecutionError::Setup(_)));
        assert_eq!(
            log.events(),
            vec![
                "injector.prepare",
                "reader.prepare",
                "injector.dispose"
            ]
        );
    }

    #[test]
    fn failing_injector_skips_reader() {
        let log = TransportLog::default();
        let mut injector = FailingInjector;
        let mut reader = RecordingReader::new(log.clone());
        let context = exec_context();

        let err = SubprocessClient::default()
            .run(
                RunRequest::new(["true"], &context)
                    .injector(&mut injector)
                    .reader(&mut reader),
            )
            .unwrap_err();

        assert!(err.to_string().contains("prepare context injector"));
        assert!(log.events().is_empty());
    }

    #[test]
    fn missing_program_releases_everything() {
        let log = TransportLog::default();
        let mut injector = RecordingInjector::new(log.clone());
        let mut reader = RecordingReader::new(log.clone());
        let context = exec_context();

        let err = SubprocessClient::default()
            .run(
                RunRequest::new(["extcheck-definitely-not-a-program"], &context)
                    .injector(&mut injector)
                    .reader(&mut reader),
            )
            .unwrap_err();

        assert!(matches!(err, ExternalExecutionError::Spawn(_)));
        assert_eq!(log.count("reader.dispose"), 1);
        assert_eq!(log.count("injector.dispose"), 1);
    }

    #[test]
    fn base_env_follows_inherit_flag() {
        let isolated = SubprocessClient::new(ClientConfig {
            inherit_env: false,
            ..ClientConfig::default()
        });
        assert!(!isolated.config().inherit_env);
        assert!(isolated.base_env().is_empty());

        let inheriting = SubprocessClient::default();
        assert!(inheriting.config().inherit_env);
        let host: EnvVars = std::env::vars().collect();
        assert_eq!(inheriting.base_env(), host);
    }
}
