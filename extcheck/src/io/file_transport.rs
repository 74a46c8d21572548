//! File-backed transports: context as a JSON file, messages as JSON lines.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tracing::{debug, warn};

use crate::core::protocol::{
    ENV_CONTEXT, ENV_MESSAGES, EnvVars, OrchestrationContext, encode_params, parse_message_line,
};
use crate::io::transport::{ContextInjector, MessageHandler, MessageReader};

/// Writes the context to `path` for the duration of the call.
#[derive(Debug, Clone)]
pub struct FileContextInjector {
    path: PathBuf,
}

impl FileContextInjector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContextInjector for FileContextInjector {
    fn prepare(&mut self, context: &OrchestrationContext) -> Result<EnvVars> {
        ensure_parent(&self.path)?;
        let mut buf =
            serde_json::to_string_pretty(&context.to_value()?).context("serialize context")?;
        buf.push('\n');
        fs::write(&self.path, buf)
            .with_context(|| format!("write context {}", self.path.display()))?;
        debug!(path = %self.path.display(), "context written");
        encode_params(ENV_CONTEXT, &json!({ "path": path_str(&self.path)? }))
    }

    fn dispose(&mut self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

/// Tails newline-delimited JSON messages appended to `path` by the child.
#[derive(Debug)]
pub struct FileMessageReader {
    path: PathBuf,
    offset: u64,
    skipped: usize,
}

impl FileMessageReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            skipped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of malformed lines dropped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn read_new(&mut self, handler: &mut dyn MessageHandler, flush_partial: bool) -> Result<usize> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(err).with_context(|| format!("open messages {}", self.path.display()));
            }
        };
        file.seek(SeekFrom::Start(self.offset))
            .with_context(|| format!("seek messages {}", self.path.display()))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .with_context(|| format!("read messages {}", self.path.display()))?;

        // Only consume up to the last newline unless the writer is gone.
        let consumed = if flush_partial {
            buf.len()
        } else {
            buf.iter().rposition(|b| *b == b'\n').map_or(0, |end| end + 1)
        };
        if consumed == 0 {
            return Ok(0);
        }
        self.offset += consumed as u64;

        let mut forwarded = 0;
        for raw in buf[..consumed].split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(raw);
            match parse_message_line(&line) {
                Ok(Some(message)) => {
                    handler.handle_message(message);
                    forwarded += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    self.skipped += 1;
                    warn!(error = %format!("{err:#}"), line = %line, "skipping malformed message");
                }
            }
        }
        Ok(forwarded)
    }
}

impl MessageReader for FileMessageReader {
    fn prepare(&mut self, _context: &OrchestrationContext) -> Result<EnvVars> {
        ensure_parent(&self.path)?;
        // Start from an empty channel so stale messages are never replayed.
        File::create(&self.path)
            .with_context(|| format!("create messages {}", self.path.display()))?;
        self.offset = 0;
        self.skipped = 0;
        encode_params(ENV_MESSAGES, &json!({ "path": path_str(&self.path)? }))
    }

    fn drain(&mut self, handler: &mut dyn MessageHandler) -> Result<usize> {
        self.read_new(handler, false)
    }

    fn finish(&mut self, handler: &mut dyn MessageHandler) -> Result<usize> {
        let forwarded = self.read_new(handler, true)?;
        if self.skipped > 0 {
            warn!(skipped = self.skipped, path = %self.path.display(), "malformed messages were dropped");
        }
        Ok(forwarded)
    }

    fn dispose(&mut self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::core::protocol::{ExtMessage, Extras};
    use crate::core::types::ExecutionContext;
    use crate::io::transport::MessageCollector;
    use serde_json::Value;

    const CHECK_LINE: &str = r#"{"method":"report_asset_check","params":{"asset_key":["orders"],"check_name":"fresh","passed":true}}"#;
    const LOG_LINE: &str = r#"{"method":"log","params":{"level":"info","message":"hi"}}"#;

    fn context() -> OrchestrationContext {
        let exec = ExecutionContext {
            run_id: "run-1".to_string(),
            ..ExecutionContext::default()
        };
        OrchestrationContext::new(&exec, Extras::new())
    }

    fn append(path: &Path, text: &str) {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("open for append");
        file.write_all(text.as_bytes()).expect("append");
    }

    #[test]
    fn injector_writes_context_and_points_env_at_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("context");
        let mut injector = FileContextInjector::new(&path);
        assert_eq!(injector.path(), path);

        let env = injector.prepare(&context()).expect("prepare");
        let params: Value = serde_json::from_str(&env[ENV_CONTEXT]).expect("params");
        assert_eq!(params["path"], path.to_str().expect("utf8"));
        let written: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["run_id"], "run-1");

        injector.dispose().expect("dispose");
        assert!(!path.exists());
        injector.dispose().expect("second dispose is harmless");
    }

    /// A line is only delivered once its newline arrives.
    #[test]
    fn reader_holds_partial_lines_until_complete() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("messages");
        let mut reader = FileMessageReader::new(&path);
        assert_eq!(reader.path(), path);
        reader.prepare(&context()).expect("prepare");
        let mut collector = MessageCollector::default();

        append(&path, &format!("{CHECK_LINE}\n{}", &LOG_LINE[..10]));
        assert_eq!(reader.drain(&mut collector).expect("drain"), 1);
        assert_eq!(reader.drain(&mut collector).expect("drain"), 0);

        append(&path, &format!("{}\n", &LOG_LINE[10..]));
        assert_eq!(reader.drain(&mut collector).expect("drain"), 1);

        let messages = collector.into_messages();
        assert!(matches!(messages[0], ExtMessage::ReportAssetCheck { .. }));
        assert!(matches!(messages[1], ExtMessage::Log { .. }));
    }

    #[test]
    fn finish_flushes_unterminated_last_line() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("messages");
        let mut reader = FileMessageReader::new(&path);
        reader.prepare(&context()).expect("prepare");
        let mut collector = MessageCollector::default();

        append(&path, LOG_LINE);
        assert_eq!(reader.drain(&mut collector).expect("drain"), 0);
        assert_eq!(reader.finish(&mut collector).expect("finish"), 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("messages");
        let mut reader = FileMessageReader::new(&path);
        reader.prepare(&context()).expect("prepare");
        let mut collector = MessageCollector::default();

        append(&path, &format!("not json\n\n{LOG_LINE}\n"));
        assert_eq!(reader.drain(&mut collector).expect("drain"), 1);
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn prepare_truncates_stale_messages_and_dispose_removes_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("messages");
        fs::write(&path, format!("{LOG_LINE}\n")).expect("stale");
        let mut reader = FileMessageReader::new(&path);
        reader.prepare(&context()).expect("prepare");

        let mut collector = MessageCollector::default();
        assert_eq!(reader.finish(&mut collector).expect("finish"), 0);
        reader.dispose().expect("dispose");
        assert!(!path.exists());
    }

    #[test]
    fn drain_before_child_creates_file_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut reader = FileMessageReader::new(temp.path().join("never"));
        let mut collector = MessageCollector::default();
        assert_eq!(reader.drain(&mut collector).expect("drain"), 0);
    }
}
