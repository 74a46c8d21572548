//! Helpers for launching a child process and waiting on it while polling.

use std::process::{Child, Command, ExitStatus};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Spawn `cmd`, logging launch failures.
pub fn spawn_child(cmd: &mut Command) -> std::io::Result<Child> {
    debug!(program = ?cmd.get_program(), "spawning child process");
    match cmd.spawn() {
        Ok(child) => {
            debug!(pid = child.id(), "child process started");
            Ok(child)
        }
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            Err(e)
        }
    }
}

/// Block until `child` exits, calling `on_poll` every `poll_interval` while it runs.
///
/// There is no deadline: the call returns only when the child exits. If
/// waiting itself fails the child is killed so it does not outlive the call.
#[instrument(skip_all, fields(pid = child.id(), poll_ms = poll_interval.as_millis() as u64))]
pub fn wait_polling<F: FnMut()>(
    child: &mut Child,
    poll_interval: Duration,
    mut on_poll: F,
) -> Result<ExitStatus> {
    loop {
        let waited = child
            .wait_timeout(poll_interval)
            .context("wait for child process");
        match waited {
            Ok(Some(status)) => {
                debug!(exit_code = ?status.code(), "child process finished");
                return Ok(status);
            }
            Ok(None) => on_poll(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "lost track of child process, killing");
                if let Err(kill_err) = child.kill() {
                    warn!(err = %kill_err, "failed to kill child process");
                }
                let _ = child.wait();
                return Err(err);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn polls_until_exit_and_reports_status() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 0.2; exit 3");
        let mut child = spawn_child(&mut cmd).expect("spawn");
        let mut polls = 0;
        let status =
            wait_polling(&mut child, Duration::from_millis(20), || polls += 1).expect("wait");
        assert_eq!(status.code(), Some(3));
        assert!(polls > 0);
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let mut cmd = Command::new("extcheck-definitely-not-a-program");
        let err = spawn_child(&mut cmd).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
