//! External command execution for the quota engine.
//!
//! The quota drivers shell out to the system quota tooling (`setquota`,
//! `repquota`, `quotaon`, attribute tools).  All invocations go through
//! [`run`], which captures stderr for diagnosis and supports an optional
//! hard-kill timeout.

use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::VolumeError;

/// Render a program + args as a single string for error messages.
fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Run a command to completion, treating only exit code 0 as success.
///
/// Returns the captured stdout.  A `timeout` of `None` means unbounded; on
/// expiry the child is killed and [`VolumeError::CommandTimeout`] is
/// returned.
pub async fn run(
    program: &str,
    args: &[&str],
    timeout: Option<Duration>,
) -> Result<String, VolumeError> {
    run_allow(program, args, &[], timeout).await
}

/// Like [`run`], but tolerating the listed non-zero exit codes.
///
/// `quotaon` documents exit code 1 on its probe form when accounting is
/// already enabled; callers pass `&[1]` to treat that as success.
pub async fn run_allow(
    program: &str,
    args: &[&str],
    allowed_codes: &[i32],
    timeout: Option<Duration>,
) -> Result<String, VolumeError> {
    let line = command_line(program, args);
    debug!(command = %line, "running external command");

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);

    let output: Output = match timeout {
        Some(limit) => tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| VolumeError::CommandTimeout {
                command: line.clone(),
                timeout: limit,
            })??,
        None => cmd.output().await?,
    };

    let code = output.status.code().unwrap_or(-1);
    if output.status.success() || allowed_codes.contains(&code) {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(VolumeError::CommandFailed {
            command: line,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        })
    }
}

/// Run a command up to `attempts` times with a fixed sleep between tries.
pub async fn run_with_retry(
    program: &str,
    args: &[&str],
    attempts: usize,
    sleep: Duration,
    timeout: Option<Duration>,
) -> Result<String, VolumeError> {
    retry(attempts, sleep, || run(program, args, timeout)).await
}

/// Generic bounded retry: run `op` up to `attempts` times with a fixed
/// sleep between failures, returning the last error if every try fails.
pub async fn retry<T, F, Fut>(
    attempts: usize,
    sleep: Duration,
    mut op: F,
) -> Result<T, VolumeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, VolumeError>>,
{
    let attempts = attempts.max(1);
    let mut last = None;
    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(attempt, error = %e, "operation failed, retrying");
                last = Some(e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(sleep).await;
                }
            }
        }
    }
    // attempts >= 1, so at least one error was recorded.
    Err(last.unwrap())
}
