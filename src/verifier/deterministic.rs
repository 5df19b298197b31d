use crate::models::{CheckKind, CheckResult, DeterministicVerifier, VerifierCheck};
use crate::workspace::resolve_in_workspace;
use regex::RegexBuilder;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Problems with a check's own configuration
#[derive(Debug, Error)]
enum CheckConfigError {
    #[error("missing config key '{0}'")]
    Missing(&'static str),

    #[error("config key '{key}' must be a {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },

    #[error("path '{0}' escapes the workspace")]
    UnsafePath(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// How a spawned shell command ended
#[derive(Debug)]
enum CommandOutcome {
    Exited(Option<i32>),
    TimedOut,
    SpawnFailed(String),
}

/// Run every check in declaration order.
///
/// A check that cannot be evaluated (bad config, unreadable file, command
/// that fails to start) is reported as failed; nothing here returns an error.
pub async fn run_deterministic_checks(
    verifier: &DeterministicVerifier,
    workspace_dir: &Path,
    timeout: Duration,
    default_test_command: &str,
) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(verifier.checks.len());
    for check in &verifier.checks {
        let result = match run_check(check, workspace_dir, timeout, default_test_command).await {
            Ok(result) => result,
            Err(e) => CheckResult::fail(&check.name, format!("Unexpected error: {}", e)),
        };
        debug!(check = %result.name, passed = result.passed, "check finished");
        results.push(result);
    }
    results
}

async fn run_check(
    check: &VerifierCheck,
    workspace_dir: &Path,
    timeout: Duration,
    default_test_command: &str,
) -> Result<CheckResult, CheckConfigError> {
    match check.kind {
        CheckKind::FileExists => {
            let relative = required_str(check, "path")?;
            let path = workspace_path(workspace_dir, relative)?;
            Ok(if tokio::fs::metadata(&path).await.is_ok() {
                CheckResult::pass(&check.name, "File found")
            } else {
                CheckResult::fail(&check.name, format!("File not found: {}", relative))
            })
        }
        CheckKind::FileContains => {
            let relative = required_str(check, "path")?;
            let pattern = required_str(check, "pattern")?;
            let is_regex = bool_or(check, "isRegex", false)?;
            let should_match = bool_or(check, "shouldMatch", true)?;
            let path = workspace_path(workspace_dir, relative)?;

            let content = match tokio::fs::read(&path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    return Ok(CheckResult::fail(
                        &check.name,
                        format!("Could not read file: {} ({})", relative, e),
                    ));
                }
            };

            let found = if is_regex {
                RegexBuilder::new(pattern)
                    .multi_line(true)
                    .build()?
                    .is_match(&content)
            } else {
                content.contains(pattern)
            };

            Ok(if found == should_match {
                CheckResult::pass(&check.name, "Pattern check passed")
            } else if should_match {
                CheckResult::fail(&check.name, format!("Pattern \"{}\" not found", pattern))
            } else {
                CheckResult::fail(&check.name, format!("Pattern \"{}\" found unexpectedly", pattern))
            })
        }
        CheckKind::CommandExit => {
            let command = required_str(check, "command")?;
            Ok(match run_shell(command, workspace_dir, timeout).await {
                CommandOutcome::Exited(Some(0)) => CheckResult::pass(&check.name, "Command succeeded"),
                CommandOutcome::Exited(Some(code)) => {
                    CheckResult::fail(&check.name, format!("Exit code: {}", code))
                }
                CommandOutcome::Exited(None) => {
                    CheckResult::fail(&check.name, "Command terminated by signal")
                }
                CommandOutcome::TimedOut => CheckResult::fail(
                    &check.name,
                    format!("Command timed out after {} ms", timeout.as_millis()),
                ),
                CommandOutcome::SpawnFailed(e) => {
                    CheckResult::fail(&check.name, format!("Command failed to start: {}", e))
                }
            })
        }
        CheckKind::TestPass => {
            let command = optional_str(check, "command")?.unwrap_or(default_test_command);
            Ok(match run_shell(command, workspace_dir, timeout).await {
                CommandOutcome::Exited(Some(0)) => CheckResult::pass(&check.name, "Tests passed"),
                CommandOutcome::Exited(Some(code)) => {
                    CheckResult::fail(&check.name, format!("Tests failed (exit: {})", code))
                }
                CommandOutcome::Exited(None) => {
                    CheckResult::fail(&check.name, "Tests terminated by signal")
                }
                CommandOutcome::TimedOut => CheckResult::fail(
                    &check.name,
                    format!("Tests timed out after {} ms", timeout.as_millis()),
                ),
                CommandOutcome::SpawnFailed(e) => {
                    CheckResult::fail(&check.name, format!("Test execution failed: {}", e))
                }
            })
        }
    }
}

/// Run `command` through `bash -c` inside the workspace.
///
/// The shell leads its own process group. If the deadline passes first the
/// whole group is killed, so nothing the command forked outlives the check.
async fn run_shell(command: &str, workspace_dir: &Path, timeout: Duration) -> CommandOutcome {
    let mut shell = Command::new("bash");
    shell
        .arg("-c")
        .arg(command)
        .current_dir(workspace_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    shell.process_group(0);

    let child = match shell.spawn() {
        Ok(child) => child,
        Err(e) => return CommandOutcome::SpawnFailed(e.to_string()),
    };
    let pid = child.id();

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => CommandOutcome::Exited(output.status.code()),
        Ok(Err(e)) => CommandOutcome::SpawnFailed(e.to_string()),
        Err(_) => {
            kill_process_group(pid);
            CommandOutcome::TimedOut
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group id is the shell's pid
    // because it was spawned with process_group(0).
    let rc = unsafe { libc::killpg(pid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn workspace_path(workspace_dir: &Path, relative: &str) -> Result<PathBuf, CheckConfigError> {
    resolve_in_workspace(workspace_dir, relative)
        .map_err(|_| CheckConfigError::UnsafePath(relative.to_string()))
}

fn required_str<'a>(check: &'a VerifierCheck, key: &'static str) -> Result<&'a str, CheckConfigError> {
    optional_str(check, key)?.ok_or(CheckConfigError::Missing(key))
}

fn optional_str<'a>(
    check: &'a VerifierCheck,
    key: &'static str,
) -> Result<Option<&'a str>, CheckConfigError> {
    match check.config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(CheckConfigError::WrongType {
            key,
            expected: "string",
        }),
    }
}

fn bool_or(check: &VerifierCheck, key: &'static str, default: bool) -> Result<bool, CheckConfigError> {
    match check.config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(CheckConfigError::WrongType {
            key,
            expected: "boolean",
        }),
    }
}
