//! Command execution utilities for scheduler and remote tools.

use std::io::ErrorKind;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Outcome of a failed tool invocation.
///
/// Distinguishes a tool that is not installed from one that could not be
/// started and one that ran but refused the request.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{command} not found in PATH")]
    NotFound { command: String },
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed (exit code {code:?}): {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl CommandError {
    fn spawn_failure(command: &str, error: std::io::Error) -> Self {
        if error.kind() == ErrorKind::NotFound {
            CommandError::NotFound {
                command: command.to_string(),
            }
        } else {
            CommandError::Execution {
                command: command.to_string(),
                error: error.to_string(),
            }
        }
    }

    /// Stderr of a command that ran and exited non-zero.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::Failed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Execute a command and return stdout as a string.
///
/// The child is killed if the returned future is dropped, so callers can
/// interrupt a long shell-out by racing it against a cancel signal.
pub async fn run_command(cmd: &mut Command, name: &str) -> Result<String, CommandError> {
    tracing::debug!("Running {}", name);
    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CommandError::spawn_failure(name, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CommandError::Failed {
            command: name.to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Execute a command with `input` written to its standard input.
pub async fn run_command_with_input(
    cmd: &mut Command,
    name: &str,
    input: &str,
) -> Result<String, CommandError> {
    tracing::debug!("Running {} with {} bytes on stdin", name, input.len());
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CommandError::spawn_failure(name, e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| CommandError::Execution {
                command: name.to_string(),
                error: e.to_string(),
            })?;
        // Dropping stdin closes the pipe so the tool sees EOF.
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| CommandError::Execution {
            command: name.to_string(),
            error: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CommandError::Failed {
            command: name.to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Execute a command and return stdout, treating non-zero exit as OK.
///
/// Some commands (like scontrol with nothing to show) return non-zero but
/// still print something useful.
pub async fn run_command_allow_failure(
    cmd: &mut Command,
    name: &str,
) -> Result<String, CommandError> {
    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CommandError::spawn_failure(name, e))?;

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Check whether a tool can be found in `PATH` (or is an existing path).
pub fn tool_available(tool: &str) -> bool {
    which::which(tool).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_success() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let result = run_command(&mut cmd, "echo").await.unwrap();
        assert_eq!(result.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_command_not_found() {
        let mut cmd = Command::new("nonexistent_command_12345");
        let result = run_command(&mut cmd, "nonexistent").await;
        assert!(matches!(result, Err(CommandError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_run_command_non_zero() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]);
        let err = run_command(&mut cmd, "sh").await.unwrap_err();
        match err {
            CommandError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_command_with_input() {
        let mut cmd = Command::new("cat");
        let out = run_command_with_input(&mut cmd, "cat", "#!/bin/bash\necho hi\n")
            .await
            .unwrap();
        assert_eq!(out, "#!/bin/bash\necho hi\n");
    }

    #[tokio::test]
    async fn test_allow_failure_keeps_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo partial; exit 1"]);
        let out = run_command_allow_failure(&mut cmd, "sh").await.unwrap();
        assert_eq!(out.trim(), "partial");
    }

    #[test]
    fn test_tool_available() {
        assert!(tool_available("sh"));
        assert!(!tool_available("nonexistent_command_12345"));
    }
}
