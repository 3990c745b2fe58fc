//! A remote process with a liveness and cancel contract.

use crate::launchers::Launcher;
use std::future::Future;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("{program} not found in PATH")]
    NotFound { program: String },
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Failed waiting for remote process: {0}")]
    Wait(std::io::Error),
    #[error("Nothing has been executed yet")]
    NothingToRepeat,
    #[error("Could not allocate a local port: {0}")]
    Port(std::io::Error),
    #[error("Tunnel closed before it was ready")]
    TunnelClosed,
    #[error(transparent)]
    Command(#[from] lhpc_parsers::CommandError),
}

/// State of a remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    NotStarted,
    Running,
    Exited { success: bool },
}

/// The contract every remote connection offers.
///
/// `terminate` never blocks and may be called any number of times.
pub trait Remote: Send {
    fn execute(&mut self, host: &str, command: &str) -> Result<(), RemoteError>;
    fn status(&mut self) -> RemoteStatus;
    fn is_active(&mut self) -> bool {
        self.status() == RemoteStatus::Running
    }
    fn terminate(&mut self);
    /// Wait for the process to exit.
    fn wait(&mut self) -> impl Future<Output = Result<RemoteStatus, RemoteError>> + Send;
    /// Terminate and re-run the last command, counting the attempt.
    fn execute_again(&mut self) -> Result<(), RemoteError>;
    fn attempts(&self) -> u32;
}

pub(crate) fn spawn_error(program: &str, source: std::io::Error) -> RemoteError {
    if source.kind() == ErrorKind::NotFound {
        RemoteError::NotFound {
            program: program.to_string(),
        }
    } else {
        RemoteError::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

/// A child process started through a [`Launcher`].
#[derive(Debug)]
pub struct Connection {
    launcher: Box<dyn Launcher>,
    child: Option<Child>,
    exit: Option<ExitStatus>,
    last: Option<(String, String)>,
    attempts: u32,
}

impl Connection {
    pub fn new(launcher: impl Launcher + 'static) -> Self {
        Self {
            launcher: Box::new(launcher),
            child: None,
            exit: None,
            last: None,
            attempts: 0,
        }
    }

    pub fn launcher_name(&self) -> &str {
        self.launcher.name()
    }

    /// Host and command of the last execution.
    pub fn target(&self) -> Option<(&str, &str)> {
        self.last.as_ref().map(|(h, c)| (h.as_str(), c.as_str()))
    }

    fn spawn(&mut self, host: &str, command: &str) -> Result<(), RemoteError> {
        let invocation = self.launcher.invocation(host, command);
        tracing::debug!("Starting {}", invocation);

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&invocation.program, e))?;

        tracing::info!("Started {} on {}", self.launcher.name(), host);
        self.child = Some(child);
        self.exit = None;
        Ok(())
    }

    fn record_exit(&mut self, status: ExitStatus) -> RemoteStatus {
        tracing::debug!("{} exited with {}", self.launcher.name(), status);
        self.exit = Some(status);
        self.child = None;
        RemoteStatus::Exited {
            success: status.success(),
        }
    }
}

impl Remote for Connection {
    fn execute(&mut self, host: &str, command: &str) -> Result<(), RemoteError> {
        self.terminate();
        self.last = Some((host.to_string(), command.to_string()));
        self.spawn(host, command)
    }

    fn status(&mut self) -> RemoteStatus {
        if let Some(status) = self.exit {
            return RemoteStatus::Exited {
                success: status.success(),
            };
        }
        let Some(child) = self.child.as_mut() else {
            return RemoteStatus::NotStarted;
        };
        match child.try_wait() {
            Ok(Some(status)) => self.record_exit(status),
            Ok(None) => RemoteStatus::Running,
            Err(e) => {
                tracing::warn!("Failed to poll {}: {}", self.launcher.name(), e);
                self.child = None;
                RemoteStatus::Exited { success: false }
            }
        }
    }

    fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Kill of {} failed: {}", self.launcher.name(), e);
            }
            tracing::debug!("Terminated {}", self.launcher.name());
        }
        self.exit = None;
    }

    fn wait(&mut self) -> impl Future<Output = Result<RemoteStatus, RemoteError>> + Send {
        async move {
            if let Some(child) = self.child.as_mut() {
                let status = child.wait().await.map_err(RemoteError::Wait)?;
                return Ok(self.record_exit(status));
            }
            Ok(self.status())
        }
    }

    fn execute_again(&mut self) -> Result<(), RemoteError> {
        let (host, command) = self.last.clone().ok_or(RemoteError::NothingToRepeat)?;
        self.terminate();
        self.attempts += 1;
        tracing::info!(
            "Restarting {} on {} (attempt {})",
            self.launcher.name(),
            host,
            self.attempts
        );
        self.spawn(&host, &command)
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}
