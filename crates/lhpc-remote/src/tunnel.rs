//! Local port forwarding through ssh.

use crate::connection::{RemoteError, spawn_error};
use camino::Utf8PathBuf;
use std::net::TcpListener;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Ask the OS for a free local port.
pub fn find_free_port() -> Result<u16, RemoteError> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(RemoteError::Port)?;
    let port = listener.local_addr().map_err(RemoteError::Port)?.port();
    Ok(port)
}

/// Where a tunnel forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    /// Host the ssh connection goes to
    pub via: String,
    /// Target as seen from `via`
    pub remote_host: String,
    pub remote_port: u16,
}

/// `ssh -N -L local:host:port via`, one per session.
#[derive(Debug)]
pub struct ForwardTunnel {
    ssh: Utf8PathBuf,
    requested_port: Option<u16>,
    local_port: Option<u16>,
    endpoint: Option<TunnelEndpoint>,
    child: Option<Child>,
}

impl ForwardTunnel {
    pub fn new(ssh: impl Into<Utf8PathBuf>) -> Self {
        Self {
            ssh: ssh.into(),
            requested_port: None,
            local_port: None,
            endpoint: None,
            child: None,
        }
    }

    /// Use a fixed local port instead of an ephemeral one.
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.requested_port = Some(port);
        self
    }

    pub fn args(local_port: u16, endpoint: &TunnelEndpoint) -> Vec<String> {
        vec![
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-L".to_string(),
            format!(
                "{}:{}:{}",
                local_port, endpoint.remote_host, endpoint.remote_port
            ),
            endpoint.via.clone(),
        ]
    }

    /// Start forwarding and return the local port.
    pub fn open(&mut self, endpoint: TunnelEndpoint) -> Result<u16, RemoteError> {
        self.terminate();
        let local_port = match self.requested_port {
            Some(port) => port,
            None => find_free_port()?,
        };

        let program = self.ssh.as_str();
        let child = Command::new(program)
            .args(Self::args(local_port, &endpoint))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        tracing::info!(
            "Forwarding localhost:{} to {}:{} via {}",
            local_port,
            endpoint.remote_host,
            endpoint.remote_port,
            endpoint.via
        );
        self.child = Some(child);
        self.local_port = Some(local_port);
        self.endpoint = Some(endpoint);
        Ok(local_port)
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn endpoint(&self) -> Option<&TunnelEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn is_active(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                tracing::warn!("Tunnel exited with {}", status);
                self.child = None;
                false
            }
            Err(e) => {
                tracing::warn!("Failed to poll tunnel: {}", e);
                self.child = None;
                false
            }
        }
    }

    /// Wait until the local end accepts connections.
    pub async fn wait_until_listening(&mut self, timeout: Duration) -> Result<(), RemoteError> {
        let port = self.local_port.ok_or(RemoteError::TunnelClosed)?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_active() {
                return Err(RemoteError::TunnelClosed);
            }
            if tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RemoteError::TunnelClosed);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    pub fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Kill of tunnel failed: {}", e);
            }
            tracing::debug!("Closed tunnel on port {:?}", self.local_port);
        }
    }
}
