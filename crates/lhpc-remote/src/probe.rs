//! Load of an allocated node, read over ssh.

use crate::connection::RemoteError;
use crate::launchers::{Launcher, SecureShell};
use lhpc_parsers::run_command;
use tokio::process::Command;

const SEPARATOR: &str = "--lhpc-probe--";

/// Memory, CPU and GPU usage of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub total_memory_mb: Option<u64>,
    pub used_memory_mb: Option<u64>,
    /// Aggregate CPU utilisation in percent
    pub cpu_percent: Option<u8>,
    /// Utilisation per GPU in percent
    pub gpu_percent: Vec<u8>,
}

/// Total and used memory from `free -m`.
pub fn parse_free(stdout: &str) -> Option<(u64, u64)> {
    let line = stdout.lines().find(|l| l.trim_start().starts_with("Mem:"))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let total = fields.get(1)?.parse().ok()?;
    let used = fields.get(2)?.parse().ok()?;
    Some((total, used))
}

/// CPU utilisation from the last sample of `vmstat 1 2`.
///
/// The first sample holds averages since boot, so the last line is used.
pub fn parse_vmstat(stdout: &str) -> Option<u8> {
    let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
    let header = lines.find(|l| l.split_whitespace().any(|c| c == "id"))?;
    let idle_col = header.split_whitespace().position(|c| c == "id")?;
    let last = lines.last()?;
    let idle: u8 = last.split_whitespace().nth(idle_col)?.parse().ok()?;
    Some(100u8.saturating_sub(idle))
}

/// One utilisation value per line from
/// `nvidia-smi --query-gpu=utilization.gpu --format=csv,noheader,nounits`.
pub fn parse_nvidia_smi(stdout: &str) -> Vec<u8> {
    stdout
        .lines()
        .filter_map(|l| l.trim().trim_end_matches('%').trim().parse().ok())
        .collect()
}

pub fn parse_probe_output(stdout: &str) -> NodeStatus {
    let mut sections = stdout.split(SEPARATOR);
    let free = sections.next().unwrap_or("");
    let vmstat = sections.next().unwrap_or("");
    let gpus = sections.next().unwrap_or("");

    let memory = parse_free(free);
    NodeStatus {
        total_memory_mb: memory.map(|(total, _)| total),
        used_memory_mb: memory.map(|(_, used)| used),
        cpu_percent: parse_vmstat(vmstat),
        gpu_percent: parse_nvidia_smi(gpus),
    }
}

/// Runs `free`, `vmstat` and `nvidia-smi` in one ssh round trip.
#[derive(Debug, Clone)]
pub struct StatusProbe {
    shell: SecureShell,
}

impl StatusProbe {
    pub fn new(shell: SecureShell) -> Self {
        Self {
            shell: shell.pty(false).x11(false).trusted_x11(false),
        }
    }

    pub fn remote_command() -> String {
        format!(
            "free -m; echo {SEPARATOR}; vmstat 1 2; echo {SEPARATOR}; \
             nvidia-smi --query-gpu=utilization.gpu --format=csv,noheader,nounits 2>/dev/null || true"
        )
    }

    pub async fn probe(&self, host: &str) -> Result<NodeStatus, RemoteError> {
        let invocation = self.shell.invocation(host, &Self::remote_command());
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        let stdout = run_command(&mut cmd, self.shell.name()).await?;
        Ok(parse_probe_output(&stdout))
    }
}
