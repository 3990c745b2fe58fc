//! Session requests as built by a front-end.

use lhpc_core::LaunchConfig;
use lhpc_parsers::{DurationError, format_duration_slurm, parse_walltime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid wall time '{value}': {source}")]
    InvalidWalltime {
        value: String,
        source: DurationError,
    },
    #[error("Invalid memory request {0}: expected MB or -1 for unset")]
    InvalidMemory(i64),
    #[error("Node count must be at least 1")]
    InvalidNodeCount,
    #[error("Unknown application kind '{0}'")]
    UnknownAppKind(String),
    #[error("Unknown job kind '{0}'")]
    UnknownJobKind(String),
    #[error("Invalid module '{0}'")]
    InvalidModule(String),
    #[error("A {0} session needs a command")]
    MissingCommand(AppKind),
    #[error("Unknown partition group '{0}'")]
    UnknownGroup(String),
    #[error("Partition group '{group}' requires a partition")]
    PartitionRequired { group: String },
    #[error("Partition '{partition}' is not part of group '{group}'")]
    PartitionNotInGroup { partition: String, group: String },
}

/// What the user wants to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppKind {
    Graphical,
    Notebook,
    Lab,
    #[serde(rename = "vm")]
    RemoteDesktopVm,
    Command,
}

impl AppKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppKind::Graphical => "graphical",
            AppKind::Notebook => "notebook",
            AppKind::Lab => "lab",
            AppKind::RemoteDesktopVm => "vm",
            AppKind::Command => "command",
        }
    }

    /// Registry key of the job kind used when the request names none.
    pub fn default_job_kind(&self) -> &'static str {
        match self {
            AppKind::Graphical => "placeholder",
            AppKind::Notebook => "notebook",
            AppKind::Lab => "lab",
            AppKind::RemoteDesktopVm => "vm",
            AppKind::Command => "command",
        }
    }

    pub fn needs_command(&self) -> bool {
        matches!(self, AppKind::Graphical | AppKind::Command)
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppKind {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "graphical" | "gfx" => Ok(AppKind::Graphical),
            "notebook" | "jupyter" => Ok(AppKind::Notebook),
            "lab" | "jupyterlab" => Ok(AppKind::Lab),
            "vm" | "rdp" => Ok(AppKind::RemoteDesktopVm),
            "command" | "cmd" => Ok(AppKind::Command),
            other => Err(RequestError::UnknownAppKind(other.to_string())),
        }
    }
}

/// How a graphical application reaches the user's display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GraphicsMode {
    /// Plain X forwarding over ssh
    #[default]
    Plain,
    /// GL forwarded through vglconnect
    Tunneled,
    /// GL forwarded through vglconnect, command wrapped in vglrun
    VglRun,
}

impl GraphicsMode {
    pub fn uses_vgl(&self) -> bool {
        !matches!(self, GraphicsMode::Plain)
    }
}

/// Tasks per node. `Unset` leaves the directive out of the script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TasksPerNode {
    #[default]
    Unset,
    Count(u32),
}

impl TasksPerNode {
    /// Map the conventional `-1` (or any negative value) to `Unset`.
    pub fn from_sentinel(value: i64) -> Self {
        match u32::try_from(value) {
            Ok(n) => TasksPerNode::Count(n),
            Err(_) => TasksPerNode::Unset,
        }
    }
}

/// Memory per node in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryRequest {
    #[default]
    Unset,
    Mb(u64),
}

impl MemoryRequest {
    /// `-1` means unset; other negative values are rejected.
    pub fn from_sentinel(value: i64) -> Result<Self, RequestError> {
        match value {
            -1 => Ok(MemoryRequest::Unset),
            v if v >= 0 => Ok(MemoryRequest::Mb(v as u64)),
            v => Err(RequestError::InvalidMemory(v)),
        }
    }
}

/// A positive wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Walltime(Duration);

impl Walltime {
    pub fn new(duration: Duration) -> Option<Self> {
        (!duration.is_zero()).then_some(Walltime(duration))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl Default for Walltime {
    fn default() -> Self {
        Walltime(Duration::from_secs(60 * 60))
    }
}

impl FromStr for Walltime {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_walltime(s)
            .map(Walltime)
            .map_err(|source| RequestError::InvalidWalltime {
                value: s.to_string(),
                source,
            })
    }
}

impl fmt::Display for Walltime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_duration_slurm(self.0))
    }
}

/// An environment module, optionally versioned (`name/version`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,
    pub version: Option<String>,
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn versioned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }

    pub fn load_line(&self) -> String {
        format!("module load {self}")
    }
}

impl fmt::Display for ModuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ModuleSpec {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return Err(RequestError::InvalidModule(s.to_string()));
        }
        match s.split_once('/') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(ModuleSpec::versioned(name, version))
            }
            Some(_) => Err(RequestError::InvalidModule(s.to_string())),
            None => Ok(ModuleSpec::new(s)),
        }
    }
}

/// Everything the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub kind: AppKind,
    /// Registry key overriding the kind's default job kind
    pub job_kind: Option<String>,
    pub command: Option<String>,
    pub name: Option<String>,
    pub partition: Option<String>,
    /// Pin the job to one node (`-w`) instead of a partition
    pub node: Option<String>,
    pub features: Vec<String>,
    pub reservation: Option<String>,
    pub account: Option<String>,
    pub walltime: Walltime,
    pub nodes: u32,
    pub tasks_per_node: TasksPerNode,
    pub cpus_per_task: Option<u32>,
    pub memory: MemoryRequest,
    pub exclusive: bool,
    pub gres: Option<String>,
    pub graphics: GraphicsMode,
    pub modules: Vec<ModuleSpec>,
    /// Partition group restricting the partition choice
    pub group: Option<String>,
    pub autostart: bool,
}

impl SessionRequest {
    pub fn new(kind: AppKind, walltime: Walltime) -> Self {
        Self {
            kind,
            job_kind: None,
            command: None,
            name: None,
            partition: None,
            node: None,
            features: Vec::new(),
            reservation: None,
            account: None,
            walltime,
            nodes: 1,
            tasks_per_node: TasksPerNode::Unset,
            cpus_per_task: None,
            memory: MemoryRequest::Unset,
            exclusive: false,
            gres: None,
            graphics: GraphicsMode::Plain,
            modules: Vec::new(),
            group: None,
            autostart: false,
        }
    }

    pub fn job_kind_key(&self) -> &str {
        self.job_kind
            .as_deref()
            .unwrap_or_else(|| self.kind.default_job_kind())
    }

    /// Job name shown in the queue.
    pub fn job_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let program = self
            .command
            .as_deref()
            .and_then(|c| c.split_whitespace().next())
            .map(|p| p.rsplit('/').next().unwrap_or(p));
        match program {
            Some(program) if self.kind.needs_command() => format!("lhpc-{program}"),
            _ => format!("lhpc-{}", self.kind),
        }
    }

    /// Fill unset fields from the configuration and the partition group.
    pub fn apply_defaults(&mut self, config: &LaunchConfig) {
        if self.account.is_none() {
            self.account = config.default_account.clone();
        }

        let group = self.group.as_deref().and_then(|name| config.group(name));
        match group {
            Some(group) => {
                if self.partition.is_none() && group.partitions.len() == 1 {
                    self.partition = group.partitions.first().cloned();
                }
                if self.tasks_per_node == TasksPerNode::Unset {
                    if let Some(tasks) = group.tasks {
                        self.tasks_per_node = TasksPerNode::Count(tasks);
                    }
                }
                if self.memory == MemoryRequest::Unset {
                    if let Some(memory) = group.memory {
                        self.memory = MemoryRequest::Mb(memory);
                    }
                }
                if group.exclusive == Some(true) {
                    self.exclusive = true;
                }
            }
            None => {
                if self.partition.is_none() && self.node.is_none() {
                    self.partition = config.default_part.clone();
                }
            }
        }
    }

    pub fn validate(&self, config: &LaunchConfig) -> Result<(), RequestError> {
        if self.nodes == 0 {
            return Err(RequestError::InvalidNodeCount);
        }

        if self.kind.needs_command()
            && self.command.as_deref().is_none_or(|c| c.trim().is_empty())
        {
            return Err(RequestError::MissingCommand(self.kind));
        }

        if let Some(name) = &self.group {
            let group = config
                .group(name)
                .ok_or_else(|| RequestError::UnknownGroup(name.clone()))?;
            let partition = self
                .partition
                .as_ref()
                .ok_or_else(|| RequestError::PartitionRequired {
                    group: name.clone(),
                })?;
            if !group.contains(partition) {
                return Err(RequestError::PartitionNotInGroup {
                    partition: partition.clone(),
                    group: name.clone(),
                });
            }
        }

        Ok(())
    }
}
