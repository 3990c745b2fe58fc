//! Job kinds and their batch payloads.

use crate::watch::UrlWatcher;
use lhpc_core::LaunchConfig;
use serde::{Deserialize, Serialize};

/// How a notebook server is started on the compute node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookSpec {
    pub module: String,
    pub conda_source_env: Option<String>,
    pub conda_use_env: Option<String>,
    /// Bind to localhost; the URL is then only reachable through a tunnel
    pub use_localhost: bool,
}

impl NotebookSpec {
    pub fn notebook(config: &LaunchConfig) -> Self {
        Self::with_module(config, &config.notebook_module)
    }

    pub fn lab(config: &LaunchConfig) -> Self {
        Self::with_module(config, &config.jupyterlab_module)
    }

    fn with_module(config: &LaunchConfig, module: &str) -> Self {
        Self {
            module: module.to_string(),
            conda_source_env: config.conda_source_env.clone(),
            conda_use_env: config.conda_use_env.clone(),
            use_localhost: config.jupyter_use_localhost,
        }
    }

    fn payload(&self, program: &str) -> Vec<String> {
        let mut lines = vec![format!("module load {}", self.module)];
        if let Some(env) = &self.conda_source_env {
            lines.push(format!("source {env}"));
        }
        if let Some(env) = &self.conda_use_env {
            lines.push(format!("conda activate {env}"));
        }
        lines.push("unset XDG_RUNTIME_DIR".to_string());
        let ip = if self.use_localhost {
            "localhost"
        } else {
            "$(hostname)"
        };
        lines.push(format!("jupyter {program} --no-browser --ip={ip}"));
        lines
    }
}

/// Kind-specific part of a batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// Keeps the allocation alive while the application runs over ssh
    Placeholder,
    /// Runs a command inside the batch job
    Command { command: String },
    Notebook(NotebookSpec),
    Lab(NotebookSpec),
    /// Over-subscribed placeholder; the VM host arrives through a file
    RemoteDesktopVm,
    /// Contributed through the kind registry
    Custom { key: String, payload: Vec<String> },
}

const SLEEP_LOOP: [&str; 4] = ["while true; do", "    date", "    sleep 60", "done"];

impl JobKind {
    pub fn key(&self) -> &str {
        match self {
            JobKind::Placeholder => "placeholder",
            JobKind::Command { .. } => "command",
            JobKind::Notebook(_) => "notebook",
            JobKind::Lab(_) => "lab",
            JobKind::RemoteDesktopVm => "vm",
            JobKind::Custom { key, .. } => key,
        }
    }

    pub fn payload(&self) -> Vec<String> {
        match self {
            JobKind::Placeholder | JobKind::RemoteDesktopVm => {
                SLEEP_LOOP.iter().map(|l| l.to_string()).collect()
            }
            JobKind::Command { command } => vec![command.clone()],
            JobKind::Notebook(spec) => spec.payload("notebook"),
            JobKind::Lab(spec) => spec.payload("lab"),
            JobKind::Custom { payload, .. } => payload.clone(),
        }
    }

    /// VM jobs share their node with other sessions.
    pub fn oversubscribe(&self) -> bool {
        matches!(self, JobKind::RemoteDesktopVm)
    }

    /// A fresh URL watcher for kinds that print a server URL.
    pub fn url_watcher(&self) -> Option<UrlWatcher> {
        matches!(self, JobKind::Notebook(_) | JobKind::Lab(_)).then(UrlWatcher::new)
    }

    /// Whether the notebook server only listens on localhost.
    pub fn binds_localhost(&self) -> bool {
        match self {
            JobKind::Notebook(spec) | JobKind::Lab(spec) => spec.use_localhost,
            _ => false,
        }
    }

    pub fn watches_vm_host(&self) -> bool {
        matches!(self, JobKind::RemoteDesktopVm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_payload() {
        let payload = JobKind::Placeholder.payload();
        assert_eq!(payload.first().map(String::as_str), Some("while true; do"));
        assert_eq!(payload.last().map(String::as_str), Some("done"));
        assert!(!JobKind::Placeholder.oversubscribe());
        assert!(JobKind::RemoteDesktopVm.oversubscribe());
        assert!(JobKind::RemoteDesktopVm.watches_vm_host());
    }

    #[test]
    fn test_notebook_payload() {
        let config = LaunchConfig {
            conda_source_env: Some("/sw/conda/etc/profile.d/conda.sh".to_string()),
            conda_use_env: Some("ml".to_string()),
            ..Default::default()
        };
        let kind = JobKind::Lab(NotebookSpec::lab(&config));
        assert_eq!(
            kind.payload(),
            vec![
                "module load Anaconda3",
                "source /sw/conda/etc/profile.d/conda.sh",
                "conda activate ml",
                "unset XDG_RUNTIME_DIR",
                "jupyter lab --no-browser --ip=$(hostname)",
            ]
        );
        assert!(kind.url_watcher().is_some());
        assert!(!kind.binds_localhost());
    }

    #[test]
    fn test_localhost_notebook() {
        let config = LaunchConfig {
            jupyter_use_localhost: true,
            ..Default::default()
        };
        let kind = JobKind::Notebook(NotebookSpec::notebook(&config));
        assert_eq!(
            kind.payload().last().map(String::as_str),
            Some("jupyter notebook --no-browser --ip=localhost")
        );
        assert!(kind.binds_localhost());
        assert_eq!(kind.key(), "notebook");
    }

    #[test]
    fn test_custom_kind() {
        let kind = JobKind::Custom {
            key: "matlab".to_string(),
            payload: vec!["matlab -batch run".to_string()],
        };
        assert_eq!(kind.key(), "matlab");
        assert_eq!(kind.payload(), vec!["matlab -batch run"]);
        assert!(kind.url_watcher().is_none());
    }
}
