//! Launcher configuration.
//!
//! One `LaunchConfig` is built at startup and shared read-only (behind an
//! `Arc`) by every component. It can be read from a JSON document or from
//! the flat `key = value` settings produced by the site configuration
//! loader.

use camino::{Utf8Path, Utf8PathBuf};
use lhpc_parsers::split_list;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A named set of partitions with optional sizing defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionGroup {
    pub partitions: Vec<String>,
    /// Default tasks per node for requests in this group
    #[serde(default)]
    pub tasks: Option<u32>,
    /// Default memory in MB for requests in this group
    #[serde(default)]
    pub memory: Option<u64>,
    /// Whether requests in this group get exclusive nodes
    #[serde(default)]
    pub exclusive: Option<bool>,
}

impl PartitionGroup {
    pub fn contains(&self, partition: &str) -> bool {
        self.partitions.iter().any(|p| p == partition)
    }
}

/// Everything the launcher core reads from site configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub script_dir: Option<Utf8PathBuf>,
    pub install_dir: Option<Utf8PathBuf>,
    pub help_url: Option<String>,
    /// Browser used for notebook URLs; the desktop default when unset
    pub browser_command: Option<String>,

    pub default_part: Option<String>,
    pub default_account: Option<String>,

    pub grantfile: Option<Utf8PathBuf>,
    pub grantfile_dir: Option<Utf8PathBuf>,
    pub grantfile_suffix: String,
    /// Refuse to start when the user has no active project
    pub grantfile_required: bool,
    pub use_sacctmgr: bool,

    /// Feature substrings hidden from users
    pub feature_ignore: Vec<String>,
    /// Partition substrings hidden from users
    pub part_ignore: Vec<String>,

    pub groups: BTreeMap<String, PartitionGroup>,

    pub vgl_path: Utf8PathBuf,
    pub backend_node: Option<String>,
    pub xfreerdp_path: Utf8PathBuf,
    pub ssh_path: Utf8PathBuf,

    pub notebook_module: String,
    pub jupyterlab_module: String,
    pub jupyter_use_localhost: bool,
    pub conda_source_env: Option<String>,
    pub conda_use_env: Option<String>,

    /// Override for the per-user state directory (`~/.lhpc`)
    pub state_dir: Option<Utf8PathBuf>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            script_dir: None,
            install_dir: None,
            help_url: None,
            browser_command: None,
            default_part: None,
            default_account: None,
            grantfile: None,
            grantfile_dir: None,
            grantfile_suffix: ".grant".to_string(),
            grantfile_required: false,
            use_sacctmgr: false,
            feature_ignore: Vec::new(),
            part_ignore: Vec::new(),
            groups: BTreeMap::new(),
            vgl_path: Utf8PathBuf::from("/opt/VirtualGL/bin"),
            backend_node: None,
            xfreerdp_path: Utf8PathBuf::from("xfreerdp"),
            ssh_path: Utf8PathBuf::from("ssh"),
            notebook_module: "Anaconda3".to_string(),
            jupyterlab_module: "Anaconda3".to_string(),
            jupyter_use_localhost: false,
            conda_source_env: None,
            conda_use_env: None,
            state_dir: None,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "on" | "1" => Ok(true),
        "no" | "false" | "off" | "0" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{key}: expected a boolean, got '{other}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: expected a number, got '{value}'")))
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl LaunchConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Build from flat `key = value` settings.
    ///
    /// Partition groups use `group_<name> = p1, p2` with optional
    /// `group_<name>_tasks`, `group_<name>_memory` and
    /// `group_<name>_exclusive`. Unknown keys are ignored.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (key, value) in settings {
            match key.as_str() {
                "script_dir" => config.script_dir = optional(value).map(Utf8PathBuf::from),
                "install_dir" => config.install_dir = optional(value).map(Utf8PathBuf::from),
                "help_url" => config.help_url = optional(value),
                "browser_command" => config.browser_command = optional(value),
                "default_part" => config.default_part = optional(value),
                "default_account" => config.default_account = optional(value),
                "grantfile" => config.grantfile = optional(value).map(Utf8PathBuf::from),
                "grantfile_dir" => config.grantfile_dir = optional(value).map(Utf8PathBuf::from),
                "grantfile_suffix" => config.grantfile_suffix = value.trim().to_string(),
                "grantfile_required" => config.grantfile_required = parse_bool(key, value)?,
                "use_sacctmgr" => config.use_sacctmgr = parse_bool(key, value)?,
                "feature_ignore" => config.feature_ignore = split_list(value),
                "part_ignore" => config.part_ignore = split_list(value),
                "vgl_path" => config.vgl_path = Utf8PathBuf::from(value.trim()),
                "backend_node" => config.backend_node = optional(value),
                "xfreerdp_path" => config.xfreerdp_path = Utf8PathBuf::from(value.trim()),
                "ssh_path" => config.ssh_path = Utf8PathBuf::from(value.trim()),
                "notebook_module" => config.notebook_module = value.trim().to_string(),
                "jupyterlab_module" => config.jupyterlab_module = value.trim().to_string(),
                "jupyter_use_localhost" => config.jupyter_use_localhost = parse_bool(key, value)?,
                "conda_source_env" => config.conda_source_env = optional(value),
                "conda_use_env" => config.conda_use_env = optional(value),
                "state_dir" => config.state_dir = optional(value).map(Utf8PathBuf::from),
                _ => {
                    if let Some(rest) = key.strip_prefix("group_") {
                        config.apply_group_setting(rest, value)?;
                    } else {
                        tracing::debug!("Ignoring unknown setting {}", key);
                    }
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_group_setting(&mut self, rest: &str, value: &str) -> Result<(), ConfigError> {
        let key = format!("group_{rest}");
        if let Some(name) = rest.strip_suffix("_tasks") {
            self.groups.entry(name.to_string()).or_default().tasks =
                Some(parse_number(&key, value)?);
        } else if let Some(name) = rest.strip_suffix("_memory") {
            self.groups.entry(name.to_string()).or_default().memory =
                Some(parse_number(&key, value)?);
        } else if let Some(name) = rest.strip_suffix("_exclusive") {
            self.groups.entry(name.to_string()).or_default().exclusive =
                Some(parse_bool(&key, value)?);
        } else {
            self.groups.entry(rest.to_string()).or_default().partitions = split_list(value);
        }
        Ok(())
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, group) in &self.groups {
            if group.partitions.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "partition group '{name}' lists no partitions"
                )));
            }
        }

        if self.grantfile_suffix.is_empty() && self.grantfile_dir.is_some() {
            return Err(ConfigError::Invalid(
                "grantfile_dir is set but grantfile_suffix is empty".to_string(),
            ));
        }

        if self.grantfile_required
            && !self.use_sacctmgr
            && self.grantfile.is_none()
            && self.grantfile_dir.is_none()
        {
            return Err(ConfigError::Invalid(
                "grantfile_required is set but no grantfile, grantfile_dir or use_sacctmgr"
                    .to_string(),
            ));
        }

        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<&PartitionGroup> {
        self.groups.get(name)
    }

    /// Whether a partition is hidden by `part_ignore`.
    pub fn partition_ignored(&self, partition: &str) -> bool {
        self.part_ignore.iter().any(|p| partition.contains(p.as_str()))
    }

    pub fn vglconnect_path(&self) -> Utf8PathBuf {
        self.vgl_path.join("vglconnect")
    }

    pub fn vglrun_path(&self) -> Utf8PathBuf {
        self.vgl_path.join("vglrun")
    }
}
