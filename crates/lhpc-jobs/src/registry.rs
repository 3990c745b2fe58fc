//! Job kind constructors keyed by a stable name.
//!
//! The built-in kinds are registered by [`KindRegistry::with_builtin`];
//! site extensions call [`KindRegistry::register`] before the first
//! session is launched.

use crate::kind::{JobKind, NotebookSpec};
use crate::request::{RequestError, SessionRequest};
use lhpc_core::LaunchConfig;
use std::collections::BTreeMap;

pub type KindConstructor = fn(&SessionRequest, &LaunchConfig) -> Result<JobKind, RequestError>;

#[derive(Debug, Clone)]
pub struct KindRegistry {
    constructors: BTreeMap<String, KindConstructor>,
}

fn placeholder(_: &SessionRequest, _: &LaunchConfig) -> Result<JobKind, RequestError> {
    Ok(JobKind::Placeholder)
}

fn command(request: &SessionRequest, _: &LaunchConfig) -> Result<JobKind, RequestError> {
    let command = request
        .command
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or(RequestError::MissingCommand(request.kind))?;
    Ok(JobKind::Command { command })
}

fn notebook(_: &SessionRequest, config: &LaunchConfig) -> Result<JobKind, RequestError> {
    Ok(JobKind::Notebook(NotebookSpec::notebook(config)))
}

fn lab(_: &SessionRequest, config: &LaunchConfig) -> Result<JobKind, RequestError> {
    Ok(JobKind::Lab(NotebookSpec::lab(config)))
}

fn vm(_: &SessionRequest, _: &LaunchConfig) -> Result<JobKind, RequestError> {
    Ok(JobKind::RemoteDesktopVm)
}

impl KindRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("placeholder", placeholder);
        registry.register("command", command);
        registry.register("notebook", notebook);
        registry.register("lab", lab);
        registry.register("vm", vm);
        registry
    }

    /// Register a constructor, returning the one it replaces.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        constructor: KindConstructor,
    ) -> Option<KindConstructor> {
        self.constructors.insert(key.into(), constructor)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Construct the job kind for a request.
    pub fn build(
        &self,
        request: &SessionRequest,
        config: &LaunchConfig,
    ) -> Result<JobKind, RequestError> {
        let key = request.job_kind_key();
        let constructor = self
            .constructors
            .get(key)
            .ok_or_else(|| RequestError::UnknownJobKind(key.to_string()))?;
        constructor(request, config)
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
