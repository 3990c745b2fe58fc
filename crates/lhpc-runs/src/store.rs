use crate::types::{SessionHistory, SessionRecord};
use camino::{Utf8Path, Utf8PathBuf};
use lhpc_core::StateDir;
use std::fs::{self, OpenOptions};
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only session log, one JSON record per line.
pub struct RunStore {
    path: Utf8PathBuf,
}

impl RunStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The log inside the state directory (`sessions.jsonl`).
    pub fn for_state_dir(state_dir: &StateDir) -> Self {
        Self::new(state_dir.session_history())
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }

    /// Append one record.
    ///
    /// Creates the file and its parent directories if needed.
    pub fn append(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.ensure_parent()?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| self.io_error(e))?;
        tracing::debug!("Recorded job {} ({:?})", record.job_id, record.outcome);
        Ok(())
    }

    /// Load the history.
    ///
    /// Returns an empty history if the file doesn't exist. Lines that fail to
    /// parse are skipped.
    pub fn load(&self) -> Result<SessionHistory, StoreError> {
        if !self.path.exists() {
            return Ok(SessionHistory::default());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let records = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str::<SessionRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping line {} of {}: {}", n + 1, self.path, e);
                    None
                }
            });
        Ok(SessionHistory::from_records(records))
    }

    /// Rewrite the log with one line per session, oldest first.
    pub fn compact(&self, history: &SessionHistory) -> Result<(), StoreError> {
        self.ensure_parent()?;
        let mut content = String::new();
        for record in history.records.iter().rev() {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}
