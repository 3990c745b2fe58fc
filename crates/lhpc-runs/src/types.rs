use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    #[default]
    Running,
    Completed,
    Cancelled,
    Expired,
    Failed,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Running => "running",
            SessionOutcome::Completed => "completed",
            SessionOutcome::Cancelled => "cancelled",
            SessionOutcome::Expired => "expired",
            SessionOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One launched session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    /// Scheduler job id.
    pub job_id: u64,

    /// Job kind key (`notebook`, `vm`, ...).
    pub kind: String,

    /// Job name as submitted.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,

    /// First allocated node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Notebook URL as shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Desktop host of a VM session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_host: Option<String>,

    pub started: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    #[serde(default)]
    pub outcome: SessionOutcome,
}

impl SessionRecord {
    pub fn new(job_id: u64, kind: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            kind: kind.into(),
            name: name.into(),
            partition: None,
            host: None,
            url: None,
            vm_host: None,
            started: now,
            updated: now,
            outcome: SessionOutcome::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.outcome == SessionOutcome::Running
    }

    pub fn is_vm(&self) -> bool {
        self.kind == "vm"
    }

    /// Mark the session as ended.
    pub fn finish(&mut self, outcome: SessionOutcome) {
        self.outcome = outcome;
        self.updated = Utc::now();
    }
}

/// Sessions folded from the history log, newest first.
///
/// The log is append-only, so a job may appear several times; the last
/// line for a job id wins.
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    pub records: Vec<SessionRecord>,
}

impl SessionHistory {
    /// Records kept when the log is compacted.
    pub const MAX_RECORDS: usize = 200;

    pub fn from_records(records: impl IntoIterator<Item = SessionRecord>) -> Self {
        let mut history = Self::default();
        for record in records {
            history.upsert(record);
        }
        history
    }

    pub fn upsert(&mut self, record: SessionRecord) {
        if let Some(existing) = self.records.iter_mut().find(|r| r.job_id == record.job_id) {
            *existing = record;
        } else {
            self.records.push(record);
        }
        self.records.sort_by(|a, b| b.started.cmp(&a.started));
    }

    pub fn get(&self, job_id: u64) -> Option<&SessionRecord> {
        self.records.iter().find(|r| r.job_id == job_id)
    }

    pub fn running(&self) -> impl Iterator<Item = &SessionRecord> {
        self.records.iter().filter(|r| r.is_running())
    }

    /// VM sessions that have not been closed yet.
    pub fn running_vms(&self) -> impl Iterator<Item = &SessionRecord> {
        self.running().filter(|r| r.is_vm())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop the oldest records beyond [`Self::MAX_RECORDS`].
    pub fn truncate(&mut self) {
        self.records.truncate(Self::MAX_RECORDS);
    }
}
