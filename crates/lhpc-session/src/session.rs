//! The one session a coordinator owns.

use crate::state::SessionState;
use chrono::{DateTime, Utc};
use lhpc_jobs::{Job, NotebookUrl, SessionRequest, UrlWatcher};
use lhpc_runs::SessionOutcome;

#[derive(Debug, Clone)]
pub struct Session {
    pub request: SessionRequest,
    pub job: Job,
    pub state: SessionState,
    /// Remote restarts so far
    pub retries: u32,
    /// Status polls answered so far
    pub ticks: u64,
    /// Consecutive polls that did not find the job
    pub missing_polls: u32,

    pub submitted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_status_at: Option<DateTime<Utc>>,
    /// When the allocation runs out
    pub deadline: Option<DateTime<Utc>>,

    /// URL shown to the user
    pub url: Option<String>,
    pub vm_host: Option<String>,
    pub tunnel_port: Option<u16>,
    /// Last reported progress; never decreases
    pub progress: Option<u8>,
    /// Set when teardown starts
    pub outcome: Option<SessionOutcome>,

    pub(crate) url_watcher: Option<UrlWatcher>,
    /// URL waiting for its tunnel
    pub(crate) pending_url: Option<NotebookUrl>,
}

impl Session {
    pub fn new(request: SessionRequest, job: Job) -> Self {
        let url_watcher = job.kind.url_watcher();
        Self {
            request,
            job,
            state: SessionState::Idle,
            retries: 0,
            ticks: 0,
            missing_polls: 0,
            submitted_at: None,
            started_at: None,
            last_status_at: None,
            deadline: None,
            url: None,
            vm_host: None,
            tunnel_port: None,
            progress: None,
            outcome: None,
            url_watcher,
            pending_url: None,
        }
    }

    pub fn job_id(&self) -> Option<u64> {
        self.job.id
    }

    /// Node the session's application runs on.
    pub fn host(&self) -> Option<&str> {
        self.job.first_node().or(self.job.node.as_deref())
    }

    /// Record a progress value, keeping the series non-decreasing.
    pub fn update_progress(&mut self, percent: u8) -> u8 {
        let percent = percent.min(100).max(self.progress.unwrap_or(0));
        self.progress = Some(percent);
        percent
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.job.time_left.is_some_and(|left| left.is_zero()) {
            return true;
        }
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}
