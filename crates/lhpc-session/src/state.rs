//! Session states.

use std::fmt;

/// Where a session is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Nothing submitted yet
    #[default]
    Idle,
    /// sbatch is running
    Submitted,
    /// Job id known, waiting for an allocation
    Queued,
    /// Allocation granted
    Running,
    /// Remote application starting
    Connecting,
    Connected,
    NotebookReady,
    VmReady,
    /// Job cancelled, waiting for it to leave the queue
    Terminating,
    Done,
    Failed,
}

impl SessionState {
    /// States between a successful submit and teardown.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Submitted
                | Self::Queued
                | Self::Running
                | Self::Connecting
                | Self::Connected
                | Self::NotebookReady
                | Self::VmReady
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// States in which the allocation is consumed and may expire.
    pub fn holds_allocation(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::Connecting | Self::Connected | Self::NotebookReady | Self::VmReady
        )
    }

    /// States with a remote process that needs liveness checks.
    pub fn has_remote(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::VmReady)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitted => "submitted",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::NotebookReady => "notebook-ready",
            Self::VmReady => "vm-ready",
            Self::Terminating => "terminating",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
