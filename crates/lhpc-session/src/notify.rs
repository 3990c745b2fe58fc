//! What the coordinator tells the front-end.

use crate::state::SessionState;
use thiserror::Error;

/// Why a VM could not be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmFailure {
    AllocationError,
    NoSessionAvailable,
}

impl VmFailure {
    pub fn message(&self) -> &'static str {
        match self {
            VmFailure::AllocationError => "allocation error",
            VmFailure::NoSessionAvailable => "no session currently available",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("Scheduler unavailable: {0}")]
    ScheduleUnavailable(String),
    #[error("User {user} has no active project")]
    NotEntitled { user: String },
    #[error("Job submission failed: {0}")]
    SubmitFailed(String),
    #[error("Remote connection failed after {attempts} restarts: {message}")]
    RemoteFailed { attempts: u32, message: String },
    #[error("VM session could not be started: {}", .0.message())]
    VmAllocationFailed(VmFailure),
    #[error("Time expired, the session was closed")]
    Expired,
}

/// Events posted to the front-end, in transition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    Submitted {
        job_id: u64,
    },
    Started {
        job_id: u64,
        nodes: Vec<String>,
    },
    /// Share of the wall time used, never decreasing
    Progress {
        percent: u8,
    },
    Connected {
        host: String,
    },
    Reconnecting {
        attempt: u32,
    },
    NotebookReady {
        url: String,
    },
    VmReady {
        host: String,
    },
    Error(LaunchError),
}

impl Notification {
    pub fn is_error(&self) -> bool {
        matches!(self, Notification::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_messages() {
        let err = LaunchError::VmAllocationFailed(VmFailure::NoSessionAvailable);
        assert_eq!(
            err.to_string(),
            "VM session could not be started: no session currently available"
        );
        let err = LaunchError::VmAllocationFailed(VmFailure::AllocationError);
        assert!(err.to_string().ends_with("allocation error"));
    }
}
