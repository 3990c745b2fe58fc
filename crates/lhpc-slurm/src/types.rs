//! Records parsed from SLURM tool output.

use chrono::{DateTime, Utc};
use lhpc_jobs::Job;
use std::collections::HashMap;
use std::time::Duration;

/// One row of the single-job status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusReport {
    /// Compact state code (`PD`, `R`, ...)
    pub state: String,
    pub nodes: Vec<String>,
    pub time_left: Option<Duration>,
    pub time_running: Option<Duration>,
    pub time_limit: Option<Duration>,
}

impl JobStatusReport {
    pub fn is_running(&self) -> bool {
        self.state == lhpc_jobs::RUNNING
    }

    pub fn apply_to(&self, job: &mut Job) {
        job.status = self.state.clone();
        job.allocated_nodes = self.nodes.clone();
        job.time_left = self.time_left;
        job.time_running = self.time_running;
        job.time_limit = self.time_limit;
    }
}

/// Outcome of waiting for a job to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Running,
    Cancelled,
    /// The job left the queue without starting
    Gone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub nodes: Vec<String>,
    pub description: String,
    pub is_default: bool,
}

/// Attributes of one node as printed by `scontrol show node`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub attributes: HashMap<String, String>,
}

fn list(value: Option<&String>) -> Vec<String> {
    match value.map(String::as_str) {
        None | Some("") | Some("(null)") => Vec::new(),
        Some(v) => lhpc_parsers::split_list(v),
    }
}

impl NodeInfo {
    pub fn new(attributes: HashMap<String, String>) -> Self {
        Self { attributes }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.get("NodeName")
    }

    pub fn state(&self) -> Option<&str> {
        self.get("State")
    }

    pub fn partitions(&self) -> Vec<String> {
        list(self.attributes.get("Partitions"))
    }

    pub fn active_features(&self) -> Vec<String> {
        list(self.attributes.get("ActiveFeatures"))
    }

    pub fn cpus(&self) -> Option<u32> {
        self.get("CPUTot")?.parse().ok()
    }

    pub fn real_memory_mb(&self) -> Option<u64> {
        lhpc_parsers::parse_memory_mb(self.get("RealMemory")?)
    }

    /// Memory already allocated to jobs.
    pub fn alloc_memory_mb(&self) -> Option<u64> {
        lhpc_parsers::parse_memory_mb(self.get("AllocMem")?)
    }

    pub fn gres(&self) -> Option<&str> {
        self.get("Gres").filter(|g| *g != "(null)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub name: String,
    pub accounts: Vec<String>,
    pub users: Vec<String>,
    pub state: String,
    pub nodes: Vec<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.state == "ACTIVE"
    }
}

/// One row of the queue dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_id: String,
    pub partition: String,
    pub name: String,
    pub user: String,
    pub state: String,
    pub time_used: Option<Duration>,
    pub time_limit: Option<Duration>,
    pub nodes: Option<u32>,
    /// Node list when running, pending reason otherwise
    pub nodelist_or_reason: String,
    pub time_left: Option<Duration>,
    pub dependency: Option<String>,
    pub account: String,
    pub cpus: Option<u32>,
    pub features: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}
