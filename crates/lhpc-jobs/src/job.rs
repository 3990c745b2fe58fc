//! A batch job derived from a session request.

use crate::kind::JobKind;
use crate::request::{MemoryRequest, ModuleSpec, SessionRequest, TasksPerNode};
use crate::script::build_script;
use camino::Utf8PathBuf;
use lhpc_core::StateDir;
use lhpc_parsers::progress_percent;
use std::time::Duration;

/// Status code of a running job in `squeue` output.
pub const RUNNING: &str = "R";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Scheduler id, set once submitted
    pub id: Option<u64>,
    pub name: String,
    pub kind: JobKind,
    pub account: Option<String>,
    pub partition: Option<String>,
    pub node: Option<String>,
    pub reservation: Option<String>,
    /// Output path, `%j` is filled in by sbatch
    pub output: Utf8PathBuf,
    pub nodes: u32,
    pub tasks_per_node: TasksPerNode,
    pub cpus_per_task: Option<u32>,
    pub walltime: Duration,
    pub gres: Option<String>,
    pub memory: MemoryRequest,
    pub exclusive: bool,
    pub oversubscribe: bool,
    pub constraints: Vec<String>,
    pub modules: Vec<ModuleSpec>,

    /// Last status code reported by the scheduler
    pub status: String,
    pub allocated_nodes: Vec<String>,
    pub time_left: Option<Duration>,
    pub time_running: Option<Duration>,
    pub time_limit: Option<Duration>,

    script: Vec<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, kind: JobKind, walltime: Duration) -> Self {
        let oversubscribe = kind.oversubscribe();
        Self {
            id: None,
            name: name.into(),
            kind,
            account: None,
            partition: None,
            node: None,
            reservation: None,
            output: Utf8PathBuf::from("lhpcdt-%j.out"),
            nodes: 1,
            tasks_per_node: TasksPerNode::Unset,
            cpus_per_task: None,
            walltime,
            gres: None,
            memory: MemoryRequest::Unset,
            exclusive: false,
            oversubscribe,
            constraints: Vec::new(),
            modules: Vec::new(),
            status: String::new(),
            allocated_nodes: Vec::new(),
            time_left: None,
            time_running: None,
            time_limit: None,
            script: Vec::new(),
        }
    }

    pub fn from_request(request: &SessionRequest, kind: JobKind, state_dir: &StateDir) -> Self {
        let mut job = Self::new(request.job_name(), kind, request.walltime.duration());
        job.account = request.account.clone();
        job.partition = request.partition.clone();
        job.node = request.node.clone();
        job.reservation = request.reservation.clone();
        job.output = state_dir.job_output_template();
        job.nodes = request.nodes;
        job.tasks_per_node = request.tasks_per_node;
        job.cpus_per_task = request.cpus_per_task;
        job.gres = request.gres.clone();
        job.memory = request.memory;
        job.exclusive = request.exclusive;
        job.constraints = request.features.clone();
        job.modules = request.modules.clone();
        job.rebuild_script();
        job
    }

    /// Regenerate the script from the current fields.
    pub fn rebuild_script(&mut self) -> &[String] {
        self.script = build_script(self);
        &self.script
    }

    pub fn script(&self) -> &[String] {
        &self.script
    }

    /// Script text as handed to sbatch.
    pub fn script_text(&self) -> String {
        let mut text = self.script.join("\n");
        text.push('\n');
        text
    }

    pub fn is_running(&self) -> bool {
        self.status == RUNNING
    }

    pub fn first_node(&self) -> Option<&str> {
        self.allocated_nodes.first().map(String::as_str)
    }

    pub fn clear_status(&mut self) {
        self.status.clear();
        self.allocated_nodes.clear();
        self.time_left = None;
        self.time_running = None;
        self.time_limit = None;
    }

    /// Share of the time limit used so far.
    pub fn progress(&self) -> Option<u8> {
        progress_percent(self.time_running?, self.time_limit?)
    }
}
