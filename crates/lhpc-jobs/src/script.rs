//! Batch script generation.
//!
//! The output depends only on the job's fields. Directive order is fixed so
//! that scripts can be compared line by line.

use crate::job::Job;
use crate::request::{MemoryRequest, TasksPerNode};
use lhpc_parsers::format_duration_slurm;

pub fn build_script(job: &Job) -> Vec<String> {
    let mut lines = vec!["#!/bin/bash".to_string()];
    let mut directive = |text: String| lines.push(format!("#SBATCH {text}"));

    if let Some(account) = &job.account {
        directive(format!("-A {account}"));
    }
    match (&job.node, &job.partition) {
        (Some(node), _) => directive(format!("-w {node}")),
        (None, Some(partition)) => directive(format!("-p {partition}")),
        (None, None) => {}
    }
    if let Some(reservation) = &job.reservation {
        directive(format!("--reservation={reservation}"));
    }
    directive(format!("-o {}", job.output));
    directive(format!("-N {}", job.nodes));
    if let TasksPerNode::Count(tasks) = job.tasks_per_node {
        directive(format!("--tasks-per-node={tasks}"));
    }
    if let Some(cpus) = job.cpus_per_task {
        directive(format!("--cpus-per-task={cpus}"));
    }
    directive(format!("--time={}", format_duration_slurm(job.walltime)));
    if let Some(gres) = &job.gres {
        directive(format!("--gres={gres}"));
    }
    if let MemoryRequest::Mb(mb) = job.memory {
        directive(format!("--mem={mb}"));
    }
    if job.exclusive {
        directive("--exclusive".to_string());
    }
    if job.oversubscribe {
        directive("--oversubscribe".to_string());
    }
    if !job.constraints.is_empty() {
        directive(format!("--constraint={}", job.constraints.join("&")));
    }
    directive(format!("-J {}", job.name));

    lines.push(r#"echo "Job $SLURM_JOB_ID allocated on $SLURM_JOB_NODELIST""#.to_string());
    lines.push(r#"echo "Job started at $(date)""#.to_string());
    lines.extend(job.modules.iter().map(|m| m.load_line()));
    lines.extend(job.kind.payload());
    lines
}
