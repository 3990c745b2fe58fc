//! Parsing of squeue output.

use crate::types::{JobStatusReport, QueueEntry};
use lhpc_parsers::{
    expand_hostlist, non_empty_string, parse_duration, parse_slurm_timestamp, split_delimited,
};

/// State code, node list, time left, time used, time limit.
pub const STATUS_FORMAT: &str = "%t;%N;%L;%M;%l";

/// %i  job id
/// %P  partition
/// %j  job name
/// %u  user
/// %T  state (extended)
/// %M  time used
/// %l  time limit
/// %D  node count
/// %R  node list or pending reason
/// %L  time left
/// %E  dependency
/// %a  account
/// %C  cpus
/// %f  features
/// %S  start time
pub const QUEUE_FORMAT: &str =
    "%.7i;%.9P;%.20j;%.12u;%.8T;%.10M;%.9l;%.6D;%R;%L;%E;%14a;%4C;%.12f;%S";

/// Parse one line of the single-job status query.
pub fn parse_status_line(line: &str) -> Result<JobStatusReport, String> {
    let fields = split_delimited(line.trim(), ';', 5)?;
    let nodes = expand_hostlist(fields[1].trim()).map_err(|e| e.to_string())?;

    Ok(JobStatusReport {
        state: fields[0].trim().to_string(),
        nodes,
        time_left: parse_duration(fields[2]),
        time_running: parse_duration(fields[3]),
        time_limit: parse_duration(fields[4]),
    })
}

/// Parse one line of the queue dump.
pub fn parse_queue_line(line: &str) -> Result<QueueEntry, String> {
    let fields = split_delimited(line, ';', 15)?;
    let field = |i: usize| fields[i].trim();

    Ok(QueueEntry {
        job_id: field(0).to_string(),
        partition: field(1).to_string(),
        name: field(2).to_string(),
        user: field(3).to_string(),
        state: field(4).to_string(),
        time_used: parse_duration(field(5)),
        time_limit: parse_duration(field(6)),
        nodes: field(7).parse().ok(),
        nodelist_or_reason: field(8).to_string(),
        time_left: parse_duration(field(9)),
        dependency: non_empty_string(field(10)),
        account: field(11).to_string(),
        cpus: field(12).parse().ok(),
        features: non_empty_string(field(13)),
        start_time: parse_slurm_timestamp(field(14)),
    })
}

/// Parse a full queue dump, skipping lines that do not parse.
pub fn parse_queue(stdout: &str) -> Vec<QueueEntry> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_queue_line(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Failed to parse squeue line: {}", e);
                None
            }
        })
        .collect()
}
