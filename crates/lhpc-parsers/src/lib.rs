//! Shared parsing utilities for scheduler command output.
//!
//! This crate provides the command runner and the small parsers used by
//! lhpc-slurm, lhpc-grants and lhpc-remote.

pub mod command;
pub mod hostlist;
pub mod keyvalue;
pub mod memory;
pub mod time;

pub use command::{
    CommandError, run_command, run_command_allow_failure, run_command_with_input, tool_available,
};
pub use hostlist::{HostlistError, compress as compress_hostlist, expand as expand_hostlist};
pub use keyvalue::{parse_key_values, parse_records};
pub use memory::parse_memory_mb;
pub use time::{
    DurationError, format_duration_slurm, parse_duration, parse_slurm_timestamp, parse_walltime,
    progress_percent,
};

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty()
        || trimmed == "-"
        || trimmed == "N/A"
        || trimmed == "Unknown"
        || trimmed == "(null)"
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a delimited line and validate field count.
pub fn split_delimited(
    line: &str,
    delimiter: char,
    min_fields: usize,
) -> Result<Vec<&str>, String> {
    let fields: Vec<&str> = line.split(delimiter).collect();
    if fields.len() < min_fields {
        return Err(format!(
            "Expected {} fields, got {}: {}",
            min_fields,
            fields.len(),
            line
        ));
    }
    Ok(fields)
}

/// Split a comma separated list, trimming entries and dropping empty ones.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
