//! Site grant files.
//!
//! One project per line:
//!
//! ```text
//! name,start,end,core-hours,partition,pi#member member ...
//! ```
//!
//! Dates are `YYYYMMDD`; lines starting with `#` are comments.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrantError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid grant line '{line}': {reason}")]
    Parse { line: String, reason: String },
    #[error(transparent)]
    Slurm(#[from] lhpc_slurm::SlurmError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub start: NaiveDate,
    /// First day the project is no longer active
    pub end: NaiveDate,
    pub core_hours: u64,
    pub partition: String,
    pub pi: String,
    pub members: Vec<String>,
}

impl Project {
    pub fn is_active(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn is_member(&self, user: &str) -> bool {
        self.members.iter().any(|m| m == user)
    }

    pub fn active_for(&self, user: &str, date: NaiveDate) -> bool {
        self.is_active(date) && self.is_member(user)
    }
}

fn parse_date(value: &str, line: &str) -> Result<NaiveDate, GrantError> {
    NaiveDate::parse_from_str(value.trim(), "%Y%m%d").map_err(|e| GrantError::Parse {
        line: line.to_string(),
        reason: format!("bad date '{}': {}", value.trim(), e),
    })
}

/// Parse one line. Comments and blank lines give `Ok(None)`.
pub fn parse_grant_line(line: &str) -> Result<Option<Project>, GrantError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let error = |reason: &str| GrantError::Parse {
        line: trimmed.to_string(),
        reason: reason.to_string(),
    };

    let fields: Vec<&str> = trimmed.splitn(6, ',').collect();
    if fields.len() < 6 {
        return Err(error("expected 6 comma separated fields"));
    }

    let core_hours = fields[3]
        .trim()
        .parse()
        .map_err(|_| error("core hours is not a number"))?;
    let (pi, members) = fields[5]
        .split_once('#')
        .ok_or_else(|| error("missing '#' before the member list"))?;

    Ok(Some(Project {
        name: fields[0].trim().to_string(),
        start: parse_date(fields[1], trimmed)?,
        end: parse_date(fields[2], trimmed)?,
        core_hours,
        partition: fields[4].trim().to_string(),
        pi: pi.trim().to_string(),
        members: members.split_whitespace().map(str::to_string).collect(),
    }))
}

/// Parse a whole grant file, skipping malformed lines.
pub fn parse_grant_file(content: &str) -> Vec<Project> {
    content
        .lines()
        .filter_map(|line| match parse_grant_line(line) {
            Ok(project) => project,
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        })
        .collect()
}

pub async fn load_grant_file(path: &Utf8Path) -> Result<Vec<Project>, GrantError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| GrantError::Io {
            path: path.to_owned(),
            source,
        })?;
    Ok(parse_grant_file(&content))
}

/// Load every file in `dir` ending in `suffix` and merge the projects.
///
/// Files are read in name order. Every entry is kept, so a project renewed
/// in a later file keeps both windows; exact duplicates are dropped.
/// Unreadable files are skipped.
pub async fn load_grant_dir(dir: &Utf8Path, suffix: &str) -> Result<Vec<Project>, GrantError> {
    let io_error = |source| GrantError::Io {
        path: dir.to_owned(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
            continue;
        };
        if !path.as_str().ends_with(suffix) {
            continue;
        }
        match entry.file_type().await {
            Ok(file_type) if file_type.is_file() || file_type.is_symlink() => files.push(path),
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping {}: {}", path, e),
        }
    }
    files.sort();

    let mut projects: Vec<Project> = Vec::new();
    for file in files {
        let loaded = match load_grant_file(&file).await {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("{}", e);
                continue;
            }
        };
        for project in loaded {
            if !projects.contains(&project) {
                projects.push(project);
            }
        }
    }
    Ok(projects)
}
