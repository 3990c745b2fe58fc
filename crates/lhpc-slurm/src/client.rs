//! The SLURM client.
//!
//! All scheduler interaction goes through [`SlurmClient`]. Each operation
//! shells out once; the client keeps no state between calls apart from the
//! tool names and the verbosity flag.

use crate::squeue::{STATUS_FORMAT, parse_status_line};
use crate::types::{JobStatusReport, StartOutcome};
use camino::{Utf8Path, Utf8PathBuf};
use lhpc_core::{StateDir, home_dir};
use lhpc_jobs::Job;
use lhpc_parsers::{CommandError, run_command, run_command_with_input, tool_available};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;

static SUBMITTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Submitted batch job (\d+)").expect("valid regex"));

/// Consecutive empty status polls before a pending job counts as gone.
pub const MAX_MISSING_POLLS: u32 = 3;

#[derive(Error, Debug)]
pub enum SlurmError {
    #[error("{tool} not found in PATH")]
    Unavailable { tool: String },
    #[error("Job submission failed: {0}")]
    SubmitFailed(String),
    #[error(transparent)]
    Command(CommandError),
    #[error("Failed to parse {tool} output: {message}")]
    Parse { tool: String, message: String },
    #[error("IO error reading {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

impl From<CommandError> for SlurmError {
    fn from(error: CommandError) -> Self {
        match error {
            CommandError::NotFound { command } => SlurmError::Unavailable { tool: command },
            other => SlurmError::Command(other),
        }
    }
}

/// Scheduler tool names, overridable for sites with wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmTools {
    pub sbatch: String,
    pub squeue: String,
    pub scancel: String,
    pub sinfo: String,
    pub scontrol: String,
    pub sacctmgr: String,
}

impl Default for SlurmTools {
    fn default() -> Self {
        Self {
            sbatch: "sbatch".to_string(),
            squeue: "squeue".to_string(),
            scancel: "scancel".to_string(),
            sinfo: "sinfo".to_string(),
            scontrol: "scontrol".to_string(),
            sacctmgr: "sacctmgr".to_string(),
        }
    }
}

/// Stderr from scancel/squeue/scontrol when the job is no longer known.
fn job_unknown(error: &CommandError) -> bool {
    error.stderr().is_some_and(|stderr| {
        stderr.contains("Invalid job id") || stderr.contains("already completing or completed")
    })
}

/// Job id from sbatch output.
pub fn parse_submit_output(stdout: &str) -> Option<u64> {
    SUBMITTED
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Newline-terminated lines of `content`, without their terminators.
pub fn complete_lines(content: &str) -> Vec<String> {
    let complete = match content.rfind('\n') {
        Some(end) => &content[..=end],
        None => "",
    };
    complete.lines().map(str::to_string).collect()
}

/// Resolve once the cancel flag is set or the sender is gone.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlurmClient {
    pub(crate) tools: SlurmTools,
    state_dir: StateDir,
    workdir: Utf8PathBuf,
    verbose: bool,
}

impl SlurmClient {
    pub fn new(state_dir: StateDir) -> Self {
        Self {
            tools: SlurmTools::default(),
            state_dir,
            workdir: home_dir(),
            verbose: false,
        }
    }

    pub fn with_tools(mut self, tools: SlurmTools) -> Self {
        self.tools = tools;
        self
    }

    /// Directory sbatch is started in; the user's home by default.
    pub fn with_workdir(mut self, workdir: impl Into<Utf8PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn tools(&self) -> &SlurmTools {
        &self.tools
    }

    pub fn state_dir(&self) -> &StateDir {
        &self.state_dir
    }

    pub fn workdir(&self) -> &Utf8Path {
        &self.workdir
    }

    /// Tools required for launching sessions that are not in `PATH`.
    pub fn missing_tools(&self) -> Vec<&str> {
        [
            &self.tools.sbatch,
            &self.tools.squeue,
            &self.tools.scancel,
            &self.tools.sinfo,
        ]
        .into_iter()
        .map(String::as_str)
        .filter(|tool| !tool_available(tool))
        .collect()
    }

    pub fn environment_check(&self) -> bool {
        let missing = self.missing_tools();
        if !missing.is_empty() {
            tracing::warn!("SLURM tools not found: {}", missing.join(", "));
        }
        missing.is_empty()
    }

    /// Submit a job, assigning its id on success.
    pub async fn submit(&self, job: &mut Job) -> Result<u64, SlurmError> {
        job.rebuild_script();
        if self.verbose {
            tracing::info!("Submitting job script:\n{}", job.script_text());
        } else {
            tracing::debug!("Submitting job {} ({} lines)", job.name, job.script().len());
        }

        let mut cmd = Command::new(&self.tools.sbatch);
        cmd.current_dir(&self.workdir);
        let stdout = run_command_with_input(&mut cmd, "sbatch", &job.script_text())
            .await
            .map_err(|e| match e {
                CommandError::Failed { stderr, .. } => SlurmError::SubmitFailed(stderr),
                other => other.into(),
            })?;

        match parse_submit_output(&stdout) {
            Some(id) => {
                tracing::info!("Submitted job {} as {}", job.name, id);
                job.id = Some(id);
                Ok(id)
            }
            None => {
                job.id = None;
                Err(SlurmError::SubmitFailed(format!(
                    "no job id in sbatch output: {}",
                    stdout.trim()
                )))
            }
        }
    }

    /// Status of one job; None once it has left the queue.
    pub async fn query_status(&self, job_id: u64) -> Result<Option<JobStatusReport>, SlurmError> {
        let id = job_id.to_string();
        let mut cmd = Command::new(&self.tools.squeue);
        cmd.args(["-j", &id, "-t", "PD,R", "-h", "-o", STATUS_FORMAT]);

        let stdout = match run_command(&mut cmd, "squeue").await {
            Ok(stdout) => stdout,
            Err(e) if job_unknown(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some(line) = stdout.lines().find(|l| !l.trim().is_empty()) else {
            return Ok(None);
        };
        parse_status_line(line)
            .map(Some)
            .map_err(|message| SlurmError::Parse {
                tool: "squeue".to_string(),
                message,
            })
    }

    /// Refresh the job's status fields. Returns whether the job is still
    /// queued or running; a job that is gone has its status cleared.
    pub async fn status(&self, job: &mut Job) -> Result<bool, SlurmError> {
        let Some(id) = job.id else {
            job.clear_status();
            return Ok(false);
        };
        match self.query_status(id).await? {
            Some(report) => {
                report.apply_to(job);
                Ok(true)
            }
            None => {
                job.clear_status();
                Ok(false)
            }
        }
    }

    /// Poll until the job runs, leaves the queue, or `cancel` fires.
    ///
    /// An in-flight squeue call is abandoned (and its child killed) as soon
    /// as the cancel flag is set or the sender is dropped.
    pub async fn wait_for_start(
        &self,
        job: &mut Job,
        cancel: &mut watch::Receiver<bool>,
        interval: Duration,
    ) -> Result<StartOutcome, SlurmError> {
        let mut missing = 0;
        loop {
            let present = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Ok(StartOutcome::Cancelled),
                present = self.status(job) => present?,
            };

            if job.is_running() {
                return Ok(StartOutcome::Running);
            }
            if present {
                missing = 0;
            } else {
                missing += 1;
                if missing >= MAX_MISSING_POLLS {
                    return Ok(StartOutcome::Gone);
                }
            }

            tokio::select! {
                biased;
                _ = cancelled(cancel) => return Ok(StartOutcome::Cancelled),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Cancel a job and forget its id. Cancelling twice is harmless.
    pub async fn cancel(&self, job: &mut Job) -> Result<(), SlurmError> {
        if let Some(id) = job.id {
            self.cancel_by_id(id).await?;
        }
        job.id = None;
        job.clear_status();
        Ok(())
    }

    pub async fn cancel_by_id(&self, job_id: u64) -> Result<(), SlurmError> {
        let id = job_id.to_string();
        let mut cmd = Command::new(&self.tools.scancel);
        cmd.arg(&id);
        match run_command(&mut cmd, "scancel").await {
            Ok(_) => {
                tracing::info!("Cancelled job {}", job_id);
                Ok(())
            }
            Err(e) if job_unknown(&e) => {
                tracing::debug!("Job {} already gone", job_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Complete lines written so far to the job's output file. A trailing
    /// line still being written is left for the next read.
    pub async fn job_output(&self, job: &Job) -> Result<Vec<String>, SlurmError> {
        let Some(id) = job.id else {
            return Ok(Vec::new());
        };
        let path = self.state_dir.job_output(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(complete_lines(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(SlurmError::Io { path, source }),
        }
    }

    /// Raw `scontrol show job` description; None for unknown jobs.
    pub async fn show_job(
        &self,
        job_id: u64,
    ) -> Result<Option<HashMap<String, String>>, SlurmError> {
        let id = job_id.to_string();
        let mut cmd = Command::new(&self.tools.scontrol);
        cmd.args(["show", "job", &id]);
        match run_command(&mut cmd, "scontrol").await {
            Ok(stdout) => Ok(Some(lhpc_parsers::parse_key_values(&stdout))),
            Err(e) if job_unknown(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit_output() {
        assert_eq!(parse_submit_output("Submitted batch job 12345\n"), Some(12345));
        assert_eq!(
            parse_submit_output("sbatch: info: x\nSubmitted batch job 7 on cluster lu\n"),
            Some(7)
        );
        assert_eq!(parse_submit_output("sbatch: error: invalid partition"), None);
    }

    #[test]
    fn test_complete_lines() {
        assert!(complete_lines("").is_empty());
        assert!(complete_lines("http://cn05:8891/lab?tok").is_empty());
        assert_eq!(complete_lines("a\r\nb\n"), vec!["a", "b"]);
        assert_eq!(complete_lines("a\nb\nhalf"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cancelled_on_sender_drop() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        cancelled(&mut rx).await;
    }

    #[tokio::test]
    async fn test_unsubmitted_job_has_no_output() {
        let client = SlurmClient::new(StateDir::new("/nonexistent"));
        let job = Job::new("lhpc-xterm", lhpc_jobs::JobKind::Placeholder, Duration::from_secs(60));
        assert!(client.job_output(&job).await.unwrap().is_empty());
    }

    #[cfg(unix)]
    mod with_fake_tools {
        use super::super::fake;
        use super::*;
        use lhpc_jobs::JobKind;

        fn make_client(dir: &tempfile::TempDir, tools: SlurmTools) -> SlurmClient {
            let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
            SlurmClient::new(StateDir::new(root.clone()))
                .with_tools(tools)
                .with_workdir(root)
        }

        fn job() -> Job {
            let mut job = Job::new("lhpc-xterm", JobKind::Placeholder, Duration::from_secs(1800));
            job.partition = Some("lu32".to_string());
            job
        }

        #[tokio::test]
        async fn test_submit_passes_script_on_stdin() {
            let dir = tempfile::TempDir::new().unwrap();
            let mut tools = fake::tools(&dir);
            tools.sbatch = fake::tool(
                &dir,
                "sbatch",
                "cat > submitted.sh\necho 'Submitted batch job 12345'",
            );
            let client = make_client(&dir, tools);

            let mut job = job();
            assert_eq!(client.submit(&mut job).await.unwrap(), 12345);
            assert_eq!(job.id, Some(12345));

            let script = std::fs::read_to_string(dir.path().join("submitted.sh")).unwrap();
            assert!(script.starts_with("#!/bin/bash\n"));
            assert!(script.contains("#SBATCH -p lu32\n"));
        }

        #[tokio::test]
        async fn test_submit_failures() {
            let dir = tempfile::TempDir::new().unwrap();
            let mut tools = fake::tools(&dir);
            let client_without_sbatch = make_client(&dir, tools.clone());
            let mut job = job();
            assert!(matches!(
                client_without_sbatch.submit(&mut job).await,
                Err(SlurmError::Unavailable { .. })
            ));
            assert!(!client_without_sbatch.environment_check());

            tools.sbatch = fake::tool(
                &dir,
                "sbatch",
                "cat > /dev/null\necho 'sbatch: error: invalid partition' >&2\nexit 1",
            );
            let client = make_client(&dir, tools);
            match client.submit(&mut job).await {
                Err(SlurmError::SubmitFailed(reason)) => assert!(reason.contains("invalid partition")),
                other => panic!("unexpected result: {other:?}"),
            }
            assert_eq!(job.id, None);
        }

        #[tokio::test]
        async fn test_status_and_absence() {
            let dir = tempfile::TempDir::new().unwrap();
            let mut tools = fake::tools(&dir);
            tools.squeue = fake::tool(&dir, "squeue", "echo 'R;cn03;29:40;0:20;30:00'");
            let client = make_client(&dir, tools.clone());

            let mut job = job();
            job.id = Some(12345);
            assert!(client.status(&mut job).await.unwrap());
            assert!(job.is_running());
            assert_eq!(job.allocated_nodes, vec!["cn03"]);

            tools.squeue = fake::tool(
                &dir,
                "squeue-gone",
                "echo 'slurm_load_jobs error: Invalid job id specified' >&2\nexit 1",
            );
            let client = make_client(&dir, tools);
            assert!(!client.status(&mut job).await.unwrap());
            assert!(job.status.is_empty());
            assert!(job.allocated_nodes.is_empty());
        }

        #[tokio::test]
        async fn test_wait_for_start() {
            let dir = tempfile::TempDir::new().unwrap();
            let mut tools = fake::tools(&dir);
            // pending on the first poll, running afterwards
            let marker = dir.path().join("polled");
            tools.squeue = fake::tool(
                &dir,
                "squeue",
                &format!(
                    "if [ -f {m} ]; then echo 'R;cn03;29:59;0:01;30:00'; else touch {m}; echo 'PD;;30:00;0:00;30:00'; fi",
                    m = marker.display()
                ),
            );
            let client = make_client(&dir, tools);
            let (_tx, mut rx) = watch::channel(false);

            let mut job = job();
            job.id = Some(1);
            let outcome = client
                .wait_for_start(&mut job, &mut rx, Duration::from_millis(10))
                .await
                .unwrap();
            assert_eq!(outcome, StartOutcome::Running);
            assert_eq!(job.first_node(), Some("cn03"));
        }

        #[tokio::test]
        async fn test_wait_for_start_cancelled() {
            let dir = tempfile::TempDir::new().unwrap();
            let mut tools = fake::tools(&dir);
            tools.squeue = fake::tool(&dir, "squeue", "echo 'PD;;30:00;0:00;30:00'");
            let client = make_client(&dir, tools);
            let (tx, mut rx) = watch::channel(false);

            let mut job = job();
            job.id = Some(1);
            let canceller = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tx.send(true).unwrap();
            });
            let outcome = client
                .wait_for_start(&mut job, &mut rx, Duration::from_millis(10))
                .await
                .unwrap();
            assert_eq!(outcome, StartOutcome::Cancelled);
            canceller.await.unwrap();
        }

        #[tokio::test]
        async fn test_wait_for_start_gone() {
            let dir = tempfile::TempDir::new().unwrap();
            let mut tools = fake::tools(&dir);
            tools.squeue = fake::tool(&dir, "squeue", "true");
            let client = make_client(&dir, tools);
            let (_tx, mut rx) = watch::channel(false);

            let mut job = job();
            job.id = Some(1);
            let outcome = client
                .wait_for_start(&mut job, &mut rx, Duration::from_millis(1))
                .await
                .unwrap();
            assert_eq!(outcome, StartOutcome::Gone);
        }

        #[tokio::test]
        async fn test_cancel_is_idempotent() {
            let dir = tempfile::TempDir::new().unwrap();
            let mut tools = fake::tools(&dir);
            let marker = dir.path().join("cancelled");
            tools.scancel = fake::tool(
                &dir,
                "scancel",
                &format!(
                    "if [ -f {m} ]; then echo 'scancel: error: Invalid job id specified' >&2; exit 1; fi\ntouch {m}",
                    m = marker.display()
                ),
            );
            let client = make_client(&dir, tools);

            let mut job = job();
            job.id = Some(12345);
            client.cancel(&mut job).await.unwrap();
            assert_eq!(job.id, None);
            client.cancel(&mut job).await.unwrap();
            client.cancel_by_id(12345).await.unwrap();
            assert_eq!(job.id, None);
        }

        #[tokio::test]
        async fn test_job_output() {
            let dir = tempfile::TempDir::new().unwrap();
            let client = make_client(&dir, fake::tools(&dir));
            let mut job = job();
            job.id = Some(42);
            assert!(client.job_output(&job).await.unwrap().is_empty());

            std::fs::write(dir.path().join("lhpcdt-42.out"), "line one\nline two\n").unwrap();
            assert_eq!(
                client.job_output(&job).await.unwrap(),
                vec!["line one", "line two"]
            );

            // the notebook is still writing its URL line
            let out = dir.path().join("lhpcdt-42.out");
            std::fs::write(&out, "line one\n    http://cn05:8891/lab?tok").unwrap();
            let partial = client.job_output(&job).await.unwrap();
            assert_eq!(partial, vec!["line one"]);

            let mut watcher = lhpc_jobs::UrlWatcher::new();
            assert_eq!(watcher.feed(&partial), None);

            std::fs::write(&out, "line one\n    http://cn05:8891/lab?token=abcd\n").unwrap();
            let url = watcher.feed(&client.job_output(&job).await.unwrap()).unwrap();
            assert_eq!(url.url, "http://cn05:8891/lab?token=abcd");
        }
    }
}
