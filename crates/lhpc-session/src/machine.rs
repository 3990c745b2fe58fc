//! The session state machine.
//!
//! [`SessionMachine::handle`] is pure: it takes one event and the current
//! time, updates the session and returns the side effects to perform. The
//! runner performs them and feeds the results back as new events.

use crate::notify::{LaunchError, Notification, VmFailure};
use crate::session::Session;
use crate::state::SessionState;
use chrono::{DateTime, Utc};
use lhpc_jobs::{AppKind, GraphicsMode, Job, VmHost};
use lhpc_remote::RemoteStatus;
use lhpc_runs::SessionOutcome;
use lhpc_slurm::{JobStatusReport, MAX_MISSING_POLLS};

/// Remote restarts before the session is given up.
pub const MAX_RETRIES: u32 = 3;

/// Port jupyter uses when the URL does not name one.
pub const DEFAULT_NOTEBOOK_PORT: u16 = 8888;

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The request does not fit the configuration
    Rejected { message: String },
    /// The user has no active project; submission may still be tried
    NotEntitled { user: String },
    /// User or autostart asks for the job to be submitted
    Submit,
    Submitted { job_id: u64 },
    SubmitFailed { message: String },
    /// sbatch is not installed
    Unavailable { message: String },
    /// Result of one status poll; None when the job is not in the queue
    Status(Option<JobStatusReport>),
    /// The job left the queue without starting
    JobGone,
    /// Full job output read so far
    Output(Vec<String>),
    /// Content of the VM host file
    VmHostFile(String),
    Remote(RemoteStatus),
    /// The remote program could not be started
    RemoteFailed { message: String },
    TunnelOpened { local_port: u16 },
    TunnelFailed { message: String },
    Cancel,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SubmitJob(Box<Job>),
    StartPolling,
    ReadOutput {
        job_id: u64,
    },
    CheckVmHost {
        job_id: u64,
    },
    SpawnRemote {
        host: String,
        command: String,
        graphics: GraphicsMode,
    },
    CheckRemote,
    RetryRemote,
    /// Forward a local port to `localhost:remote_port` on `via`
    OpenTunnel {
        via: String,
        remote_port: u16,
    },
    CheckTunnel,
    OpenBrowser {
        url: String,
    },
    LaunchDesktop {
        host: String,
    },
    CancelJob {
        job_id: u64,
    },
    /// Stop the ssh or desktop client
    TerminateRemote,
    TerminateTunnel,
    Notify(Notification),
}

#[derive(Debug)]
pub struct SessionMachine {
    session: Session,
    actions: Vec<Action>,
}

impl SessionMachine {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            actions: Vec::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Whether the runner should submit on its own after the grace period.
    pub fn wants_autostart(&self) -> bool {
        self.session.request.autostart && self.session.state == SessionState::Idle
    }

    /// Apply one event.
    pub fn handle(&mut self, event: Event, now: DateTime<Utc>) -> Vec<Action> {
        tracing::trace!("{} <- {:?}", self.session.state, event);
        match event {
            Event::Rejected { message } => self.on_rejected(message),
            Event::NotEntitled { user } => self.fail(LaunchError::NotEntitled { user }),
            Event::Submit => self.on_submit(now),
            Event::Submitted { job_id } => self.on_submitted(job_id),
            Event::SubmitFailed { message } => self.on_submit_failed(message),
            Event::Unavailable { message } => self.on_unavailable(message),
            Event::Status(report) => self.on_status(report, now),
            Event::JobGone => self.on_job_gone(),
            Event::Output(lines) => self.on_output(&lines),
            Event::VmHostFile(content) => self.on_vm_host(&content),
            Event::Remote(status) => self.on_remote(status),
            Event::RemoteFailed { message } => self.on_remote_failed(message),
            Event::TunnelOpened { local_port } => self.on_tunnel_opened(local_port),
            Event::TunnelFailed { message } => self.on_tunnel_failed(message),
            Event::Cancel => self.on_cancel(),
        }
        std::mem::take(&mut self.actions)
    }

    fn act(&mut self, action: Action) {
        self.actions.push(action);
    }

    fn notify(&mut self, notification: Notification) {
        self.actions.push(Action::Notify(notification));
    }

    fn fail(&mut self, error: LaunchError) {
        tracing::warn!("{}", error);
        self.notify(Notification::Error(error));
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.session.state;
        if from == to {
            return;
        }
        tracing::debug!("Session {} -> {}", from, to);
        self.session.state = to;
        self.notify(Notification::StateChanged { from, to });
    }

    /// Cancel the job and stop every remote process.
    fn teardown(&mut self, outcome: SessionOutcome) {
        self.session.outcome.get_or_insert(outcome);
        self.act(Action::TerminateRemote);
        self.act(Action::TerminateTunnel);
        if let Some(job_id) = self.session.job.id {
            self.act(Action::CancelJob { job_id });
        }
        self.transition(SessionState::Terminating);
    }

    /// The job is no longer in the queue.
    fn finish(&mut self) {
        if self.session.state != SessionState::Terminating {
            self.act(Action::TerminateRemote);
            self.act(Action::TerminateTunnel);
        }
        self.session.outcome.get_or_insert(SessionOutcome::Completed);
        self.session.job.clear_status();
        self.transition(SessionState::Done);
    }

    fn on_rejected(&mut self, message: String) {
        if self.session.state != SessionState::Idle {
            tracing::debug!("Ignoring rejection in state {}", self.session.state);
            return;
        }
        self.fail(LaunchError::ConfigInvalid(message));
        self.session.outcome = Some(SessionOutcome::Failed);
        self.transition(SessionState::Failed);
    }

    fn on_submit(&mut self, now: DateTime<Utc>) {
        if self.session.state != SessionState::Idle {
            tracing::debug!("Ignoring submit in state {}", self.session.state);
            return;
        }
        self.session.submitted_at = Some(now);
        self.session.outcome = None;
        self.transition(SessionState::Submitted);
        self.act(Action::SubmitJob(Box::new(self.session.job.clone())));
    }

    fn on_submitted(&mut self, job_id: u64) {
        match self.session.state {
            SessionState::Submitted => {
                self.session.job.id = Some(job_id);
                self.transition(SessionState::Queued);
                self.notify(Notification::Submitted { job_id });
                self.act(Action::StartPolling);
            }
            SessionState::Terminating => {
                // cancelled while sbatch was running
                tracing::info!("Cancelling job {} submitted after cancel", job_id);
                self.session.job.id = Some(job_id);
                self.act(Action::CancelJob { job_id });
                self.act(Action::StartPolling);
            }
            state => tracing::warn!("Unexpected job id {} in state {}", job_id, state),
        }
    }

    fn on_submit_failed(&mut self, message: String) {
        match self.session.state {
            SessionState::Submitted => {
                self.fail(LaunchError::SubmitFailed(message));
                self.transition(SessionState::Idle);
            }
            SessionState::Terminating if self.session.job.id.is_none() => self.finish(),
            _ => {}
        }
    }

    fn on_unavailable(&mut self, message: String) {
        match self.session.state {
            SessionState::Submitted => {
                self.fail(LaunchError::ScheduleUnavailable(message));
                self.session.outcome = Some(SessionOutcome::Failed);
                self.transition(SessionState::Failed);
            }
            SessionState::Terminating if self.session.job.id.is_none() => self.finish(),
            _ => {}
        }
    }

    fn on_status(&mut self, report: Option<JobStatusReport>, now: DateTime<Utc>) {
        let state = self.session.state;
        if self.session.job.id.is_none() || !(state.is_active() || state == SessionState::Terminating)
        {
            return;
        }
        self.session.ticks += 1;
        self.session.last_status_at = Some(now);

        let Some(report) = report else {
            if state == SessionState::Terminating {
                self.finish();
                return;
            }
            self.session.missing_polls += 1;
            if self.session.missing_polls >= MAX_MISSING_POLLS {
                tracing::info!("Job {:?} left the queue", self.session.job.id);
                self.finish();
            }
            return;
        };
        self.session.missing_polls = 0;
        if state == SessionState::Terminating {
            return;
        }

        report.apply_to(&mut self.session.job);
        let started = state == SessionState::Queued && report.is_running();
        if started {
            self.start(now);
        }
        if !self.session.state.holds_allocation() {
            return;
        }

        if let Some(percent) = self.session.job.progress() {
            let percent = self.session.update_progress(percent);
            self.notify(Notification::Progress { percent });
        }
        if self.session.is_expired(now) {
            self.fail(LaunchError::Expired);
            self.teardown(SessionOutcome::Expired);
            return;
        }
        if !started {
            self.poll_watchers();
        }
    }

    /// Allocation granted: start whatever the job kind needs.
    fn start(&mut self, now: DateTime<Utc>) {
        let Some(job_id) = self.session.job.id else {
            return;
        };
        self.session.started_at = Some(now);
        let remaining = self.session.job.time_left.unwrap_or(self.session.job.walltime);
        self.session.deadline = chrono::Duration::from_std(remaining)
            .ok()
            .and_then(|remaining| now.checked_add_signed(remaining));

        self.transition(SessionState::Running);
        self.notify(Notification::Started {
            job_id,
            nodes: self.session.job.allocated_nodes.clone(),
        });

        if self.session.job.kind.watches_vm_host() {
            self.act(Action::CheckVmHost { job_id });
        } else if self.session.url_watcher.is_some() {
            self.act(Action::ReadOutput { job_id });
        } else if self.session.request.kind == AppKind::Graphical {
            let Some(host) = self.session.host().map(str::to_string) else {
                self.fail(LaunchError::RemoteFailed {
                    attempts: 0,
                    message: "no node allocated".to_string(),
                });
                self.teardown(SessionOutcome::Failed);
                return;
            };
            let command = self.session.request.command.clone().unwrap_or_default();
            self.act(Action::SpawnRemote {
                host,
                command,
                graphics: self.session.request.graphics,
            });
            self.transition(SessionState::Connecting);
        }
    }

    /// Per-tick follow-ups of the current state.
    fn poll_watchers(&mut self) {
        let Some(job_id) = self.session.job.id else {
            return;
        };
        match self.session.state {
            SessionState::Running => {
                if self.session.job.kind.watches_vm_host() {
                    self.act(Action::CheckVmHost { job_id });
                } else if self.session.url_watcher.is_some() && self.session.pending_url.is_none()
                {
                    self.act(Action::ReadOutput { job_id });
                }
            }
            SessionState::Connecting | SessionState::Connected | SessionState::VmReady => {
                self.act(Action::CheckRemote);
            }
            SessionState::NotebookReady if self.session.tunnel_port.is_some() => {
                self.act(Action::CheckTunnel);
            }
            _ => {}
        }
    }

    fn on_job_gone(&mut self) {
        let state = self.session.state;
        if state == SessionState::Terminating || (state.is_active() && self.session.job.id.is_some())
        {
            self.finish();
        }
    }

    fn on_output(&mut self, lines: &[String]) {
        if self.session.state != SessionState::Running || self.session.pending_url.is_some() {
            return;
        }
        let Some(watcher) = self.session.url_watcher.as_mut() else {
            return;
        };
        let Some(url) = watcher.feed(lines) else {
            return;
        };
        tracing::info!("Notebook server at {}", url.url);

        if !self.session.job.kind.binds_localhost() {
            self.notebook_ready(url.url);
            return;
        }
        let Some(via) = self.session.host().map(str::to_string) else {
            self.fail(LaunchError::RemoteFailed {
                attempts: 0,
                message: "no node to tunnel through".to_string(),
            });
            self.teardown(SessionOutcome::Failed);
            return;
        };
        let remote_port = url.port.unwrap_or(DEFAULT_NOTEBOOK_PORT);
        self.session.pending_url = Some(url);
        self.act(Action::OpenTunnel { via, remote_port });
    }

    fn notebook_ready(&mut self, url: String) {
        self.session.url = Some(url.clone());
        self.transition(SessionState::NotebookReady);
        self.act(Action::OpenBrowser { url: url.clone() });
        self.notify(Notification::NotebookReady { url });
    }

    fn on_tunnel_opened(&mut self, local_port: u16) {
        if self.session.state != SessionState::Running {
            self.act(Action::TerminateTunnel);
            return;
        }
        let Some(url) = self.session.pending_url.take() else {
            return;
        };
        self.session.tunnel_port = Some(local_port);
        self.notebook_ready(url.through_local_port(local_port));
    }

    fn on_tunnel_failed(&mut self, message: String) {
        match self.session.state {
            SessionState::Running | SessionState::NotebookReady => {
                self.fail(LaunchError::RemoteFailed {
                    attempts: 0,
                    message,
                });
                self.teardown(SessionOutcome::Failed);
            }
            _ => {}
        }
    }

    fn on_vm_host(&mut self, content: &str) {
        if self.session.state != SessionState::Running
            || !self.session.job.kind.watches_vm_host()
        {
            return;
        }
        match VmHost::parse(content) {
            None => {}
            Some(VmHost::Ready(host)) => {
                self.session.vm_host = Some(host.clone());
                self.transition(SessionState::VmReady);
                self.act(Action::LaunchDesktop { host: host.clone() });
                self.notify(Notification::VmReady { host });
            }
            Some(VmHost::AllocationError) => {
                self.fail(LaunchError::VmAllocationFailed(VmFailure::AllocationError));
                self.teardown(SessionOutcome::Failed);
            }
            Some(VmHost::NoSessionAvailable) => {
                self.fail(LaunchError::VmAllocationFailed(
                    VmFailure::NoSessionAvailable,
                ));
                self.teardown(SessionOutcome::Failed);
            }
        }
    }

    fn on_remote(&mut self, status: RemoteStatus) {
        if !self.session.state.has_remote() {
            return;
        }
        match status {
            RemoteStatus::Running => {
                if self.session.state == SessionState::Connecting {
                    let host = self.session.host().unwrap_or_default().to_string();
                    self.transition(SessionState::Connected);
                    self.notify(Notification::Connected { host });
                }
            }
            RemoteStatus::Exited { success: true } => {
                tracing::info!("Remote application closed, ending session");
                self.teardown(SessionOutcome::Completed);
            }
            RemoteStatus::Exited { success: false } => {
                self.remote_died("remote process exited with an error".to_string());
            }
            RemoteStatus::NotStarted => {
                self.remote_died("remote process is not running".to_string());
            }
        }
    }

    fn on_remote_failed(&mut self, message: String) {
        if self.session.state.has_remote() {
            self.remote_died(message);
        }
    }

    fn remote_died(&mut self, message: String) {
        if self.session.retries < MAX_RETRIES {
            self.session.retries += 1;
            let attempt = self.session.retries;
            tracing::info!("Remote died ({}), restart {}", message, attempt);
            self.notify(Notification::Reconnecting { attempt });
            self.act(Action::RetryRemote);
            if self.session.state == SessionState::Connected {
                self.transition(SessionState::Connecting);
            }
        } else {
            self.fail(LaunchError::RemoteFailed {
                attempts: self.session.retries,
                message,
            });
            self.teardown(SessionOutcome::Failed);
        }
    }

    fn on_cancel(&mut self) {
        let state = self.session.state;
        if state == SessionState::Idle {
            self.session.outcome = Some(SessionOutcome::Cancelled);
            self.transition(SessionState::Done);
        } else if state.is_active() {
            tracing::info!("Cancelling session in state {}", state);
            self.teardown(SessionOutcome::Cancelled);
        } else {
            tracing::debug!("Cancel ignored in state {}", state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lhpc_core::{LaunchConfig, StateDir};
    use lhpc_jobs::{JobKind, NotebookSpec, SessionRequest, Walltime};
    use std::time::Duration;

    fn mins(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn report(state: &str, nodes: &[&str], left: Duration, running: Duration) -> JobStatusReport {
        JobStatusReport {
            state: state.to_string(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            time_left: Some(left),
            time_running: Some(running),
            time_limit: Some(left + running),
        }
    }

    fn machine(request: SessionRequest, kind: JobKind) -> SessionMachine {
        let job = Job::from_request(&request, kind, &StateDir::new("/home/alice/.lhpc"));
        SessionMachine::new(Session::new(request, job))
    }

    fn graphical() -> SessionMachine {
        let mut request = SessionRequest::new(AppKind::Graphical, "00:30:00".parse().unwrap());
        request.partition = Some("lu32".to_string());
        request.features = vec!["mem64gb".to_string()];
        request.command = Some("xterm".to_string());
        machine(request, JobKind::Placeholder)
    }

    fn notebook(config: &LaunchConfig) -> SessionMachine {
        let request = SessionRequest::new(AppKind::Notebook, Walltime::default());
        machine(request, JobKind::Notebook(NotebookSpec::notebook(config)))
    }

    fn vm() -> SessionMachine {
        let request = SessionRequest::new(AppKind::RemoteDesktopVm, Walltime::default());
        machine(request, JobKind::RemoteDesktopVm)
    }

    /// Submit, assign `job_id` and report the job running on `node`.
    fn start(machine: &mut SessionMachine, job_id: u64, node: &str) -> Vec<Action> {
        let now = Utc::now();
        machine.handle(Event::Submit, now);
        machine.handle(Event::Submitted { job_id }, now);
        machine.handle(
            Event::Status(Some(report("R", &[node], mins(29), mins(1)))),
            now,
        )
    }

    fn notifications(actions: &[Action]) -> Vec<&Notification> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Notify(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    fn has_error(actions: &[Action], error: &LaunchError) -> bool {
        notifications(actions)
            .iter()
            .any(|n| **n == Notification::Error(error.clone()))
    }

    #[test]
    fn test_graphical_happy_path() {
        let mut machine = graphical();
        let now = Utc::now();

        let actions = machine.handle(Event::Submit, now);
        assert_eq!(machine.state(), SessionState::Submitted);
        let Some(Action::SubmitJob(job)) = actions.iter().find(|a| matches!(a, Action::SubmitJob(_)))
        else {
            panic!("no submit action in {actions:?}");
        };
        let script = job.script();
        assert!(script.contains(&"#SBATCH -p lu32".to_string()));
        assert!(script.contains(&"#SBATCH --constraint=mem64gb".to_string()));
        assert!(script.contains(&"#SBATCH --time=00:30:00".to_string()));

        let actions = machine.handle(Event::Submitted { job_id: 4242 }, now);
        assert!(actions.contains(&Action::StartPolling));
        assert_eq!(machine.state(), SessionState::Queued);

        let pending = report("PD", &[], mins(30), Duration::ZERO);
        assert!(
            !machine
                .handle(Event::Status(Some(pending)), now)
                .iter()
                .any(|a| matches!(a, Action::SpawnRemote { .. }))
        );
        assert_eq!(machine.state(), SessionState::Queued);

        let actions = machine.handle(
            Event::Status(Some(report("R", &["cn03"], mins(29), mins(1)))),
            now,
        );
        assert!(actions.contains(&Action::SpawnRemote {
            host: "cn03".to_string(),
            command: "xterm".to_string(),
            graphics: GraphicsMode::Plain,
        }));
        assert_eq!(machine.state(), SessionState::Connecting);
        assert!(actions.contains(&Action::Notify(Notification::Progress { percent: 3 })));

        machine.handle(Event::Remote(RemoteStatus::Running), now);
        assert_eq!(machine.state(), SessionState::Connected);

        let actions = machine.handle(Event::Remote(RemoteStatus::Exited { success: true }), now);
        assert!(actions.contains(&Action::CancelJob { job_id: 4242 }));
        assert!(actions.contains(&Action::TerminateRemote));
        assert_eq!(machine.state(), SessionState::Terminating);

        machine.handle(Event::Status(None), now);
        assert_eq!(machine.state(), SessionState::Done);
        assert_eq!(machine.session().outcome, Some(SessionOutcome::Completed));
    }

    #[test]
    fn test_notebook_url_discovery() {
        let mut machine = notebook(&LaunchConfig::default());
        let actions = start(&mut machine, 77, "cn05");
        assert!(actions.contains(&Action::ReadOutput { job_id: 77 }));
        assert_eq!(machine.state(), SessionState::Running);

        let mut output = vec![
            "[I 10:01:02 NotebookApp] Serving notebooks".to_string(),
            "    http://127.0.0.1:8891/lab?token=abcd1234".to_string(),
        ];
        let actions = machine.handle(Event::Output(output.clone()), Utc::now());
        assert!(actions.is_empty());

        output.push("    http://cn05:8891/lab?token=abcd1234".to_string());
        let actions = machine.handle(Event::Output(output.clone()), Utc::now());
        let url = "http://cn05:8891/lab?token=abcd1234".to_string();
        assert!(actions.contains(&Action::OpenBrowser { url: url.clone() }));
        assert!(actions.contains(&Action::Notify(Notification::NotebookReady { url })));
        assert_eq!(machine.state(), SessionState::NotebookReady);

        // fires once
        let actions = machine.handle(Event::Output(output), Utc::now());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_localhost_notebook_goes_through_tunnel() {
        let config = LaunchConfig {
            jupyter_use_localhost: true,
            ..LaunchConfig::default()
        };
        let mut machine = notebook(&config);
        start(&mut machine, 78, "cn05");

        let output = vec!["    http://localhost:8888/lab?token=abc".to_string()];
        let actions = machine.handle(Event::Output(output), Utc::now());
        assert_eq!(
            actions,
            vec![Action::OpenTunnel {
                via: "cn05".to_string(),
                remote_port: 8888,
            }]
        );
        assert_eq!(machine.state(), SessionState::Running);

        let actions = machine.handle(Event::TunnelOpened { local_port: 40123 }, Utc::now());
        assert!(actions.contains(&Action::OpenBrowser {
            url: "http://localhost:40123/lab?token=abc".to_string()
        }));
        assert_eq!(machine.session().tunnel_port, Some(40123));
        assert_eq!(machine.state(), SessionState::NotebookReady);

        // the tunnel is what gets checked from now on
        let actions = machine.handle(
            Event::Status(Some(report("R", &["cn05"], mins(28), mins(2)))),
            Utc::now(),
        );
        assert!(actions.contains(&Action::CheckTunnel));
    }

    #[test]
    fn test_vm_sentinels() {
        let cases = [
            ("0.0.0.1\n", VmFailure::NoSessionAvailable),
            ("0.0.0.0\n", VmFailure::AllocationError),
        ];
        for (content, failure) in cases {
            let mut machine = vm();
            let actions = start(&mut machine, 12345, "vmhost01");
            assert!(actions.contains(&Action::CheckVmHost { job_id: 12345 }));

            let actions = machine.handle(Event::VmHostFile(content.to_string()), Utc::now());
            assert!(has_error(&actions, &LaunchError::VmAllocationFailed(failure)));
            assert!(actions.contains(&Action::CancelJob { job_id: 12345 }));
            assert_eq!(machine.state(), SessionState::Terminating);
        }

        let mut machine = vm();
        start(&mut machine, 12345, "vmhost01");
        assert!(machine.handle(Event::VmHostFile(String::new()), Utc::now()).is_empty());
        let actions = machine.handle(Event::VmHostFile("win10-vm07\n".to_string()), Utc::now());
        assert!(actions.contains(&Action::LaunchDesktop {
            host: "win10-vm07".to_string()
        }));
        assert_eq!(machine.state(), SessionState::VmReady);
        assert_eq!(machine.session().vm_host.as_deref(), Some("win10-vm07"));
    }

    #[test]
    fn test_remote_retry_cap() {
        let mut machine = graphical();
        start(&mut machine, 9, "cn03");
        machine.handle(Event::Remote(RemoteStatus::Running), Utc::now());

        for attempt in 1..=MAX_RETRIES {
            let actions = machine.handle(
                Event::Remote(RemoteStatus::Exited { success: false }),
                Utc::now(),
            );
            assert!(actions.contains(&Action::RetryRemote), "attempt {attempt}");
            assert!(!actions.iter().any(|a| matches!(a, Action::CancelJob { .. })));
            assert_eq!(machine.session().retries, attempt);
            assert_eq!(machine.state(), SessionState::Connecting);
        }

        let actions = machine.handle(
            Event::Remote(RemoteStatus::Exited { success: false }),
            Utc::now(),
        );
        assert!(!actions.contains(&Action::RetryRemote));
        assert!(actions.contains(&Action::CancelJob { job_id: 9 }));
        assert_eq!(machine.state(), SessionState::Terminating);
        assert_eq!(machine.session().outcome, Some(SessionOutcome::Failed));
    }

    #[test]
    fn test_progress_is_bounded_and_monotone() {
        let mut machine = vm();
        start(&mut machine, 5, "vmhost01");

        let samples = [(29, 1), (20, 10), (25, 5), (1, 29), (1, 45)];
        let mut last = 0;
        for (left, running) in samples {
            let actions = machine.handle(
                Event::Status(Some(report("R", &["vmhost01"], mins(left), mins(running)))),
                Utc::now(),
            );
            for notification in notifications(&actions) {
                if let Notification::Progress { percent } = notification {
                    assert!(*percent <= 100);
                    assert!(*percent >= last);
                    last = *percent;
                }
            }
        }
        assert!(last >= 97);
    }

    #[test]
    fn test_expiry_cancels_job() {
        let mut machine = graphical();
        start(&mut machine, 11, "cn03");
        let actions = machine.handle(
            Event::Status(Some(report("R", &["cn03"], Duration::ZERO, mins(30)))),
            Utc::now(),
        );
        assert!(has_error(&actions, &LaunchError::Expired));
        assert!(actions.contains(&Action::CancelJob { job_id: 11 }));
        assert_eq!(machine.session().outcome, Some(SessionOutcome::Expired));

        let mut machine = vm();
        start(&mut machine, 12, "vmhost01");
        let later = Utc::now() + chrono::Duration::hours(2);
        let actions = machine.handle(
            Event::Status(Some(report("R", &["vmhost01"], mins(5), mins(25)))),
            later,
        );
        assert!(has_error(&actions, &LaunchError::Expired));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut machine = graphical();
        start(&mut machine, 21, "cn03");

        let actions = machine.handle(Event::Cancel, Utc::now());
        assert!(actions.contains(&Action::CancelJob { job_id: 21 }));
        assert_eq!(machine.state(), SessionState::Terminating);

        assert!(machine.handle(Event::Cancel, Utc::now()).is_empty());
        assert_eq!(machine.state(), SessionState::Terminating);

        // nothing but confirmed absence moves a terminating session
        let running = report("R", &["cn03"], mins(20), mins(10));
        assert!(
            machine
                .handle(Event::Status(Some(running)), Utc::now())
                .is_empty()
        );
        assert!(
            machine
                .handle(Event::Remote(RemoteStatus::Running), Utc::now())
                .is_empty()
        );
        machine.handle(Event::Status(None), Utc::now());
        assert_eq!(machine.state(), SessionState::Done);
        assert!(machine.handle(Event::Cancel, Utc::now()).is_empty());
        assert_eq!(machine.session().outcome, Some(SessionOutcome::Cancelled));
    }

    #[test]
    fn test_job_id_after_cancel_is_cancelled() {
        let mut machine = graphical();
        machine.handle(Event::Submit, Utc::now());
        machine.handle(Event::Cancel, Utc::now());
        assert_eq!(machine.state(), SessionState::Terminating);

        let actions = machine.handle(Event::Submitted { job_id: 31 }, Utc::now());
        assert!(actions.contains(&Action::CancelJob { job_id: 31 }));
        assert_eq!(machine.state(), SessionState::Terminating);
        machine.handle(Event::Status(None), Utc::now());
        assert_eq!(machine.state(), SessionState::Done);
    }

    #[test]
    fn test_submit_failures() {
        let mut machine = graphical();
        machine.handle(Event::Submit, Utc::now());
        let actions = machine.handle(
            Event::SubmitFailed {
                message: "invalid account".to_string(),
            },
            Utc::now(),
        );
        assert!(has_error(
            &actions,
            &LaunchError::SubmitFailed("invalid account".to_string())
        ));
        assert_eq!(machine.state(), SessionState::Idle);

        // a new attempt is allowed
        machine.handle(Event::Submit, Utc::now());
        assert_eq!(machine.state(), SessionState::Submitted);
        machine.handle(
            Event::Unavailable {
                message: "sbatch not found".to_string(),
            },
            Utc::now(),
        );
        assert_eq!(machine.state(), SessionState::Failed);
    }

    #[test]
    fn test_rejected_request_fails_session() {
        let mut machine = graphical();
        let actions = machine.handle(
            Event::NotEntitled {
                user: "bob".to_string(),
            },
            Utc::now(),
        );
        assert!(has_error(
            &actions,
            &LaunchError::NotEntitled {
                user: "bob".to_string()
            }
        ));
        assert_eq!(machine.state(), SessionState::Idle);

        let actions = machine.handle(
            Event::Rejected {
                message: "no command".to_string(),
            },
            Utc::now(),
        );
        assert!(has_error(
            &actions,
            &LaunchError::ConfigInvalid("no command".to_string())
        ));
        assert!(!actions.iter().any(|a| matches!(a, Action::SubmitJob(_))));
        assert_eq!(machine.state(), SessionState::Failed);
        assert_eq!(machine.session().outcome, Some(SessionOutcome::Failed));

        machine.handle(Event::Submit, Utc::now());
        assert_eq!(machine.state(), SessionState::Failed);
    }

    #[test]
    fn test_job_leaving_queue_ends_session() {
        let mut machine = graphical();
        start(&mut machine, 41, "cn03");
        machine.handle(Event::Remote(RemoteStatus::Running), Utc::now());

        for _ in 1..MAX_MISSING_POLLS {
            machine.handle(Event::Status(None), Utc::now());
            assert_eq!(machine.state(), SessionState::Connected);
        }
        let actions = machine.handle(Event::Status(None), Utc::now());
        assert!(actions.contains(&Action::TerminateRemote));
        assert_eq!(machine.state(), SessionState::Done);
    }

    #[test]
    fn test_autostart_flag() {
        let mut request = SessionRequest::new(AppKind::Graphical, Walltime::default());
        request.command = Some("xterm".to_string());
        request.autostart = true;
        let mut machine = machine(request, JobKind::Placeholder);
        assert!(machine.wants_autostart());
        machine.handle(Event::Submit, Utc::now());
        assert!(!machine.wants_autostart());
    }
}
