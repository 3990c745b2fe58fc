//! Async driver for a [`SessionMachine`].
//!
//! One task owns the machine. Scheduler calls run in worker tasks and post
//! their results back; everything else happens inline between events.

use crate::machine::{Action, Event, SessionMachine};
use crate::notify::Notification;
use crate::session::Session;
use chrono::Utc;
use lhpc_core::LaunchConfig;
use lhpc_jobs::{GraphicsMode, Job};
use lhpc_remote::{
    Connection, DesktopClient, ForwardTunnel, GraphicsForward, Remote, RemoteError, SecureShell,
    TunnelEndpoint,
};
use lhpc_runs::{RunStore, SessionRecord};
use lhpc_slurm::{JobStatusReport, SlurmClient, SlurmError, StartOutcome, cancelled};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval, sleep};

/// Opens a URL in the user's browser.
pub type UrlOpener = Box<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Timing of the runner.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Interval of status polls while the job exists.
    pub status_interval: Duration,
    /// Interval of polls while waiting for the job to start.
    pub start_interval: Duration,
    /// Delay before an autostart request is submitted.
    pub autostart_grace: Duration,
    /// How long to wait for a tunnel to accept connections.
    pub tunnel_timeout: Duration,
    /// How long sbatch may still run after a cancel, so that a job it
    /// created can be cancelled too.
    pub submit_grace: Duration,
    /// Run remote commands on this machine (testing without a cluster).
    pub local_only: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(5),
            start_interval: Duration::from_secs(1),
            autostart_grace: Duration::from_secs(2),
            tunnel_timeout: Duration::from_secs(15),
            submit_grace: Duration::from_secs(10),
            local_only: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Submit,
    Cancel,
}

/// Front-end side of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    control: mpsc::UnboundedSender<Control>,
    cancel: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn submit(&self) {
        let _ = self.control.send(Control::Submit);
    }

    /// Cancel the session, interrupting any scheduler call in flight.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
        let _ = self.control.send(Control::Cancel);
    }
}

/// Results posted by worker tasks.
enum Completion {
    Worker(Event),
    Poll(Result<Option<JobStatusReport>, SlurmError>),
}

pub struct SessionRunner {
    machine: SessionMachine,
    client: Arc<SlurmClient>,
    config: Arc<LaunchConfig>,
    options: RunnerOptions,
    notifications: mpsc::UnboundedSender<Notification>,
    control: mpsc::UnboundedReceiver<Control>,
    cancel: watch::Receiver<bool>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    remote: Option<Connection>,
    tunnel: Option<ForwardTunnel>,
    store: Option<RunStore>,
    record: Option<SessionRecord>,
    opener: Option<UrlOpener>,
    polling: bool,
    poll_in_flight: bool,
    warnings: Vec<Event>,
}

impl SessionRunner {
    pub fn new(
        session: Session,
        client: Arc<SlurmClient>,
        config: Arc<LaunchConfig>,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<Notification>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let runner = Self {
            machine: SessionMachine::new(session),
            client,
            config,
            options: RunnerOptions::default(),
            notifications: notify_tx,
            control: control_rx,
            cancel: cancel_rx,
            completions_tx,
            completions,
            remote: None,
            tunnel: None,
            store: None,
            record: None,
            opener: None,
            polling: false,
            poll_in_flight: false,
            warnings: Vec::new(),
        };
        let handle = SessionHandle {
            control: control_tx,
            cancel: Arc::new(cancel_tx),
        };
        (runner, handle, notify_rx)
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    /// Record the session in a history log.
    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_opener(mut self, opener: UrlOpener) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Warn on start that `user` has no active project.
    pub fn with_not_entitled(mut self, user: impl Into<String>) -> Self {
        self.warnings.push(Event::NotEntitled { user: user.into() });
        self
    }

    /// Start the runner in the background.
    pub fn start(self) -> tokio::task::JoinHandle<Session> {
        tokio::spawn(self.run())
    }

    /// Drive the session until it is done or failed.
    pub async fn run(mut self) -> Session {
        for warning in std::mem::take(&mut self.warnings) {
            self.dispatch(warning).await;
        }
        if let Err(e) = self.machine.session().request.validate(&self.config) {
            self.dispatch(Event::Rejected {
                message: e.to_string(),
            })
            .await;
        }

        let mut ticker = interval(self.options.status_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let autostart = sleep(self.options.autostart_grace);
        tokio::pin!(autostart);
        let mut autostart_pending = self.machine.wants_autostart();
        let mut control_open = true;

        while !self.machine.state().is_terminal() {
            let event = tokio::select! {
                control = self.control.recv(), if control_open => match control {
                    Some(Control::Submit) => Event::Submit,
                    Some(Control::Cancel) => Event::Cancel,
                    None => {
                        // every handle is gone
                        control_open = false;
                        Event::Cancel
                    }
                },
                Some(completion) = self.completions.recv() => match completion {
                    Completion::Worker(event) => event,
                    Completion::Poll(result) => {
                        self.poll_in_flight = false;
                        match result {
                            Ok(report) => Event::Status(report),
                            Err(e) => {
                                tracing::error!("Error polling job status: {}", e);
                                continue;
                            }
                        }
                    }
                },
                _ = &mut autostart, if autostart_pending => {
                    autostart_pending = false;
                    Event::Submit
                }
                _ = ticker.tick(), if self.polling && !self.poll_in_flight => {
                    self.spawn_status_poll();
                    continue;
                }
            };
            self.dispatch(event).await;
        }

        self.close_remotes();
        self.machine.into_session()
    }

    /// Handle one event and every follow-up event its actions produce.
    async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for action in self.machine.handle(event, Utc::now()) {
                if let Some(follow_up) = self.perform(action).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn perform(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::SubmitJob(job) => {
                self.spawn_submit(*job);
                None
            }
            Action::StartPolling => {
                self.polling = true;
                None
            }
            Action::ReadOutput { .. } => {
                match self.client.job_output(&self.machine.session().job).await {
                    Ok(lines) => Some(Event::Output(lines)),
                    Err(e) => {
                        tracing::warn!("Failed to read job output: {}", e);
                        None
                    }
                }
            }
            Action::CheckVmHost { job_id } => {
                let path = self.client.state_dir().vm_host_file(job_id);
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => Some(Event::VmHostFile(content)),
                    Err(e) if e.kind() == ErrorKind::NotFound => None,
                    Err(e) => {
                        tracing::warn!("Failed to read {}: {}", path, e);
                        None
                    }
                }
            }
            Action::SpawnRemote {
                host,
                command,
                graphics,
            } => {
                let connection = self.graphical_connection(graphics);
                Some(self.execute(connection, &host, &command))
            }
            Action::LaunchDesktop { host } => {
                let connection = Connection::new(DesktopClient::new(
                    self.config.xfreerdp_path.clone(),
                ));
                Some(self.execute(connection, &host, ""))
            }
            Action::CheckRemote => self.remote.as_mut().map(|r| Event::Remote(r.status())),
            Action::RetryRemote => {
                let Some(remote) = self.remote.as_mut() else {
                    return Some(Event::RemoteFailed {
                        message: RemoteError::NothingToRepeat.to_string(),
                    });
                };
                match remote.execute_again() {
                    Ok(()) => Some(Event::Remote(remote.status())),
                    Err(e) => Some(Event::RemoteFailed {
                        message: e.to_string(),
                    }),
                }
            }
            Action::OpenTunnel { via, remote_port } => Some(self.open_tunnel(via, remote_port).await),
            Action::CheckTunnel => match self.tunnel.as_mut().map(|tunnel| tunnel.is_active()) {
                Some(false) => Some(Event::TunnelFailed {
                    message: RemoteError::TunnelClosed.to_string(),
                }),
                _ => None,
            },
            Action::OpenBrowser { url } => {
                if let Some(opener) = &self.opener {
                    if let Err(e) = opener(&url) {
                        tracing::warn!("Failed to open browser for {}: {}", url, e);
                    }
                }
                None
            }
            Action::CancelJob { job_id } => {
                if let Err(e) = self.client.cancel_by_id(job_id).await {
                    tracing::error!("Failed to cancel job {}: {}", job_id, e);
                }
                None
            }
            Action::TerminateRemote => {
                if let Some(mut remote) = self.remote.take() {
                    remote.terminate();
                }
                None
            }
            Action::TerminateTunnel => {
                if let Some(mut tunnel) = self.tunnel.take() {
                    tunnel.terminate();
                }
                None
            }
            Action::Notify(notification) => {
                self.record(&notification);
                let _ = self.notifications.send(notification);
                None
            }
        }
    }

    fn graphical_connection(&self, graphics: GraphicsMode) -> Connection {
        match graphics {
            GraphicsMode::Plain => Connection::new(
                SecureShell::interactive(self.config.ssh_path.clone())
                    .local_only(self.options.local_only),
            ),
            GraphicsMode::Tunneled => {
                Connection::new(GraphicsForward::new(self.config.vglconnect_path()))
            }
            GraphicsMode::VglRun => Connection::new(
                GraphicsForward::new(self.config.vglconnect_path())
                    .with_vglrun(self.config.vglrun_path()),
            ),
        }
    }

    /// Start `connection` and keep it as the monitored remote.
    fn execute(&mut self, mut connection: Connection, host: &str, command: &str) -> Event {
        if let Some(mut previous) = self.remote.take() {
            previous.terminate();
        }
        let event = match connection.execute(host, command) {
            Ok(()) => Event::Remote(connection.status()),
            Err(e) => Event::RemoteFailed {
                message: e.to_string(),
            },
        };
        self.remote = Some(connection);
        event
    }

    async fn open_tunnel(&mut self, via: String, remote_port: u16) -> Event {
        let mut tunnel = ForwardTunnel::new(self.config.ssh_path.clone());
        let endpoint = TunnelEndpoint {
            via,
            remote_host: "localhost".to_string(),
            remote_port,
        };
        let local_port = match tunnel.open(endpoint) {
            Ok(port) => port,
            Err(e) => {
                return Event::TunnelFailed {
                    message: e.to_string(),
                };
            }
        };

        let mut cancel = self.cancel.clone();
        let ready = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Err(RemoteError::TunnelClosed),
            ready = tunnel.wait_until_listening(self.options.tunnel_timeout) => ready,
        };
        match ready {
            Ok(()) => {
                self.tunnel = Some(tunnel);
                Event::TunnelOpened { local_port }
            }
            Err(e) => {
                tunnel.terminate();
                Event::TunnelFailed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Submit, then follow the job until it starts.
    fn spawn_submit(&self, mut job: Job) {
        let client = Arc::clone(&self.client);
        let completions = self.completions_tx.clone();
        let mut cancel = self.cancel.clone();
        let start_interval = self.options.start_interval;
        let submit_grace = self.options.submit_grace;

        tokio::spawn(async move {
            let result = {
                let submit = client.submit(&mut job);
                tokio::pin!(submit);
                let result = tokio::select! {
                    biased;
                    result = &mut submit => Some(result),
                    _ = cancelled(&mut cancel) => None,
                };
                match result {
                    Some(result) => Some(result),
                    // sbatch may already have queued the job
                    None => tokio::time::timeout(submit_grace, &mut submit).await.ok(),
                }
            };
            let submitted = match result {
                None => Event::SubmitFailed {
                    message: "cancelled before submission".to_string(),
                },
                Some(Ok(job_id)) => Event::Submitted { job_id },
                Some(Err(e @ SlurmError::Unavailable { .. })) => Event::Unavailable {
                    message: e.to_string(),
                },
                Some(Err(e)) => Event::SubmitFailed {
                    message: e.to_string(),
                },
            };
            let ok = matches!(submitted, Event::Submitted { .. });
            if completions.send(Completion::Worker(submitted)).is_err() || !ok {
                return;
            }

            let event = match client
                .wait_for_start(&mut job, &mut cancel, start_interval)
                .await
            {
                Ok(StartOutcome::Running) => Event::Status(Some(JobStatusReport {
                    state: job.status.clone(),
                    nodes: job.allocated_nodes.clone(),
                    time_left: job.time_left,
                    time_running: job.time_running,
                    time_limit: job.time_limit,
                })),
                Ok(StartOutcome::Gone) => Event::JobGone,
                Ok(StartOutcome::Cancelled) => return,
                Err(e) => {
                    tracing::warn!("Waiting for job start failed: {}", e);
                    return;
                }
            };
            let _ = completions.send(Completion::Worker(event));
        });
    }

    fn spawn_status_poll(&mut self) {
        let Some(job_id) = self.machine.session().job_id() else {
            return;
        };
        self.poll_in_flight = true;
        let client = Arc::clone(&self.client);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = client.query_status(job_id).await;
            let _ = completions.send(Completion::Poll(result));
        });
    }

    /// Append the session to the history log when something worth keeping
    /// happened.
    fn record(&mut self, notification: &Notification) {
        let Some(store) = &self.store else {
            return;
        };
        let session = self.machine.session();
        match notification {
            Notification::Submitted { job_id } => {
                let mut record =
                    SessionRecord::new(*job_id, session.job.kind.key(), session.job.name.clone());
                record.partition = session.job.partition.clone();
                self.record = Some(record);
            }
            Notification::Started { nodes, .. } => {
                if let Some(record) = self.record.as_mut() {
                    record.host = nodes.first().cloned();
                }
            }
            Notification::NotebookReady { url } => {
                if let Some(record) = self.record.as_mut() {
                    record.url = Some(url.clone());
                }
            }
            Notification::VmReady { host } => {
                if let Some(record) = self.record.as_mut() {
                    record.vm_host = Some(host.clone());
                }
            }
            Notification::StateChanged { to, .. } if to.is_terminal() => {
                let outcome = session.outcome.unwrap_or_default();
                if let Some(record) = self.record.as_mut() {
                    record.finish(outcome);
                }
            }
            _ => return,
        }
        if let Some(record) = &self.record {
            if let Err(e) = store.append(record) {
                tracing::warn!("Failed to record session: {}", e);
            }
        }
    }

    fn close_remotes(&mut self) {
        if let Some(mut remote) = self.remote.take() {
            remote.terminate();
        }
        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.terminate();
        }
    }
}
