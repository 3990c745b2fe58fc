//! Plain terminal front-end for a running session.

use lhpc_parsers::compress_hostlist;
use lhpc_session::{LaunchError, Notification, SessionHandle};
use tokio::signal::ctrl_c;
use tokio::sync::mpsc::UnboundedReceiver;

/// One line of console output for a notification, if it is worth showing.
pub fn describe(notification: &Notification) -> Option<String> {
    let line = match notification {
        Notification::StateChanged { .. } => return None,
        Notification::Submitted { job_id } => format!("Submitted job {job_id}"),
        Notification::Started { job_id, nodes } => {
            format!("Job {job_id} running on {}", compress_hostlist(nodes))
        }
        Notification::Progress { percent } => format!("Time used: {percent}%"),
        Notification::Connected { host } => format!("Connected to {host}"),
        Notification::Reconnecting { attempt } => {
            format!("Connection lost, restarting (attempt {attempt})")
        }
        Notification::NotebookReady { url } => format!("Notebook available at {url}"),
        Notification::VmReady { host } => format!("Remote desktop ready on {host}"),
        Notification::Error(err @ LaunchError::NotEntitled { .. }) => format!("Warning: {err}"),
        Notification::Error(err) => format!("Error: {err}"),
    };
    Some(line)
}

/// Print notifications until the session ends. Ctrl-C cancels the session.
///
/// Returns the last error reported, if any. Warnings are not kept.
pub async fn follow(
    mut notifications: UnboundedReceiver<Notification>,
    handle: SessionHandle,
) -> Option<LaunchError> {
    let mut interrupt = std::pin::pin!(ctrl_c());
    let mut interrupted = false;
    let mut last_error = None;

    loop {
        tokio::select! {
            result = &mut interrupt, if !interrupted => {
                interrupted = true;
                if let Err(e) = result {
                    tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                    continue;
                }
                eprintln!("Interrupted, cancelling the session");
                handle.cancel();
            }
            notification = notifications.recv() => {
                let Some(notification) = notification else {
                    break;
                };
                if let Notification::StateChanged { from, to } = &notification {
                    tracing::debug!("Session {} -> {}", from, to);
                }
                if let Some(line) = describe(&notification) {
                    if notification.is_error() {
                        eprintln!("{line}");
                    } else {
                        println!("{line}");
                    }
                }
                match notification {
                    Notification::Error(LaunchError::NotEntitled { .. }) => {}
                    Notification::Error(err) => last_error = Some(err),
                    _ => {}
                }
            }
        }
    }

    last_error
}
