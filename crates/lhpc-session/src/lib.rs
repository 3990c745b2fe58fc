//! Session coordinator.
//!
//! A pure [`SessionMachine`] decides what happens to a session; a
//! [`SessionRunner`] performs the side effects and posts [`Notification`]s
//! for the front-end.

pub mod machine;
pub mod notify;
pub mod runner;
pub mod session;
pub mod state;

pub use machine::{Action, DEFAULT_NOTEBOOK_PORT, Event, MAX_RETRIES, SessionMachine};
pub use notify::{LaunchError, Notification, VmFailure};
pub use runner::{RunnerOptions, SessionHandle, SessionRunner, UrlOpener};
pub use session::Session;
pub use state::SessionState;
