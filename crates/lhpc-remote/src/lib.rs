//! Remote connections to allocated nodes.
//!
//! Applications run over ssh (optionally through VirtualGL), notebooks are
//! reached through a local port forward, and VM sessions through an RDP
//! client. All of them share the [`Remote`] contract.

pub mod connection;
pub mod launchers;
pub mod probe;
pub mod tunnel;

pub use connection::{Connection, Remote, RemoteError, RemoteStatus};
pub use launchers::{DesktopClient, GraphicsForward, Invocation, Launcher, SecureShell};
pub use probe::{NodeStatus, StatusProbe};
pub use tunnel::{ForwardTunnel, TunnelEndpoint, find_free_port};
