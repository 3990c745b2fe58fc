//! Top-level error type and exit codes.

use lhpc_core::{ConfigError, MetadataError};
use lhpc_grants::GrantError;
use lhpc_jobs::RequestError;
use lhpc_parsers::CommandError;
use lhpc_remote::RemoteError;
use lhpc_runs::StoreError;
use lhpc_session::LaunchError;
use lhpc_slurm::SlurmError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum AppError {
    #[error(transparent)]
    #[diagnostic(code(lhpc::config), help("check the file given with --config"))]
    Config(#[from] ConfigError),

    #[error("SLURM tools not found: {}", .0.join(", "))]
    #[diagnostic(
        code(lhpc::tools),
        help("run lhpc on a login node, or load the slurm module")
    )]
    ToolsMissing(Vec<String>),

    #[error("User {user} has no active project")]
    #[diagnostic(code(lhpc::entitlement))]
    NotEntitled { user: String },

    #[error("The current user could not be determined")]
    #[diagnostic(code(lhpc::user))]
    UnknownUser,

    #[error("This application is restricted to members of the '{group}' group")]
    #[diagnostic(code(lhpc::restricted))]
    Restricted { group: String },

    #[error(transparent)]
    #[diagnostic(code(lhpc::metadata))]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    #[diagnostic(code(lhpc::request))]
    Request(#[from] RequestError),

    #[error(transparent)]
    #[diagnostic(code(lhpc::slurm))]
    Slurm(#[from] SlurmError),

    #[error(transparent)]
    #[diagnostic(code(lhpc::command))]
    Command(#[from] CommandError),

    #[error(transparent)]
    #[diagnostic(code(lhpc::grants))]
    Grants(#[from] GrantError),

    #[error(transparent)]
    #[diagnostic(code(lhpc::remote))]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    #[diagnostic(code(lhpc::history))]
    History(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(code(lhpc::session))]
    Session(#[from] LaunchError),

    #[error("Session task failed: {0}")]
    #[diagnostic(code(lhpc::session))]
    Join(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Process exit code: 2 for a restricted-group denial, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Restricted { .. } => 2,
            _ => 1,
        }
    }
}
