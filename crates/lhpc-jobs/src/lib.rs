//! Session requests, job kinds and batch script generation.

pub mod job;
pub mod kind;
pub mod registry;
pub mod request;
pub mod script;
pub mod watch;

pub use job::{Job, RUNNING};
pub use kind::{JobKind, NotebookSpec};
pub use registry::{KindConstructor, KindRegistry};
pub use request::{
    AppKind, GraphicsMode, MemoryRequest, ModuleSpec, RequestError, SessionRequest, TasksPerNode,
    Walltime,
};
pub use script::build_script;
pub use watch::{NotebookUrl, UrlWatcher, VmHost, detect_notebook_url};
