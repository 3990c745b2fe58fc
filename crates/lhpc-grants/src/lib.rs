//! Project entitlements.
//!
//! Either a site grant file (or a directory of them) or the SLURM account
//! manager decides which projects a user may charge.

pub mod grantfile;
pub mod resolver;
pub mod sacctmgr;

pub use grantfile::{GrantError, Project, load_grant_dir, load_grant_file, parse_grant_file};
pub use resolver::{ActiveProject, EntitlementSource, Entitlements, current_user, resolve};
pub use sacctmgr::{AccountAccess, AccountMap, parse_associations};
