//! Shared configuration for the lhpc launcher.
//!
//! This crate holds the launcher configuration, the per-user state
//! directory layout and launch script metadata.

pub mod config;
pub mod metadata;
pub mod paths;

pub use config::{ConfigError, LaunchConfig, PartitionGroup};
pub use metadata::{LaunchMetadata, LaunchScript, MetadataError};
pub use paths::{StateDir, home_dir};
