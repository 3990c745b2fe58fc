//! SLURM integration for lhpc.
//!
//! Submit batch jobs with sbatch, follow them with squeue, cancel them with
//! scancel, and discover partitions, node features and reservations.

pub mod client;
pub mod discovery;
pub mod squeue;
pub mod types;

pub use client::{
    MAX_MISSING_POLLS, SlurmClient, SlurmError, SlurmTools, cancelled, complete_lines,
    parse_submit_output,
};
pub use discovery::{parse_nodes, parse_reservations, parse_sinfo, partition_features};
pub use types::{JobStatusReport, NodeInfo, Partition, QueueEntry, Reservation, StartOutcome};
