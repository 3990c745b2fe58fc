//! CLI argument parsing for lhpc.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use lhpc_core::{LaunchConfig, LaunchMetadata};
use lhpc_jobs::{
    AppKind, GraphicsMode, MemoryRequest, ModuleSpec, RequestError, SessionRequest, TasksPerNode,
    Walltime,
};

#[derive(Parser, Debug)]
#[command(name = "lhpc")]
#[command(about = "Launch interactive applications on SLURM compute nodes")]
pub struct Args {
    /// Launcher configuration (JSON)
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Log every scheduler command
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run on the machine the launcher runs on; no ssh hop to the node
    #[arg(long, global = true)]
    pub local: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a session and follow it until it ends
    Launch(LaunchArgs),
    /// List partitions
    Partitions,
    /// List the features available in a partition
    Features {
        partition: String,
    },
    /// List reservations open to the current user
    Reservations {
        /// Include reservations the user has no project in
        #[arg(long)]
        all: bool,
    },
    /// Show node attributes
    Nodes {
        /// Only this node
        name: Option<String>,
    },
    /// Show the job queue
    Queue {
        /// Only jobs of this user
        #[arg(short, long)]
        user: Option<String>,
    },
    /// List the active projects of the current user
    Projects,
    /// Cancel a job by id
    Cancel {
        job_id: u64,
    },
    /// Show the scheduler's record of a job
    Job {
        job_id: u64,
    },
    /// Show memory, CPU and GPU load of a node
    Probe {
        node: String,
    },
    /// Check the configuration and the scheduler tools
    Check,
    /// Show recorded sessions
    History {
        /// Only sessions still running
        #[arg(long)]
        running: bool,

        /// Rewrite the history file, dropping old records
        #[arg(long)]
        compact: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct LaunchArgs {
    /// Program to run for graphical and command sessions
    pub command: Option<String>,

    /// Session kind: graphical, notebook, lab, vm or command
    #[arg(short, long, default_value = "graphical")]
    pub kind: AppKind,

    /// Launch script whose ##LDT tags seed the request
    #[arg(long)]
    pub script: Option<Utf8PathBuf>,

    /// Job kind registry key, overriding the session kind's default
    #[arg(long)]
    pub job_kind: Option<String>,

    /// Job name shown in the queue
    #[arg(long)]
    pub name: Option<String>,

    #[arg(short, long)]
    pub partition: Option<String>,

    /// Run on this node instead of a partition
    #[arg(short = 'w', long)]
    pub node: Option<String>,

    /// Node feature constraint (repeatable)
    #[arg(short = 'C', long = "feature")]
    pub features: Vec<String>,

    #[arg(long)]
    pub reservation: Option<String>,

    #[arg(short = 'A', long)]
    pub account: Option<String>,

    /// Wall time as HH:MM:SS or D-HH:MM:SS
    #[arg(short, long, default_value = "01:00:00")]
    pub time: Walltime,

    #[arg(short = 'N', long, default_value = "1")]
    pub nodes: u32,

    /// Tasks per node, -1 leaves it to the scheduler
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub tasks_per_node: i64,

    #[arg(short, long)]
    pub cpus_per_task: Option<u32>,

    /// Memory per node in MB, -1 leaves it to the scheduler
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub mem: i64,

    #[arg(long)]
    pub exclusive: bool,

    #[arg(long)]
    pub gres: Option<String>,

    /// Forward OpenGL through VirtualGL
    #[arg(long)]
    pub vgl: bool,

    /// Also wrap the command in vglrun
    #[arg(long)]
    pub vglrun: bool,

    /// Environment module to load, name or name/version (repeatable)
    #[arg(short, long = "module")]
    pub modules: Vec<ModuleSpec>,

    /// Partition group the partition must belong to
    #[arg(short, long)]
    pub group: Option<String>,

    /// Connect as soon as the job starts
    #[arg(long)]
    pub autostart: bool,

    /// Print the notebook URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,
}

impl LaunchArgs {
    fn graphics(&self, metadata: Option<&LaunchMetadata>) -> GraphicsMode {
        if self.vglrun {
            GraphicsMode::VglRun
        } else if self.vgl || metadata.is_some_and(|m| m.vgl) {
            GraphicsMode::Tunneled
        } else {
            GraphicsMode::Plain
        }
    }
}

/// Turn launch arguments into a validated request.
///
/// Launch script tags fill what the command line leaves open; a script
/// with `part_disable` pins its own partition.
pub fn build_request(
    args: &LaunchArgs,
    config: &LaunchConfig,
    metadata: Option<&LaunchMetadata>,
) -> Result<SessionRequest, RequestError> {
    let mut request = SessionRequest::new(args.kind, args.time);
    request.command = args.command.clone();
    request.job_kind = args.job_kind.clone();
    request.name = args.name.clone();
    request.partition = args.partition.clone();
    request.node = args.node.clone();
    request.features = args.features.clone();
    request.reservation = args.reservation.clone();
    request.account = args.account.clone();
    request.nodes = args.nodes;
    request.tasks_per_node = TasksPerNode::from_sentinel(args.tasks_per_node);
    request.cpus_per_task = args.cpus_per_task;
    request.memory = MemoryRequest::from_sentinel(args.mem)?;
    request.exclusive = args.exclusive;
    request.gres = args.gres.clone();
    request.graphics = args.graphics(metadata);
    request.modules = args.modules.clone();
    request.group = args.group.clone();
    request.autostart = args.autostart;

    if let Some(meta) = metadata {
        if meta.part_disable || request.partition.is_none() {
            if let Some(part) = &meta.part {
                request.partition = Some(part.clone());
            }
        }
        if meta.feature_disable {
            request.features.clear();
        }
        if request.job_kind.is_none() {
            request.job_kind = meta.job.clone();
        }
        if request.group.is_none() {
            request.group = meta.group.clone();
        }
    }

    request.apply_defaults(config);
    request.validate(config)?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lhpc_core::PartitionGroup;

    fn launch(argv: &[&str]) -> LaunchArgs {
        let mut full = vec!["lhpc", "launch"];
        full.extend_from_slice(argv);
        match Args::parse_from(full).command {
            Command::Launch(args) => args,
            other => panic!("expected launch, got {other:?}"),
        }
    }

    fn config() -> LaunchConfig {
        let mut config = LaunchConfig {
            default_part: Some("lu48".to_string()),
            ..Default::default()
        };
        config.groups.insert(
            "gpu".to_string(),
            PartitionGroup {
                partitions: vec!["gpua40".to_string(), "gpua100".to_string()],
                tasks: Some(4),
                memory: None,
                exclusive: None,
            },
        );
        config
    }

    #[test]
    fn test_launch_defaults() {
        let args = launch(&["xterm"]);
        assert_eq!(args.kind, AppKind::Graphical);
        assert_eq!(args.time, Walltime::default());
        assert_eq!(args.tasks_per_node, -1);
        assert_eq!(args.mem, -1);

        let request = build_request(&args, &config(), None).unwrap();
        assert_eq!(request.command.as_deref(), Some("xterm"));
        assert_eq!(request.partition.as_deref(), Some("lu48"));
        assert_eq!(request.tasks_per_node, TasksPerNode::Unset);
        assert_eq!(request.memory, MemoryRequest::Unset);
        assert_eq!(request.graphics, GraphicsMode::Plain);
    }

    #[test]
    fn test_launch_flags() {
        let args = launch(&[
            "--kind", "notebook", "-t", "0-02:30:00", "--mem", "8000", "--tasks-per-node", "2",
            "-C", "gpu", "-C", "avx2", "-m", "Anaconda3/2024.02", "--vglrun",
        ]);
        let request = build_request(&args, &config(), None).unwrap();
        assert_eq!(request.kind, AppKind::Notebook);
        assert_eq!(request.walltime.to_string(), "02:30:00");
        assert_eq!(request.memory, MemoryRequest::Mb(8000));
        assert_eq!(request.tasks_per_node, TasksPerNode::Count(2));
        assert_eq!(request.features, vec!["gpu", "avx2"]);
        assert_eq!(request.modules, vec![ModuleSpec::versioned("Anaconda3", "2024.02")]);
        assert_eq!(request.graphics, GraphicsMode::VglRun);
    }

    #[test]
    fn test_bad_values_rejected() {
        let args = launch(&["xterm", "--mem", "-5"]);
        assert_eq!(
            build_request(&args, &config(), None),
            Err(RequestError::InvalidMemory(-5))
        );

        assert!(Args::try_parse_from(["lhpc", "launch", "-t", "0:00:00", "xterm"]).is_err());
        assert!(Args::try_parse_from(["lhpc", "launch", "--kind", "desktop"]).is_err());
    }

    #[test]
    fn test_graphical_needs_command() {
        let args = launch(&[]);
        assert_eq!(
            build_request(&args, &config(), None),
            Err(RequestError::MissingCommand(AppKind::Graphical))
        );
    }

    #[test]
    fn test_metadata_seeds_request() {
        let meta = LaunchMetadata::parse(
            "#!/bin/sh\n##LDT part = \"gpua40\"\n##LDT group = \"gpu\"\n##LDT vgl = \"yes\"\n",
        );
        let args = launch(&["glxgears"]);
        let request = build_request(&args, &config(), Some(&meta)).unwrap();
        assert_eq!(request.partition.as_deref(), Some("gpua40"));
        assert_eq!(request.group.as_deref(), Some("gpu"));
        assert_eq!(request.tasks_per_node, TasksPerNode::Count(4));
        assert_eq!(request.graphics, GraphicsMode::Tunneled);

        // The command line wins unless the script pins its partition
        let args = launch(&["glxgears", "-p", "gpua100"]);
        let request = build_request(&args, &config(), Some(&meta)).unwrap();
        assert_eq!(request.partition.as_deref(), Some("gpua100"));

        let pinned = LaunchMetadata::parse(
            "##LDT part = \"gpua40\"\n##LDT part_disable = \"yes\"\n##LDT feature_disable = \"yes\"\n",
        );
        let args = launch(&["glxgears", "-p", "gpua100", "-C", "a40"]);
        let request = build_request(&args, &config(), Some(&pinned)).unwrap();
        assert_eq!(request.partition.as_deref(), Some("gpua40"));
        assert!(request.features.is_empty());
    }

    #[test]
    fn test_partition_outside_group() {
        let args = launch(&["xterm", "-g", "gpu", "-p", "lu48"]);
        assert!(matches!(
            build_request(&args, &config(), None),
            Err(RequestError::PartitionNotInGroup { .. })
        ));
    }

    #[test]
    fn test_job_subcommand() {
        let args = Args::parse_from(["lhpc", "job", "4242"]);
        assert!(matches!(args.command, Command::Job { job_id: 4242 }));
        assert!(Args::try_parse_from(["lhpc", "job", "abc"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["lhpc", "history", "--running", "--verbose"]);
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Command::History {
                running: true,
                compact: false
            }
        ));
    }
}
