//! Cluster resource discovery: partitions, nodes, features, reservations.

use crate::client::{SlurmClient, SlurmError};
use crate::squeue::{QUEUE_FORMAT, parse_queue};
use crate::types::{NodeInfo, Partition, QueueEntry, Reservation};
use lhpc_parsers::{
    expand_hostlist, parse_key_values, parse_records, parse_slurm_timestamp, run_command,
    run_command_allow_failure, split_list,
};
use std::collections::{BTreeMap, BTreeSet};
use tokio::process::Command;

fn excluded(name: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|e| !e.is_empty() && name.contains(e.as_str()))
}

/// Parse plain `sinfo` output.
///
/// The partition is the first column, the node list the sixth. A partition
/// spread over several lines (one per node state) has its node lists
/// merged. Order of first appearance is kept.
pub fn parse_sinfo(stdout: &str, exclude: &[String]) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = Vec::new();

    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() || fields[0] == "PARTITION" {
            continue;
        }
        if fields.len() < 6 {
            tracing::warn!("Skipping short sinfo line: {}", line);
            continue;
        }

        let (name, is_default) = match fields[0].strip_suffix('*') {
            Some(name) => (name, true),
            None => (fields[0], false),
        };
        if excluded(name, exclude) {
            continue;
        }

        let nodes = match expand_hostlist(fields[5]) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!("Skipping sinfo line for {}: {}", name, e);
                continue;
            }
        };

        let index = match partitions.iter().position(|p| p.name == name) {
            Some(index) => index,
            None => {
                partitions.push(Partition {
                    name: name.to_string(),
                    nodes: Vec::new(),
                    description: String::new(),
                    is_default: false,
                });
                partitions.len() - 1
            }
        };
        let partition = &mut partitions[index];
        partition.is_default |= is_default;
        for node in nodes {
            if !partition.nodes.contains(&node) {
                partition.nodes.push(node);
            }
        }
    }

    for partition in &mut partitions {
        let count = partition.nodes.len();
        let plural = if count == 1 { "" } else { "s" };
        partition.description = format!("{} ({} node{})", partition.name, count, plural);
    }
    partitions
}

/// Nodes keyed by name from `scontrol show nodes -o`.
pub fn parse_nodes(stdout: &str) -> BTreeMap<String, NodeInfo> {
    parse_records(stdout, "NodeName")
        .into_iter()
        .filter_map(|attributes| {
            let name = attributes.get("NodeName")?.clone();
            Some((name, NodeInfo::new(attributes)))
        })
        .collect()
}

/// Active features of the nodes in `partition`, minus excluded substrings.
pub fn partition_features(
    nodes: &BTreeMap<String, NodeInfo>,
    partition: &str,
    exclude: &[String],
) -> BTreeSet<String> {
    nodes
        .values()
        .filter(|node| node.partitions().iter().any(|p| p == partition))
        .flat_map(|node| node.active_features())
        .filter(|feature| !excluded(feature, exclude))
        .collect()
}

/// Reservations from `scontrol show res`.
pub fn parse_reservations(stdout: &str) -> Vec<Reservation> {
    parse_records(stdout, "ReservationName")
        .into_iter()
        .filter_map(|record| {
            let name = record.get("ReservationName")?.clone();
            let field = |key: &str| record.get(key).map(String::as_str).unwrap_or("");
            let list = |key: &str| match field(key) {
                "(null)" => Vec::new(),
                value => split_list(value),
            };
            let nodes = expand_hostlist(field("Nodes")).unwrap_or_else(|e| {
                tracing::warn!("Reservation {} has an unreadable node list: {}", name, e);
                Vec::new()
            });
            Some(Reservation {
                accounts: list("Accounts"),
                users: list("Users"),
                state: field("State").to_string(),
                nodes,
                start: parse_slurm_timestamp(field("StartTime")),
                end: parse_slurm_timestamp(field("EndTime")),
                name,
            })
        })
        .collect()
}

impl SlurmClient {
    pub async fn query_partitions(&self, exclude: &[String]) -> Result<Vec<Partition>, SlurmError> {
        let mut cmd = Command::new(&self.tools.sinfo);
        let stdout = run_command(&mut cmd, "sinfo").await?;
        Ok(parse_sinfo(&stdout, exclude))
    }

    pub async fn query_node(&self, name: &str) -> Result<NodeInfo, SlurmError> {
        let mut cmd = Command::new(&self.tools.scontrol);
        cmd.args(["show", "node", name]);
        let stdout = run_command(&mut cmd, "scontrol").await?;
        Ok(NodeInfo::new(parse_key_values(&stdout)))
    }

    pub async fn query_nodes(&self) -> Result<BTreeMap<String, NodeInfo>, SlurmError> {
        let mut cmd = Command::new(&self.tools.scontrol);
        cmd.args(["show", "nodes", "-o"]);
        let stdout = run_command(&mut cmd, "scontrol").await?;
        Ok(parse_nodes(&stdout))
    }

    pub async fn query_features(
        &self,
        partition: &str,
        exclude: &[String],
    ) -> Result<BTreeSet<String>, SlurmError> {
        let nodes = self.query_nodes().await?;
        Ok(partition_features(&nodes, partition, exclude))
    }

    pub async fn query_reservations(&self) -> Result<Vec<Reservation>, SlurmError> {
        let mut cmd = Command::new(&self.tools.scontrol);
        cmd.args(["show", "res"]);
        // exits non-zero on some versions when there are no reservations
        let stdout = run_command_allow_failure(&mut cmd, "scontrol").await?;
        Ok(parse_reservations(&stdout))
    }

    /// Queue dump, optionally limited to one user.
    pub async fn query_queue(&self, user: Option<&str>) -> Result<Vec<QueueEntry>, SlurmError> {
        let mut cmd = Command::new(&self.tools.squeue);
        cmd.arg("--noheader").arg(format!("--format={QUEUE_FORMAT}"));
        if let Some(user) = user {
            cmd.args(["-u", user]);
        }
        let stdout = run_command(&mut cmd, "squeue").await?;
        Ok(parse_queue(&stdout))
    }

    /// `sacctmgr -P show user` output, with associations when a user is given.
    pub async fn account_associations(&self, user: Option<&str>) -> Result<String, SlurmError> {
        let mut cmd = Command::new(&self.tools.sacctmgr);
        cmd.args(["-P", "show", "user"]);
        if let Some(user) = user {
            cmd.args([user, "withassoc"]);
        }
        Ok(run_command(&mut cmd, "sacctmgr").await?)
    }
}
