//! Subcommand handlers.

use crate::console;
use crate::error::AppError;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use lhpc_cli::{Args, Command, LaunchArgs, build_request};
use lhpc_core::{LaunchConfig, LaunchScript, StateDir};
use lhpc_grants::{EntitlementSource, Entitlements, current_user, resolve};
use lhpc_jobs::{Job, KindRegistry};
use lhpc_parsers::{format_duration_slurm, run_command};
use lhpc_remote::{SecureShell, StatusProbe};
use lhpc_runs::RunStore;
use lhpc_session::{RunnerOptions, Session, SessionRunner, SessionState, UrlOpener};
use lhpc_slurm::{NodeInfo, SlurmClient};
use std::sync::Arc;

type Result<T> = std::result::Result<T, AppError>;

/// Everything a subcommand may need.
struct Context {
    config: Arc<LaunchConfig>,
    client: Arc<SlurmClient>,
    local: bool,
}

fn default_config_path() -> Option<Utf8PathBuf> {
    let path = dirs::config_dir()?.join("lhpc").join("config.json");
    Utf8PathBuf::from_path_buf(path).ok()
}

/// Load the configuration named on the command line, the per-user file if
/// it exists, or the built-in defaults.
fn load_config(path: Option<&Utf8Path>) -> Result<LaunchConfig> {
    if let Some(path) = path {
        return Ok(LaunchConfig::load(path)?);
    }
    match default_config_path() {
        Some(path) if path.exists() => {
            tracing::debug!("Using configuration {}", path);
            Ok(LaunchConfig::load(&path)?)
        }
        _ => {
            let config = LaunchConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

pub async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let state_dir = config
        .state_dir
        .clone()
        .map(StateDir::new)
        .unwrap_or_else(StateDir::for_current_user);
    let client = SlurmClient::new(state_dir).verbose(args.verbose);
    let ctx = Context {
        config: Arc::new(config),
        client: Arc::new(client),
        local: args.local,
    };

    match args.command {
        Command::Launch(launch_args) => launch(&ctx, &launch_args).await,
        Command::Partitions => partitions(&ctx).await,
        Command::Features { partition } => features(&ctx, &partition).await,
        Command::Reservations { all } => reservations(&ctx, all).await,
        Command::Nodes { name } => nodes(&ctx, name.as_deref()).await,
        Command::Queue { user } => queue(&ctx, user.as_deref()).await,
        Command::Projects => projects(&ctx).await,
        Command::Cancel { job_id } => Ok(ctx.client.cancel_by_id(job_id).await?),
        Command::Job { job_id } => show_job(&ctx, job_id).await,
        Command::Probe { node } => probe(&ctx, &node).await,
        Command::Check => check(&ctx).await,
        Command::History { running, compact } => history(&ctx, running, compact),
    }
}

fn require_tools(client: &SlurmClient) -> Result<()> {
    let missing = client.missing_tools();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::ToolsMissing(
            missing.into_iter().map(str::to_string).collect(),
        ))
    }
}

/// Whether `group` appears in `id -Gn` output.
fn in_group(id_output: &str, group: &str) -> bool {
    id_output.split_whitespace().any(|g| g == group)
}

async fn check_restriction(group: &str) -> Result<()> {
    let mut cmd = tokio::process::Command::new("id");
    cmd.arg("-Gn");
    let groups = run_command(&mut cmd, "id").await?;
    if in_group(&groups, group) {
        Ok(())
    } else {
        Err(AppError::Restricted {
            group: group.to_string(),
        })
    }
}

/// Resolve the user's projects. `None` when no project source is configured.
async fn entitlements(ctx: &Context) -> Result<Option<Entitlements>> {
    let user = current_user().ok_or(AppError::UnknownUser)?;
    let source = EntitlementSource::from_config(&ctx.config);
    let today = Local::now().date_naive();
    let entitlements = resolve(&source, &ctx.client, &user, today).await?;

    let denied = entitlements.as_ref().is_some_and(Entitlements::is_empty);
    if denied && ctx.config.grantfile_required {
        return Err(AppError::NotEntitled { user });
    }
    Ok(entitlements)
}

/// Open URLs with the configured browser command, or the desktop default.
fn browser_opener(config: &LaunchConfig) -> UrlOpener {
    let command = config.browser_command.clone();
    Box::new(move |url: &str| {
        let Some(command) = &command else {
            return open::that(url);
        };
        let mut words = command.split_whitespace();
        let program = words.next().unwrap_or("xdg-open");
        std::process::Command::new(program)
            .args(words)
            .arg(url)
            .spawn()
            .map(|_| ())
    })
}

async fn launch(ctx: &Context, args: &LaunchArgs) -> Result<()> {
    require_tools(&ctx.client)?;

    let script = args.script.as_deref().map(LaunchScript::read).transpose()?;
    let metadata = script.as_ref().map(|s| &s.metadata);
    if let Some(group) = metadata.and_then(|m| m.restrict.as_deref()) {
        check_restriction(group).await?;
    }

    let mut request = build_request(args, &ctx.config, metadata)?;
    let mut not_entitled = None;
    if let Some(entitlements) = entitlements(ctx).await? {
        if entitlements.is_empty() {
            not_entitled = current_user();
        }
        if request.account.is_none() {
            request.account = entitlements.default_account().map(str::to_string);
        }
    }

    let kind = KindRegistry::with_builtin().build(&request, &ctx.config)?;
    let job = Job::from_request(&request, kind, ctx.client.state_dir());
    tracing::debug!("Batch script:\n{}", job.script_text());
    let autostart = request.autostart;
    let session = Session::new(request, job);

    let options = RunnerOptions {
        local_only: ctx.local,
        ..RunnerOptions::default()
    };
    let (runner, handle, notifications) =
        SessionRunner::new(session, ctx.client.clone(), ctx.config.clone());
    let mut runner = runner
        .with_options(options)
        .with_store(RunStore::for_state_dir(ctx.client.state_dir()));
    if let Some(user) = not_entitled {
        runner = runner.with_not_entitled(user);
    }
    if !args.no_browser {
        runner = runner.with_opener(browser_opener(&ctx.config));
    }

    let task = runner.start();
    if !autostart {
        handle.submit();
    }
    let last_error = console::follow(notifications, handle).await;
    let session = task.await?;

    match (session.state, last_error) {
        (SessionState::Failed, Some(err)) => Err(err.into()),
        _ => Ok(()),
    }
}

async fn partitions(ctx: &Context) -> Result<()> {
    let partitions = ctx.client.query_partitions(&ctx.config.part_ignore).await?;
    for partition in partitions {
        let marker = if partition.is_default { "*" } else { "" };
        println!(
            "{:<13} {:>5} nodes  {}",
            format!("{}{}", partition.name, marker),
            partition.nodes.len(),
            partition.description
        );
    }
    Ok(())
}

async fn features(ctx: &Context, partition: &str) -> Result<()> {
    let features = ctx
        .client
        .query_features(partition, &ctx.config.feature_ignore)
        .await?;
    for feature in features {
        println!("{feature}");
    }
    Ok(())
}

async fn reservations(ctx: &Context, all: bool) -> Result<()> {
    let mut reservations = ctx.client.query_reservations().await?;
    if !all {
        if let Some(entitlements) = entitlements(ctx).await? {
            reservations = entitlements.filter_reservations(&reservations);
        }
    }
    for res in reservations {
        let end = res
            .end
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{:<20} {:<8} {:<6} nodes  until {}  ({})",
            res.name,
            res.state,
            res.nodes.len(),
            end,
            res.accounts.join(",")
        );
    }
    Ok(())
}

async fn nodes(ctx: &Context, name: Option<&str>) -> Result<()> {
    let nodes = match name {
        Some(name) => vec![ctx.client.query_node(name).await?],
        None => ctx.client.query_nodes().await?.into_values().collect(),
    };
    for node in nodes {
        println!(
            "{:<12} {:<10} cpus={:<4} mem={:<14} gres={} features={}",
            node.name().unwrap_or("?"),
            node.state().unwrap_or("?"),
            node.cpus().map(|c| c.to_string()).unwrap_or_default(),
            memory(&node),
            node.gres().unwrap_or("-"),
            node.active_features().join(",")
        );
    }
    Ok(())
}

/// `used/total` memory of a node in MB.
fn memory(node: &NodeInfo) -> String {
    match (node.alloc_memory_mb(), node.real_memory_mb()) {
        (Some(used), Some(total)) => format!("{used}/{total}M"),
        (None, Some(total)) => format!("{total}M"),
        _ => String::new(),
    }
}

async fn queue(ctx: &Context, user: Option<&str>) -> Result<()> {
    let duration =
        |d: Option<std::time::Duration>| d.map(format_duration_slurm).unwrap_or_default();
    for entry in ctx.client.query_queue(user).await? {
        println!(
            "{:>10} {:<10} {:<20} {:<10} {:<3} {:>11} {:>11} {}",
            entry.job_id,
            entry.partition,
            entry.name,
            entry.user,
            entry.state,
            duration(entry.time_used),
            duration(entry.time_limit),
            entry.nodelist_or_reason
        );
    }
    Ok(())
}

async fn show_job(ctx: &Context, job_id: u64) -> Result<()> {
    let Some(attributes) = ctx.client.show_job(job_id).await? else {
        println!("Job {job_id} is not known to the scheduler");
        return Ok(());
    };
    let mut attributes: Vec<_> = attributes.into_iter().collect();
    attributes.sort();
    for (key, value) in attributes {
        println!("{key:<20} {value}");
    }
    Ok(())
}

async fn projects(ctx: &Context) -> Result<()> {
    match entitlements(ctx).await? {
        None => println!("No project source configured"),
        Some(entitlements) if entitlements.is_empty() => {
            println!("No active projects for {}", entitlements.user)
        }
        Some(entitlements) => {
            for project in &entitlements.projects {
                if project.partitions.is_empty() {
                    println!("{}", project.name);
                } else {
                    println!("{} ({})", project.name, project.partitions.join(","));
                }
            }
        }
    }
    Ok(())
}

async fn probe(ctx: &Context, node: &str) -> Result<()> {
    let shell = SecureShell::new(ctx.config.ssh_path.clone()).local_only(ctx.local);
    let status = StatusProbe::new(shell).probe(node).await?;

    match (status.used_memory_mb, status.total_memory_mb) {
        (Some(used), Some(total)) => println!("Memory: {used} / {total} MB"),
        _ => println!("Memory: unknown"),
    }
    match status.cpu_percent {
        Some(cpu) => println!("CPU:    {cpu}%"),
        None => println!("CPU:    unknown"),
    }
    for (index, gpu) in status.gpu_percent.iter().enumerate() {
        println!("GPU {index}:  {gpu}%");
    }
    Ok(())
}

async fn check(ctx: &Context) -> Result<()> {
    println!("Configuration: ok");
    println!("State directory: {}", ctx.client.state_dir().root());
    require_tools(&ctx.client)?;
    println!("SLURM tools: ok");
    match entitlements(ctx).await? {
        Some(entitlements) => println!(
            "Projects: {}",
            entitlements.names().collect::<Vec<_>>().join(", ")
        ),
        None => println!("Projects: not checked"),
    }
    Ok(())
}

fn history(ctx: &Context, running: bool, compact: bool) -> Result<()> {
    let store = RunStore::for_state_dir(ctx.client.state_dir());
    let mut history = store.load()?;
    if compact {
        history.truncate();
        store.compact(&history)?;
        tracing::debug!("Compacted {} to {} records", store.path(), history.len());
    }

    let records: Vec<_> = if running {
        history.running().collect()
    } else {
        history.records.iter().collect()
    };
    for record in records {
        println!(
            "{:>10} {:<8} {:<24} {:<10} {:<12} {}",
            record.job_id,
            record.kind,
            record.name,
            record.host.as_deref().unwrap_or("-"),
            record.started.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            record.outcome
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_memory() {
        let node = |pairs: &[(&str, &str)]| {
            NodeInfo::new(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )
        };
        assert_eq!(
            memory(&node(&[("RealMemory", "192000"), ("AllocMem", "4000")])),
            "4000/192000M"
        );
        assert_eq!(memory(&node(&[("RealMemory", "192000")])), "192000M");
        assert_eq!(memory(&node(&[])), "");
    }

    #[test]
    fn test_in_group() {
        let output = "alice staff matlab-users\n";
        assert!(in_group(output, "matlab-users"));
        assert!(!in_group(output, "matlab"));
        assert!(!in_group("", "staff"));
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.json")).unwrap();
        std::fs::write(&path, r#"{"default_part": "lu48", "jupyter_use_localhost": true}"#)
            .unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.default_part.as_deref(), Some("lu48"));
        assert!(config.jupyter_use_localhost);

        let missing = dir.path().join("missing.json");
        let missing = Utf8PathBuf::from_path_buf(missing).unwrap();
        assert!(matches!(
            load_config(Some(missing.as_path())),
            Err(AppError::Config(_))
        ));
    }
}
