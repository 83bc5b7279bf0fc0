//! sitesync - delta-aware site deployment

use anyhow::{bail, Context};
use clap::Parser;
use sitesync::cli::{
    CacheCommand, Cli, Commands, ConfigArgs, PlanArgs, ProjectCommand, RemoteArgs, SnapshotCommand,
    SyncArgs,
};
use sitesync::config::Config;
use sitesync::delta::{self, DeltaPlanner};
use sitesync::format;
use sitesync::probe::{ConnectionProbe, ProbeState};
use sitesync::progress::ProgressTracker;
use sitesync::project::{CredentialProvider, EnvCredentials, JsonProjectStore, ProjectConfig, ProjectStore};
use sitesync::signature::SignatureStore;
use sitesync::snapshot::SnapshotStore;
use sitesync::sync::{Stage, SyncEngine, SyncPlan};
use sitesync::transport::LocalTransport;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json);

    let mut config = cli.load_config().context("loading configuration")?;
    if cli.json {
        config.progress = false;
    }
    let data_dir = config.data_dir()?;
    let projects = JsonProjectStore::new(&data_dir);

    match cli.command {
        Commands::Sync(args) => run_sync(config, projects, args).await?,
        Commands::Plan(args) => run_plan(&data_dir, &projects, args)?,
        Commands::Probe(args) => run_probe(&config, &projects, args).await?,
        Commands::Snapshot(cmd) => {
            let store = SnapshotStore::from_config(&data_dir, &config);
            run_snapshot(&store, &projects, cmd)?
        }
        Commands::Cache(CacheCommand::Clear { project }) => {
            SignatureStore::new(&data_dir).clear(&project)?;
            println!("Cleared signature cache for {}", project);
        }
        Commands::Project(cmd) => run_project(&projects, cmd)?,
        Commands::Config(args) => handle_config_command(&config, args)?,
    }

    Ok(())
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = match verbose {
        0 => EnvFilter::new("sitesync=warn"),
        1 => EnvFilter::new("sitesync=info"),
        2 => EnvFilter::new("sitesync=debug"),
        _ => EnvFilter::new("trace"),
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_project(projects: &JsonProjectStore, id: &str) -> anyhow::Result<ProjectConfig> {
    match projects.load(id)? {
        Some(project) => Ok(project),
        None => bail!("unknown project: {} (create it with `sitesync project init`)", id),
    }
}

async fn run_sync(mut config: Config, projects: JsonProjectStore, args: SyncArgs) -> anyhow::Result<()> {
    args.apply(&mut config);
    let project_id = args.remote.project.clone();
    let tracker = Arc::new(ProgressTracker::new(config.progress));

    let engine = Arc::new(
        SyncEngine::new(
            config,
            Arc::new(LocalTransport::new(&args.remote.remote_root)),
            Arc::new(projects),
            Arc::new(EnvCredentials),
        )?
        .with_sink(tracker.clone()),
    );

    // Ctrl+C cancels the run; the engine settles it as cancelled
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    {
        let engine = Arc::clone(&engine);
        let project_id = project_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Received Ctrl+C, cancelling sync");
                    engine.cancel(&project_id);
                }
                _ = done_rx => {}
            }
        });
    }

    let mut state = engine.sync(&project_id).await?;
    let mut rounds = 0;
    while state.stage == Stage::Error
        && !state.failed_files.is_empty()
        && rounds < args.retry_failed
    {
        rounds += 1;
        tracker.println(&format!(
            "Retrying {} failed file(s), round {}",
            state.failed_files.len(),
            rounds
        ));
        match engine.retry_failed(&project_id, None).await {
            Ok(next) => state = next,
            Err(e) => {
                tracing::warn!(error = %e, "Retry not possible");
                break;
            }
        }
    }
    drop(done_tx);

    tracker.finish();
    println!("{}", format::format_run(&state));
    if state.stage != Stage::Complete {
        bail!("sync ended in {}", state.stage);
    }
    Ok(())
}

fn run_plan(data_dir: &Path, projects: &JsonProjectStore, args: PlanArgs) -> anyhow::Result<()> {
    let project = load_project(projects, &args.project)?;
    let planner = DeltaPlanner::new();
    let deltas = planner.analyze_project(
        &SignatureStore::new(data_dir),
        &project.id,
        &project.local_root,
        &project.rules,
    )?;
    let plan = SyncPlan {
        project_id: project.id,
        stats: delta::stats(&deltas),
        deltas,
    };

    if args.as_json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{}", format::format_plan(&plan, args.all));
    }
    Ok(())
}

async fn run_probe(config: &Config, projects: &JsonProjectStore, args: RemoteArgs) -> anyhow::Result<()> {
    let project = load_project(projects, &args.project)?;
    let Some(endpoint) = project.endpoint else {
        bail!("project {} has no endpoint", project.id);
    };
    let password = EnvCredentials.get_secret(&project.id)?;

    let probe = ConnectionProbe::new(
        Arc::new(LocalTransport::new(&args.remote_root)),
        config.probe_timeout(),
    );
    let report = probe.test(&endpoint, password.as_deref()).await;

    println!("{}: {} ({}ms)", endpoint.display_url(), report.state, report.elapsed_ms);
    if let Some(message) = &report.message {
        println!("  {}", message);
    }
    for dir in &report.directories {
        println!("  {}/", dir);
    }
    if report.state != ProbeState::Success {
        bail!("connection test failed");
    }
    Ok(())
}

fn run_snapshot(store: &SnapshotStore, projects: &JsonProjectStore, cmd: SnapshotCommand) -> anyhow::Result<()> {
    match cmd {
        SnapshotCommand::Create { project, message } => {
            let project = load_project(projects, &project)?;
            let snapshot = store.create_filtered(
                &project.id,
                &project.local_root,
                &project.rules,
                message.as_deref(),
            )?;
            println!("{}", format::format_snapshots(&[snapshot.summary()]));
        }
        SnapshotCommand::List { project } => {
            println!("{}", format::format_snapshots(&store.list(&project)?));
        }
        SnapshotCommand::Diff { project, from, to } => {
            println!("{}", format::format_snapshot_diff(&store.diff(&project, &from, &to)?));
        }
        SnapshotCommand::Restore {
            project,
            snapshot,
            paths,
        } => {
            let record = load_project(projects, &project)?;
            let only = (!paths.is_empty()).then_some(paths.as_slice());
            let restored = store.restore(&project, &snapshot, &record.local_root, only)?;
            for path in &restored {
                println!("restored {}", path);
            }
            println!("{}", format::format_files(restored.len()));
        }
        SnapshotCommand::Delete { project, snapshot } => {
            if store.delete(&project, &snapshot)? {
                println!("Deleted snapshot {}", snapshot);
            } else {
                bail!("no snapshot {} for {}", snapshot, project);
            }
        }
    }
    Ok(())
}

fn run_project(projects: &JsonProjectStore, cmd: ProjectCommand) -> anyhow::Result<()> {
    match cmd {
        ProjectCommand::Init(args) => {
            let project = args.to_project();
            if let Some(endpoint) = &project.endpoint {
                endpoint.validate()?;
            }
            projects.save(&project)?;
            println!("Saved project {}", project.id);
        }
        ProjectCommand::Show { project } => {
            let project = load_project(projects, &project)?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        ProjectCommand::List => {
            for project in projects.list()? {
                let target = project
                    .endpoint
                    .as_ref()
                    .map(|e| e.display_url())
                    .unwrap_or_else(|| "(no endpoint)".to_string());
                println!("{}  {}  {}", project.id, project.local_root.display(), target);
            }
        }
    }
    Ok(())
}

fn handle_config_command(config: &Config, args: ConfigArgs) -> anyhow::Result<()> {
    if args.path {
        println!("{}", Config::default_config_path()?.display());
    } else if args.init {
        Config::default().save()?;
        println!(
            "Created default configuration at {}",
            Config::default_config_path()?.display()
        );
    } else {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
