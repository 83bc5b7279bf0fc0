//! CLI argument parsing for sitesync

use crate::config::Config;
use crate::project::{Endpoint, ProjectConfig, Protocol};
use crate::sync::SyncRules;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// sitesync - delta-aware site deployment
#[derive(Parser, Debug)]
#[command(name = "sitesync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file path
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for caches, snapshots and project records
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load the config file and apply global overrides
    pub fn load_config(&self) -> crate::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a project's changes
    Sync(SyncArgs),

    /// Show what a sync would send, without connecting
    Plan(PlanArgs),

    /// Test the connection to a project's endpoint
    Probe(RemoteArgs),

    /// Manage snapshots
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// Manage signature caches
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Show configuration
    Config(ConfigArgs),
}

/// Where the remote side lives for the directory transport
#[derive(Args, Debug)]
pub struct RemoteArgs {
    /// Project id
    pub project: String,

    /// Directory standing in for the remote host
    #[arg(long, env = "SITESYNC_REMOTE_ROOT")]
    pub remote_root: PathBuf,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Parallel connections (overrides the config file)
    #[arg(short = 'j', long)]
    pub connections: Option<usize>,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// After a run with failures, retry the failed files this many times
    #[arg(long, default_value = "0")]
    pub retry_failed: u32,
}

impl SyncArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(n) = self.connections {
            config.connections = n;
        }
        if self.no_progress {
            config.progress = false;
        }
    }
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Project id
    pub project: String,

    /// Also list unchanged files
    #[arg(long)]
    pub all: bool,

    /// Print the plan as JSON
    #[arg(long = "as-json")]
    pub as_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Snapshot the project's local tree now
    Create {
        project: String,
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List snapshots, newest first
    List { project: String },

    /// Compare two snapshots
    Diff {
        project: String,
        from: String,
        to: String,
    },

    /// Copy backed-up files from a snapshot into the local tree
    Restore {
        project: String,
        snapshot: String,

        /// Restore only these paths
        #[arg(long = "path", action = clap::ArgAction::Append)]
        paths: Vec<String>,
    },

    /// Delete a snapshot and its backups
    Delete { project: String, snapshot: String },
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Forget every signature so the next sync uploads everything
    Clear { project: String },
}

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Create or replace a project record
    Init(ProjectInitArgs),

    /// Show a project record
    Show { project: String },

    /// List projects
    List,
}

#[derive(Args, Debug)]
pub struct ProjectInitArgs {
    /// Project id
    pub id: String,

    /// Local site directory
    #[arg(long)]
    pub root: PathBuf,

    /// ftp, ftps or sftp
    #[arg(long, default_value = "sftp")]
    pub protocol: Protocol,

    #[arg(long)]
    pub host: String,

    /// Port [default: protocol default]
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long)]
    pub user: String,

    /// Base directory on the remote side
    #[arg(long, default_value = "/")]
    pub remote_path: String,

    /// Exclude pattern (gitignore style, repeatable)
    #[arg(long = "exclude", action = clap::ArgAction::Append)]
    pub exclude: Vec<String>,
}

impl ProjectInitArgs {
    pub fn to_project(&self) -> ProjectConfig {
        let mut endpoint = Endpoint::new(self.protocol, &self.host, &self.user, &self.remote_path);
        if let Some(port) = self.port {
            endpoint.port = port;
        }
        let rules = if self.exclude.is_empty() {
            SyncRules::disabled()
        } else {
            SyncRules::new(self.exclude.clone())
        };
        ProjectConfig::new(&self.id, &self.root)
            .with_endpoint(endpoint)
            .with_rules(rules)
    }
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show the configuration file path
    #[arg(long)]
    pub path: bool,

    /// Create default configuration file
    #[arg(long)]
    pub init: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync() {
        let cli = Cli::parse_from([
            "sitesync",
            "-vv",
            "sync",
            "blog",
            "--remote-root",
            "/srv/www",
            "-j",
            "4",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.remote.project, "blog");
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.connections, 4);
    }

    #[test]
    fn test_project_init_builds_record() {
        let cli = Cli::parse_from([
            "sitesync",
            "project",
            "init",
            "blog",
            "--root",
            "/home/me/blog",
            "--protocol",
            "ftp",
            "--host",
            "example.com",
            "--user",
            "me",
            "--exclude",
            "*.log",
        ]);
        let Commands::Project(ProjectCommand::Init(args)) = cli.command else {
            panic!("expected project init");
        };
        let project = args.to_project();
        let endpoint = project.endpoint.unwrap();
        assert_eq!(endpoint.port, 21);
        assert!(project.rules.enabled);
        assert!(endpoint.validate().is_ok());
    }
}
