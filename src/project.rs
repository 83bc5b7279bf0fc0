//! Project records, remote endpoints and credentials

use crate::error::{Error, Result};
use crate::persist::{read_json, record_stem, remove_record, write_json_atomic};
use crate::sync::rules::SyncRules;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Wire protocol spoken by the hosting endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ftp,
    Ftps,
    Sftp,
}

impl Protocol {
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Ftp | Protocol::Ftps => 21,
            Protocol::Sftp => 22,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Ftp => "ftp",
            Protocol::Ftps => "ftps",
            Protocol::Sftp => "sftp",
        })
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "ftps" => Ok(Protocol::Ftps),
            "sftp" => Ok(Protocol::Sftp),
            other => Err(Error::config(format!("unknown protocol: {}", other))),
        }
    }
}

/// Where and how to reach a project's hosting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: String,

    /// Base directory on the remote side
    pub remote_path: String,

    /// FTP passive mode
    #[serde(default = "default_true")]
    pub passive: bool,

    /// Accept self-signed or otherwise invalid TLS certificates (FTPS)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_true() -> bool {
    true
}

impl Endpoint {
    pub fn new(
        protocol: Protocol,
        host: impl Into<String>,
        username: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            protocol,
            host: host.into(),
            port: protocol.default_port(),
            username: username.into(),
            remote_path: remote_path.into(),
            passive: true,
            accept_invalid_certs: false,
        }
    }

    /// Check that the endpoint can be connected to
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("endpoint host is empty"));
        }
        if self.username.trim().is_empty() {
            return Err(Error::config("endpoint username is empty"));
        }
        if self.remote_path.trim().is_empty() {
            return Err(Error::config("endpoint remote path is empty"));
        }
        if self.port == 0 {
            return Err(Error::config("endpoint port is 0"));
        }
        Ok(())
    }

    /// `protocol://user@host:port/path`, for logs
    pub fn display_url(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.protocol,
            self.username,
            self.host,
            self.port,
            self.remote_path.trim_start_matches('/')
        )
    }
}

/// A local site and where it syncs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    pub local_root: PathBuf,

    #[serde(default)]
    pub endpoint: Option<Endpoint>,

    #[serde(default)]
    pub rules: SyncRules,

    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl ProjectConfig {
    pub fn new(id: impl Into<String>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            local_root: local_root.into(),
            endpoint: None,
            rules: SyncRules::default(),
            last_sync_at: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_rules(mut self, rules: SyncRules) -> Self {
        self.rules = rules;
        self
    }
}

/// Persistence for project records
pub trait ProjectStore: Send + Sync {
    fn load(&self, project_id: &str) -> Result<Option<ProjectConfig>>;
    fn save(&self, project: &ProjectConfig) -> Result<()>;
    fn list(&self) -> Result<Vec<ProjectConfig>>;
    fn delete(&self, project_id: &str) -> Result<()>;
}

/// One JSON file per project under `data_dir/projects`
#[derive(Debug, Clone)]
pub struct JsonProjectStore {
    dir: PathBuf,
}

impl JsonProjectStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("projects"),
        }
    }

    fn record_path(&self, project_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", record_stem(project_id)))
    }
}

impl ProjectStore for JsonProjectStore {
    fn load(&self, project_id: &str) -> Result<Option<ProjectConfig>> {
        let path = self.record_path(project_id);
        match read_json::<ProjectConfig>(&path)? {
            Some(project) if project.id != project_id => Err(Error::config(format!(
                "project record {} belongs to {:?}, not {:?}",
                path.display(),
                project.id,
                project_id
            ))),
            loaded => Ok(loaded),
        }
    }

    fn save(&self, project: &ProjectConfig) -> Result<()> {
        if project.id.trim().is_empty() {
            return Err(Error::config("project id is empty"));
        }
        write_json_atomic(&self.record_path(&project.id), project)
    }

    fn list(&self) -> Result<Vec<ProjectConfig>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io("listing projects", e)),
        };

        let mut projects = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::io("listing projects", e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match read_json::<ProjectConfig>(&path) {
                    Ok(Some(p)) => projects.push(p),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable project record")
                    }
                }
            }
        }
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }

    fn delete(&self, project_id: &str) -> Result<()> {
        remove_record(&self.record_path(project_id))
    }
}

/// Source of connection passwords
pub trait CredentialProvider: Send + Sync {
    fn get_secret(&self, project_id: &str) -> Result<Option<String>>;
    fn put_secret(&self, project_id: &str, secret: &str) -> Result<()>;
}

/// Process-local secrets, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    secrets: DashMap<String, String>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialProvider for MemoryCredentials {
    fn get_secret(&self, project_id: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(project_id).map(|s| s.value().clone()))
    }

    fn put_secret(&self, project_id: &str, secret: &str) -> Result<()> {
        self.secrets
            .insert(project_id.to_string(), secret.to_string());
        Ok(())
    }
}

/// Reads `SITESYNC_PASSWORD_<PROJECT>`, falling back to `SITESYNC_PASSWORD`
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl EnvCredentials {
    /// Variable name for a project (`my-site` -> `SITESYNC_PASSWORD_MY_SITE`)
    pub fn var_name(project_id: &str) -> String {
        let suffix: String = project_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("SITESYNC_PASSWORD_{}", suffix)
    }
}

impl CredentialProvider for EnvCredentials {
    fn get_secret(&self, project_id: &str) -> Result<Option<String>> {
        Ok(std::env::var(Self::var_name(project_id))
            .or_else(|_| std::env::var("SITESYNC_PASSWORD"))
            .ok())
    }

    fn put_secret(&self, _project_id: &str, _secret: &str) -> Result<()> {
        Err(Error::config(
            "environment credentials are read-only; export SITESYNC_PASSWORD instead",
        ))
    }
}
