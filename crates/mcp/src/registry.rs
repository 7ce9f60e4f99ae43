//! Handler manifests and the registry built from scanning them.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    tracing::{error, info, warn},
};

use crate::error::{Context, Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How to reach a handler's MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Merged over the inherited environment.
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    #[serde(alias = "websocket")]
    Socket {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Http { .. } => "http",
            Self::Socket { .. } => "socket",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default)]
    pub description: String,
}

/// A loaded handler manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerConfig {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Tools the handler exposes, keyed by tool name.
    pub commands: BTreeMap<String, CommandConfig>,
    pub transport: TransportConfig,
    /// Per-attempt time limit.
    pub timeout: Duration,
    pub max_retries: u32,
}

impl HandlerConfig {
    pub fn new(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            description: String::new(),
            commands: BTreeMap::new(),
            transport,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_command(mut self, tool: impl Into<String>, description: impl Into<String>) -> Self {
        self.commands.insert(tool.into(), CommandConfig {
            description: description.into(),
        });
        self
    }

    pub fn exposes(&self, tool: &str) -> bool {
        self.commands.contains_key(tool)
    }

    pub fn tools(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Parse manifest text. The fields may sit at the top level or under a
    /// `[cattackle]` table.
    pub fn from_manifest_str(raw: &str, origin: &str) -> Result<Self> {
        let manifest_err = |source: toml::de::Error| Error::Manifest {
            path: origin.to_string(),
            source: Box::new(source),
        };

        let mut value: toml::Table = toml::from_str(raw).map_err(manifest_err)?;
        let table = match value.remove("cattackle") {
            Some(toml::Value::Table(nested)) => nested,
            Some(other) => {
                value.insert("cattackle".into(), other);
                value
            },
            None => value,
        };
        let manifest: RawManifest = toml::Value::Table(table)
            .try_into()
            .map_err(manifest_err)?;
        manifest.into_config(origin)
    }

    pub fn from_manifest_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::from_manifest_str(&raw, &path.display().to_string())
    }
}

#[derive(Deserialize)]
struct RawManifest {
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    commands: BTreeMap<String, CommandConfig>,
    mcp: RawMcp,
}

#[derive(Deserialize)]
struct RawMcp {
    transport: TransportConfig,
    #[serde(default)]
    timeout: Option<f64>,
    #[serde(default)]
    max_retries: Option<u32>,
}

impl RawManifest {
    fn into_config(self, origin: &str) -> Result<HandlerConfig> {
        if self.name.trim().is_empty() {
            return Err(Error::message(format!("{origin}: handler name is empty")));
        }
        let timeout = match self.mcp.timeout {
            None => DEFAULT_TIMEOUT,
            Some(secs) if secs > 0.0 => Duration::try_from_secs_f64(secs)
                .map_err(|e| Error::external(format!("{origin}: invalid mcp.timeout"), e))?,
            Some(secs) => {
                return Err(Error::message(format!(
                    "{origin}: mcp.timeout must be positive, got {secs}"
                )));
            },
        };

        Ok(HandlerConfig {
            name: self.name,
            version: self.version,
            description: self.description,
            commands: self.commands,
            transport: self.mcp.transport,
            timeout,
            max_retries: self.mcp.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }
}

/// Handlers discovered on disk, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<HandlerConfig>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every manifest named `manifest_name` found in `dir` or its
    /// immediate subdirectories, replacing the current contents. Malformed
    /// manifests are logged and skipped. Returns the number registered.
    pub fn scan(&mut self, dir: &Path, manifest_name: &str) -> usize {
        info!(directory = %dir.display(), "scanning for handlers");
        self.handlers.clear();

        if !dir.exists() {
            warn!(directory = %dir.display(), "handlers directory not found");
            return 0;
        }

        for path in manifest_candidates(dir, manifest_name) {
            match HandlerConfig::from_manifest_file(&path) {
                Ok(config) => {
                    info!(
                        handler = %config.name,
                        commands = ?config.tools().collect::<Vec<_>>(),
                        transport = config.transport.kind(),
                        path = %path.display(),
                        "registered handler"
                    );
                    if let Some(previous) = self.insert(config) {
                        warn!(handler = %previous.name, "duplicate handler name, keeping the later manifest");
                    }
                },
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to load handler manifest");
                },
            }
        }

        for warning in self.warnings() {
            warn!("{warning}");
        }
        info!(found = self.handlers.len(), "handler scan complete");
        self.handlers.len()
    }

    /// Register a handler, returning the one it replaced.
    pub fn insert(&mut self, config: HandlerConfig) -> Option<Arc<HandlerConfig>> {
        self.handlers.insert(config.name.clone(), Arc::new(config))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<HandlerConfig>> {
        self.handlers.get(name)
    }

    /// First handler, in name order, that exposes `tool`.
    pub fn find_by_command(&self, tool: &str) -> Option<&Arc<HandlerConfig>> {
        self.handlers.values().find(|h| h.exposes(tool))
    }

    pub fn find_by_handler_and_tool(
        &self,
        handler: &str,
        tool: &str,
    ) -> Option<&Arc<HandlerConfig>> {
        self.handlers.get(handler).filter(|h| h.exposes(tool))
    }

    /// Tools grouped by handler name.
    pub fn commands(&self) -> BTreeMap<&str, Vec<&str>> {
        self.handlers
            .values()
            .map(|h| (h.name.as_str(), h.tools().collect()))
            .collect()
    }

    pub fn handlers(&self) -> impl Iterator<Item = &Arc<HandlerConfig>> {
        self.handlers.values()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Problems that do not prevent loading but make handlers unreachable.
    pub fn warnings(&self) -> Vec<String> {
        self.handlers
            .keys()
            .filter(|name| name.contains('_'))
            .map(|name| {
                format!(
                    "handler name '{name}' contains '_'; /{name}_<tool> commands will not reach it"
                )
            })
            .collect()
    }
}

fn manifest_candidates(dir: &Path, manifest_name: &str) -> Vec<PathBuf> {
    if dir.is_file() {
        return if dir.file_name().is_some_and(|n| n == manifest_name) {
            vec![dir.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let mut candidates = Vec::new();
    let own = dir.join(manifest_name);
    if own.is_file() {
        candidates.push(own);
    }
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut subdirs: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_dir())
                .collect();
            subdirs.sort();
            candidates.extend(
                subdirs
                    .into_iter()
                    .map(|d| d.join(manifest_name))
                    .filter(|p| p.is_file()),
            );
        },
        Err(e) => warn!(directory = %dir.display(), error = %e, "failed to read handlers directory"),
    }
    candidates
}
