// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Values come from an optional YAML file and are then overridden by
//! `NODEFLOW_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::flow::mcp::McpServerConfig;
use crate::flow::Result;
use crate::sdk::FlowError;

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "nodeflow.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nodes of one run executing at the same time
    pub max_concurrency: usize,
    /// Default per-node timeout
    pub node_timeout_secs: u64,
    /// Per node type timeout overrides
    pub node_timeouts: HashMap<String, u64>,
    /// Whole-run timeout; none means runs are unbounded
    pub run_timeout_secs: Option<u64>,
    /// SQLite database path; none keeps executions in memory
    pub database: Option<PathBuf>,
    /// Directory of definitions loaded into the catalog at start
    pub workflows_dir: Option<PathBuf>,
    pub server: ServerConfig,
    pub mcp_servers: Vec<McpServerConfig>,
    pub retention: RetentionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            node_timeout_secs: 300,
            node_timeouts: HashMap::new(),
            run_timeout_secs: None,
            database: None,
            workflows_dir: None,
            server: ServerConfig::default(),
            mcp_servers: Vec::new(),
            retention: RetentionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Terminal executions older than this are pruned by `prune_executions`
    pub max_age_days: Option<u64>,
}

impl EngineConfig {
    /// Load from `path`, or from `nodeflow.yaml` if it exists, then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply `NODEFLOW_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NODEFLOW_MAX_CONCURRENCY") {
            self.max_concurrency = parse_env("NODEFLOW_MAX_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("NODEFLOW_NODE_TIMEOUT_SECS") {
            self.node_timeout_secs = parse_env("NODEFLOW_NODE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("NODEFLOW_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = Some(parse_env("NODEFLOW_RUN_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("NODEFLOW_DATABASE") {
            self.database = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("NODEFLOW_WORKFLOWS_DIR") {
            self.workflows_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("NODEFLOW_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("NODEFLOW_PORT") {
            self.server.port = parse_env("NODEFLOW_PORT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(FlowError::config("max_concurrency must be at least 1"));
        }
        if self.node_timeout_secs == 0 {
            return Err(FlowError::config("node_timeout_secs must be at least 1"));
        }
        if let Some((node_type, _)) = self.node_timeouts.iter().find(|(_, secs)| **secs == 0) {
            return Err(FlowError::config(format!(
                "node_timeouts.{} must be at least 1",
                node_type
            )));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(FlowError::config("run_timeout_secs must be at least 1"));
        }
        let mut names = std::collections::HashSet::new();
        for server in &self.mcp_servers {
            if !names.insert(server.name.as_str()) {
                return Err(FlowError::config(format!(
                    "MCP server '{}' is configured twice",
                    server.name
                )));
            }
        }
        Ok(())
    }

    /// Timeout applied to one invocation of `node_type`
    pub fn node_timeout(&self, node_type: &str) -> Duration {
        let secs = self
            .node_timeouts
            .get(node_type)
            .copied()
            .unwrap_or(self.node_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FlowError::config(format!("Invalid value for {}: '{}'", key, value)))
}
