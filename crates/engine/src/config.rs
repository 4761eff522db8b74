use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::database::{DatabaseOptions, SqliteDatabase};
use crate::error::BridgeResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub executor: ExecutorSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Tasks allowed to run at once; further requests wait for a slot
    pub max_concurrent_tasks: usize,
    /// Time a task gets to emit its response (0 = no limit)
    pub request_timeout_ms: u64,
    /// Largest request body accepted before any handle is allocated
    pub max_body_bytes: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: num_cpus::get().max(1),
            request_timeout_ms: 30_000,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ExecutorSettings {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub readonly: bool,
    pub create: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            readonly: false,
            create: true,
        }
    }
}

impl DatabaseSettings {
    pub fn options(&self) -> DatabaseOptions {
        DatabaseOptions {
            readonly: self.readonly,
            create: self.create,
        }
    }

    pub fn open(&self) -> BridgeResult<SqliteDatabase> {
        SqliteDatabase::open(&self.path, self.options())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl BridgeConfig {
    /// Load a TOML config file. Missing sections and keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults overlaid with environment variables.
    ///
    /// Environment variables:
    /// - BRIDGE_MAX_TASKS: Max concurrently running tasks
    /// - BRIDGE_REQUEST_TIMEOUT_MS: Response deadline in ms (0 = none)
    /// - BRIDGE_MAX_BODY_BYTES: Request body limit
    /// - BRIDGE_DATABASE_PATH: SQLite path or `:memory:`
    /// - BRIDGE_DATABASE_READONLY: Open the database read-only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("BRIDGE_MAX_TASKS").and_then(|s| s.parse().ok()) {
            self.executor.max_concurrent_tasks = value;
        }
        if let Some(value) = lookup("BRIDGE_REQUEST_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            self.executor.request_timeout_ms = value;
        }
        if let Some(value) = lookup("BRIDGE_MAX_BODY_BYTES").and_then(|s| s.parse().ok()) {
            self.executor.max_body_bytes = value;
        }
        if let Some(path) = lookup("BRIDGE_DATABASE_PATH") {
            self.database.path = path;
        }
        if let Some(value) = lookup("BRIDGE_DATABASE_READONLY") {
            self.database.readonly = value != "false" && value != "0";
        }
        if self.executor.max_concurrent_tasks == 0 {
            tracing::warn!("BRIDGE_MAX_TASKS must be at least 1; using 1");
            self.executor.max_concurrent_tasks = 1;
        }
    }
}
