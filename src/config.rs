//! Server configuration.
//!
//! Loaded from a YAML document (path in `KILN_CONFIG`, default `kiln.yaml`)
//! with environment overrides applied on top. A missing file is not an error;
//! every field has a default.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "kiln.yaml";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("port {0} is reserved; use 0 or a port >= 1024")]
    ReservedPort(u16),
    #[error("trigger mode must be 0..=3, got {0}")]
    TriggerMode(u8),
    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub static_files: StaticFilesConfig,
    pub log: LogConfig,
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// 0 binds an ephemeral port.
    pub port: u16,
    /// 0: both level-triggered, 1: connections edge-triggered,
    /// 2: listener edge-triggered, 3: both edge-triggered.
    pub trigger_mode: u8,
    /// Idle eviction deadline; 0 disables eviction.
    pub idle_timeout_ms: u64,
    /// Graceful close: linger up to one second for unsent data.
    pub linger: bool,
    pub workers: usize,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1316,
            trigger_mode: 3,
            idle_timeout_ms: 60_000,
            linger: false,
            workers: 6,
            max_connections: 65_536,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    pub root: PathBuf,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./resources"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub level: String,
    /// Directory for daily-rolling log files; stdout when unset.
    pub dir: Option<PathBuf>,
    /// Lines buffered ahead of the writer thread; 0 writes synchronously.
    pub queue_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            dir: None,
            queue_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

impl Config {
    /// Reads the YAML file named by `KILN_CONFIG` (or `kiln.yaml`), then
    /// applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("KILN_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::from_file_or_default(Path::new(&path))?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(port) = std::env::var("KILN_PORT") {
            self.server.port = port.parse().context("KILN_PORT")?;
        }
        if let Ok(root) = std::env::var("KILN_ROOT") {
            self.static_files.root = PathBuf::from(root);
        }
        if let Ok(mode) = std::env::var("KILN_TRIGGER_MODE") {
            self.server.trigger_mode = mode.parse().context("KILN_TRIGGER_MODE")?;
        }
        if let Ok(ms) = std::env::var("KILN_TIMEOUT_MS") {
            self.server.idle_timeout_ms = ms.parse().context("KILN_TIMEOUT_MS")?;
        }
        if let Ok(n) = std::env::var("KILN_WORKERS") {
            self.server.workers = n.parse().context("KILN_WORKERS")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.port != 0 && server.port < 1024 {
            return Err(ConfigError::ReservedPort(server.port));
        }
        if server.trigger_mode > 3 {
            return Err(ConfigError::TriggerMode(server.trigger_mode));
        }
        if server.workers == 0 {
            return Err(ConfigError::Zero("workers"));
        }
        if server.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
