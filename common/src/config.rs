//! Bridge configuration: one YAML file per bridge under `~/.rainbow/<id>/`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::account::AccountId;

/// Directory (under the home directory) holding one folder per bridge.
pub const CONFIG_ROOT_DIR: &str = ".rainbow";
/// File name of a bridge configuration inside its folder.
pub const CONFIG_FILE_NAME: &str = "config.yml";

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_PREFIX: &str = "bridge_monitor_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot determine home directory")]
    NoHomeDir,
    #[error("No configuration found in {}", .0.display())]
    NotFound(PathBuf),
    #[error("Multiple configurations found: {}", display_paths(.0))]
    Multiple(Vec<PathBuf>),
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Schema ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    pub monitor: MonitorConfig,
    pub near: NearConfig,
    pub eth: EthConfig,
    pub contracts: ContractsConfig,
    pub eth2near: Eth2NearConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self { log_level: default_log_level() }
    }
}

impl GlobalConfig {
    /// Map `logLevel` onto a `tracing` level name. Accepts the bridge
    /// tooling's names as well (`silly`, `fatal`).
    pub fn tracing_level(&self) -> &'static str {
        level_name(&self.log_level).unwrap_or("info")
    }
}

fn level_name(level: &str) -> Option<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "silly" | "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" => Some("warn"),
        "error" | "fatal" => Some("error"),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Milliseconds between the end of one cycle and the start of the next.
    /// Older bridge configs call this `timeout`.
    #[serde(alias = "timeout")]
    pub interval: u64,
    /// Per-provider deadline in milliseconds.
    #[serde(default)]
    pub provider_timeout: Option<u64>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn provider_timeout(&self) -> Option<Duration> {
        self.provider_timeout.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearConfig {
    #[serde(default)]
    pub network_id: Option<String>,
    pub node_url: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthConfig {
    pub rpc_url: Url,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub near: NearContracts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearContracts {
    /// Ethereum light client deployed on NEAR.
    pub client: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eth2NearConfig {
    pub relayer: AccountId,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

// ── Loading ─────────────────────────────────────────────────────────

impl BridgeConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if level_name(&self.global.log_level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "global.logLevel `{}` is not a known level",
                self.global.log_level
            )));
        }
        if self.monitor.interval == 0 {
            return Err(ConfigError::Invalid("monitor.interval must be greater than zero".into()));
        }
        if self.monitor.provider_timeout == Some(0) {
            return Err(ConfigError::Invalid(
                "monitor.providerTimeout must be greater than zero".into(),
            ));
        }
        if !is_metric_prefix(&self.monitor.prefix) {
            return Err(ConfigError::Invalid(format!(
                "monitor.prefix `{}` is not a valid metric name prefix",
                self.monitor.prefix
            )));
        }
        check_url("near.nodeUrl", &self.near.node_url)?;
        check_url("eth.rpcUrl", &self.eth.rpc_url)?;
        Ok(())
    }
}

fn is_metric_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        None => true,
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        Some(_) => false,
    }
}

fn check_url(field: &str, url: &Url) -> Result<(), ConfigError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!("{field} `{url}` is not an http(s) URL")));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::Invalid(format!("{field} `{url}` has no host")));
    }
    Ok(())
}

// ── Discovery ───────────────────────────────────────────────────────

/// `~/.rainbow`
pub fn default_root() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_ROOT_DIR))
        .ok_or(ConfigError::NoHomeDir)
}

/// List every `<root>/<bridge>/config.yml` that exists, sorted by path.
pub fn find_configs(root: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ConfigError::Io { path: root.to_path_buf(), source });
        }
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join(CONFIG_FILE_NAME))
        .filter(|candidate| candidate.is_file())
        .collect();
    found.sort();
    Ok(found)
}

/// Pick the configuration file to use.
///
/// An explicit path wins, then a bridge id (`<root>/<id>/config.yml`), then
/// the single configuration found under `root`.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    bridge_id: Option<&str>,
    root: &Path,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(id) = bridge_id {
        let path = root.join(id).join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Err(ConfigError::NotFound(path));
        }
        return Ok(path);
    }

    let mut found = find_configs(root)?;
    match found.len() {
        0 => Err(ConfigError::NotFound(root.to_path_buf())),
        1 => Ok(found.remove(0)),
        _ => Err(ConfigError::Multiple(found)),
    }
}
