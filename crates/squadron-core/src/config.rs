//! Configuration resolution for Squadron.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/squadron/settings.json)
//! 3. Project config (.squadron/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete Squadron configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub session: SessionHostConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            retry: RetryConfig::default(),
            session: SessionHostConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Orchestrator-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of agent executions running at once.
    pub max_concurrency: usize,
    /// Maximum number of agents the selector returns for one task.
    pub max_candidates: usize,
    /// Minimum capability score an agent needs to be selected.
    pub min_relevance: u32,
    /// Per-attempt timeout when neither the task nor the agent sets one.
    pub default_timeout_secs: u64,
    /// How long `shutdown_all` waits for executing agents.
    pub shutdown_grace_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_candidates: 5,
            min_relevance: 1,
            default_timeout_secs: 300,
            shutdown_grace_secs: 10,
        }
    }
}

impl RuntimeConfig {
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Retry/backoff defaults applied to every agent without an override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base * 2^n`.
    pub backoff_base_ms: u64,
    /// Upper bound on any single backoff delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
            max_backoff_ms: 60_000,
        }
    }
}

/// Session host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionHostConfig {
    /// Interval between status polls.
    pub poll_interval_ms: u64,
    /// Session timeout after which pending panes are failed.
    pub timeout_secs: u64,
    /// Grace period between SIGTERM and SIGKILL on teardown.
    pub terminate_grace_secs: u64,
}

impl Default for SessionHostConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            timeout_secs: 30 * 60,
            terminate_grace_secs: 5,
        }
    }
}

impl SessionHostConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let project = project_dir.map(|dir| dir.join(".squadron").join("settings.json"));
    let layers: Vec<PathBuf> = global_config_path()
        .into_iter()
        .chain(project)
        .filter(|path| path.exists())
        .collect();

    let mut config = resolve_layers(layers.iter().map(PathBuf::as_path))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Overlay config files on the defaults, lowest priority first.
///
/// Layers merge key by key: a file only overrides the fields it sets.
pub fn resolve_layers<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;
    for path in paths {
        merge_values(&mut merged, read_config_layer(path)?);
    }
    Ok(serde_json::from_value(merged)?)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".squadron").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/squadron/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("squadron").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    resolve_layers([path])
}

/// Read one layer as a raw JSON tree, rejecting files that are not a valid
/// (possibly partial) config.
fn read_config_layer(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let parse_error = |e: serde_json::Error| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    };
    let layer: Value = serde_json::from_str(&content).map_err(parse_error)?;
    serde_json::from_value::<Config>(layer.clone()).map_err(parse_error)?;
    Ok(layer)
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("SQUADRON_MAX_CONCURRENCY").and_then(|v| v.parse().ok()) {
        config.runtime.max_concurrency = n;
    }
    if let Some(n) = var("SQUADRON_MAX_CANDIDATES").and_then(|v| v.parse().ok()) {
        config.runtime.max_candidates = n;
    }
    if let Some(n) = var("SQUADRON_DEFAULT_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.runtime.default_timeout_secs = n;
    }
    if let Some(n) = var("SQUADRON_SHUTDOWN_GRACE_SECS").and_then(|v| v.parse().ok()) {
        config.runtime.shutdown_grace_secs = n;
    }
    if let Some(n) = var("SQUADRON_MAX_RETRIES").and_then(|v| v.parse().ok()) {
        config.retry.max_retries = n;
    }
    if let Some(n) = var("SQUADRON_BACKOFF_BASE_MS").and_then(|v| v.parse().ok()) {
        config.retry.backoff_base_ms = n;
    }
    if let Some(val) = var("SQUADRON_LOG_LEVEL") {
        config.log_level = val;
    }
}
