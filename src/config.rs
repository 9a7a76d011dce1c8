//! Engine configuration.
//!
//! Settings come from a JSON file (explicit path, then `$EXTSCRIPT_CONFIG_PATH`,
//! else built-in defaults), followed by a handful of environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connectors::http::HttpClientConfig;
use crate::error::{Error, Result};
use crate::extensions_js::RuntimeLimits;

pub const CONFIG_PATH_ENV: &str = "EXTSCRIPT_CONFIG_PATH";
pub const ARTIFACT_IDLE_ENV: &str = "EXTSCRIPT_ARTIFACT_IDLE_SECS";
pub const ASYNC_QUEUE_IDLE_ENV: &str = "EXTSCRIPT_ASYNC_QUEUE_IDLE_SECS";
pub const MAX_EXECUTION_ENV: &str = "EXTSCRIPT_MAX_EXECUTION_MS";

const DEFAULT_ARTIFACT_IDLE_SECS: u64 = 12 * 60 * 60;
const DEFAULT_ASYNC_QUEUE_IDLE_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compiled artifacts unused for this long are evicted.
    #[serde(alias = "artifactIdleSecs")]
    pub artifact_idle_secs: u64,

    /// Async queues without work for this long shut their worker down.
    #[serde(alias = "asyncQueueIdleSecs")]
    pub async_queue_idle_secs: u64,

    /// Wall-clock budget per invocation; unlimited when unset.
    #[serde(alias = "maxExecutionMs")]
    pub max_execution_ms: Option<u64>,

    /// QuickJS heap limit per invocation; unlimited when unset.
    #[serde(alias = "memoryLimitBytes")]
    pub memory_limit_bytes: Option<usize>,

    pub http: HttpClientConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            artifact_idle_secs: DEFAULT_ARTIFACT_IDLE_SECS,
            async_queue_idle_secs: DEFAULT_ASYNC_QUEUE_IDLE_SECS,
            max_execution_ms: None,
            memory_limit_bytes: None,
            http: HttpClientConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `config_path`, `$EXTSCRIPT_CONFIG_PATH` or defaults, then
    /// apply environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(config_path, env_lookup)
    }

    fn load_with_env<F>(config_path: Option<&Path>, get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = config_path
            .map(Path::to_path_buf)
            .or_else(|| get_env(CONFIG_PATH_ENV).map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(get_env)?;
        debug!(
            event = "config.loaded",
            artifact_idle_secs = config.artifact_idle_secs,
            async_queue_idle_secs = config.async_queue_idle_secs,
            "Loaded engine configuration"
        );
        Ok(config)
    }

    /// Read a settings file; a missing or blank file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse settings file {}: {e}",
                path.display()
            ))
        })?;
        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, get_env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = parse_env_u64(&get_env, ARTIFACT_IDLE_ENV)? {
            self.artifact_idle_secs = secs;
        }
        if let Some(secs) = parse_env_u64(&get_env, ASYNC_QUEUE_IDLE_ENV)? {
            self.async_queue_idle_secs = secs;
        }
        if let Some(ms) = parse_env_u64(&get_env, MAX_EXECUTION_ENV)? {
            self.max_execution_ms = (ms > 0).then_some(ms);
        }
        Ok(())
    }

    pub const fn artifact_idle(&self) -> Duration {
        Duration::from_secs(self.artifact_idle_secs)
    }

    pub const fn async_queue_idle(&self) -> Duration {
        Duration::from_secs(self.async_queue_idle_secs)
    }

    pub fn runtime_limits(&self) -> RuntimeLimits {
        RuntimeLimits {
            max_execution: self.max_execution_ms.map(Duration::from_millis),
            memory_limit_bytes: self.memory_limit_bytes,
        }
    }
}

fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

fn parse_env_u64<F>(get_env: &F, var: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|e| Error::config(format!("{var}={raw:?} is not a non-negative integer: {e}")))
}
