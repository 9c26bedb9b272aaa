//! Configuration for the handoff dispatcher and its demo host.
//!
//! ```toml
//! [dispatcher]
//! slow_item_warn_ms = 50
//! large_batch_warn = 1024
//!
//! [host]
//! tick_interval_ms = 16
//! run_ticks = 600
//! ```
//!
//! Every section and key is optional. The file lives at `$HANDOFF_CONFIG`
//! or `~/.handoff/config.toml`; `HANDOFF_TICK_MS` and `HANDOFF_RUN_TICKS`
//! override the host section.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use handoff_core::{DEFAULT_LARGE_BATCH_WARN, DispatcherOptions};

pub const CONFIG_ENV: &str = "HANDOFF_CONFIG";
pub const TICK_MS_ENV: &str = "HANDOFF_TICK_MS";
pub const RUN_TICKS_ENV: &str = "HANDOFF_RUN_TICKS";

const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffConfig {
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    #[serde(default)]
    pub host: HostSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherSection {
    /// Warn when one work item runs longer than this many milliseconds.
    pub slow_item_warn_ms: Option<u64>,
    /// Warn when a single tick drains more items than this.
    #[serde(default = "default_large_batch_warn")]
    pub large_batch_warn: usize,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            slow_item_warn_ms: None,
            large_batch_warn: DEFAULT_LARGE_BATCH_WARN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSection {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Stop the host loop after this many ticks. Runs until interrupted
    /// when absent.
    pub run_ticks: Option<u64>,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            run_ticks: None,
        }
    }
}

const fn default_large_batch_warn() -> usize {
    DEFAULT_LARGE_BATCH_WARN
}

const fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

impl HandoffConfig {
    /// Load from the default location. A missing file yields `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(Some(config))
    }

    /// Apply `HANDOFF_TICK_MS` / `HANDOFF_RUN_TICKS` from the process
    /// environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are
    /// logged and ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_override(&lookup, TICK_MS_ENV) {
            self.host.tick_interval_ms = ms;
        }
        if let Some(ticks) = parse_override(&lookup, RUN_TICKS_ENV) {
            self.host.run_ticks = Some(ticks);
        }
        self
    }

    #[must_use]
    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            slow_item_warn: self
                .dispatcher
                .slow_item_warn_ms
                .map(Duration::from_millis),
            large_batch_warn: self.dispatcher.large_batch_warn,
        }
    }

    /// Host loop cadence. Clamped to at least one millisecond.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.host.tick_interval_ms.max(1))
    }
}

fn parse_override(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid override: {err}");
            None
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(explicit));
    }
    dirs::home_dir().map(|home| home.join(".handoff").join("config.toml"))
}
