//! Application configuration loaded from a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::fs::stream::DEFAULT_CHUNK_SIZE;
use crate::log::DEFAULT_MAX_ENTRIES;
use crate::nav::filter::{SortKey, SortOrder};
use crate::nav::listing::DirectoryEnumerator;
use crate::ops::engine::EngineOptions;
use crate::ops::walker::{OnError, WalkOptions};

/// Top-level application configuration.
///
/// All fields have sensible defaults so droidpane works without a config
/// file. Call [`Config::load`] to read from a TOML path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Loads configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::NotFound`] if the file does not exist.
    /// - [`CoreError::PermissionDenied`] if the file is not readable.
    /// - [`CoreError::ConfigParse`] if the TOML is malformed.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::from_io(e, path))?;
        toml::from_str(&content).map_err(|e| CoreError::ConfigParse(e.to_string()))
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> CoreResult<Self> {
        match Self::load(path) {
            Err(CoreError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Enumerator matching the configured pane defaults.
    pub fn enumerator(&self) -> DirectoryEnumerator {
        DirectoryEnumerator::new(self.general.sort, self.general.order)
            .with_hidden(self.general.show_hidden)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            walk: WalkOptions {
                sort: self.general.sort,
                order: self.general.order,
                chunk_size: self.transfer.chunk_size.max(1),
                on_error: self.transfer.on_error,
            },
            progress_interval: self.transfer.progress_interval(),
        }
    }
}

/// Pane defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default)]
    pub show_hidden: bool,
    #[serde(default)]
    pub sort: SortKey,
    #[serde(default)]
    pub order: SortOrder,
}

/// Remote device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_adb_path")]
    pub adb_path: PathBuf,
    /// Device serial passed as `adb -s`; any single device when unset.
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default = "default_remote_path")]
    pub default_path: PathBuf,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
            default_path: default_remote_path(),
        }
    }
}

/// Copy engine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub on_error: OnError,
}

impl TransferConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
            chunk_size: default_chunk_size(),
            on_error: OnError::default(),
        }
    }
}

/// Diagnostics and activity-log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    /// A `tracing` filter directive such as `debug` or `droidpane_core=trace`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_adb_path() -> PathBuf {
    PathBuf::from("adb")
}

fn default_remote_path() -> PathBuf {
    PathBuf::from("/sdcard")
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_log_file() -> PathBuf {
    PathBuf::from("/tmp/droidpane.log")
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}
