//! Viewer configuration for content loading and memory limits.
//!
//! Configuration can be created programmatically, loaded from environment
//! variables, or read from a JSON file. Missing keys fall back to defaults.

use crate::picture::{DisplayPolicy, Size};
use folio_cache::MemoryBudgetConfig;
use folio_scheduler::{num_cpus, WorkerPoolConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

const MB: usize = 1024 * 1024;

/// Configuration for the loading engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Resident memory limit for decoded content, in bytes
    pub memory_limit: usize,
    /// Utilization the memory pool is trimmed down to (0.0 to 1.0)
    pub target_utilization: f64,
    /// Largest display size of a picture
    pub max_display_size: Size,
    /// Decode no larger than `max_display_size`
    pub limit_source_size: bool,
    /// Edge length of thumbnails in pixels
    pub thumbnail_size: u32,
    /// How deep folders and nested archives are searched for a cover image
    pub archive_search_depth: usize,
    /// Number of concurrent page loads
    pub load_workers: usize,
    /// Keep extracted archive bytes in memory for reuse by thumbnails
    pub cache_archive_streams: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            memory_limit: 512 * MB,
            target_utilization: 0.8,
            max_display_size: Size::new(4096, 4096),
            limit_source_size: false,
            thumbnail_size: 256,
            archive_search_depth: 2,
            load_workers: num_cpus(),
            cache_archive_streams: true,
        }
    }
}

impl ViewerConfig {
    /// Sets the memory limit in megabytes.
    pub fn with_memory_limit_mb(mut self, mb: usize) -> Self {
        self.memory_limit = mb * MB;
        self
    }

    /// Sets the memory limit in bytes.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Sets the target utilization after trimming (0.0 to 1.0).
    pub fn with_target_utilization(mut self, target: f64) -> Self {
        self.target_utilization = target.clamp(0.0, 1.0);
        self
    }

    /// Sets the maximum display size.
    pub fn with_max_display_size(mut self, width: u32, height: u32) -> Self {
        self.max_display_size = Size::new(width, height);
        self
    }

    /// Enables or disables decoding at display size.
    pub fn with_limit_source_size(mut self, limit: bool) -> Self {
        self.limit_source_size = limit;
        self
    }

    /// Sets the thumbnail edge length.
    pub fn with_thumbnail_size(mut self, size: u32) -> Self {
        self.thumbnail_size = size.max(1);
        self
    }

    /// Sets the cover-image search depth.
    pub fn with_archive_search_depth(mut self, depth: usize) -> Self {
        self.archive_search_depth = depth;
        self
    }

    /// Sets the number of concurrent page loads.
    pub fn with_load_workers(mut self, workers: usize) -> Self {
        self.load_workers = workers.max(1);
        self
    }

    /// Enables or disables archive stream caching.
    pub fn with_cache_archive_streams(mut self, enabled: bool) -> Self {
        self.cache_archive_streams = enabled;
        self
    }

    /// Display policy derived from this configuration.
    pub fn display_policy(&self) -> DisplayPolicy {
        DisplayPolicy {
            max_size: self.max_display_size,
            limit_source_size: self.limit_source_size,
        }
    }

    /// Memory budget derived from this configuration.
    pub fn memory_budget(&self) -> MemoryBudgetConfig {
        let warning = (self.target_utilization + 0.05).min(1.0);
        MemoryBudgetConfig::default()
            .with_total_budget(self.memory_limit)
            .with_target_utilization(self.target_utilization)
            .with_warning_threshold(warning)
    }

    /// Worker pool configuration derived from this configuration.
    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.load_workers)
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FOLIO_MEMORY_LIMIT_MB`: memory limit in MB (default: 512)
    /// - `FOLIO_MAX_DISPLAY_WIDTH`, `FOLIO_MAX_DISPLAY_HEIGHT`: display clamp (default: 4096)
    /// - `FOLIO_LIMIT_SOURCE_SIZE`: `true`/`false`/`1`/`0` (default: false)
    /// - `FOLIO_THUMBNAIL_SIZE`: thumbnail edge in pixels (default: 256)
    /// - `FOLIO_ARCHIVE_SEARCH_DEPTH`: cover search depth (default: 2)
    /// - `FOLIO_LOAD_WORKERS`: concurrent loads (default: CPU count)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(mb) = env_parse::<usize>("FOLIO_MEMORY_LIMIT_MB")? {
            config.memory_limit = mb * MB;
        }
        if let Some(width) = env_parse::<u32>("FOLIO_MAX_DISPLAY_WIDTH")? {
            config.max_display_size.width = width;
        }
        if let Some(height) = env_parse::<u32>("FOLIO_MAX_DISPLAY_HEIGHT")? {
            config.max_display_size.height = height;
        }
        if let Ok(value) = std::env::var("FOLIO_LIMIT_SOURCE_SIZE") {
            config.limit_source_size = parse_bool(&value)
                .ok_or_else(|| ConfigError::InvalidValue("FOLIO_LIMIT_SOURCE_SIZE".to_string()))?;
        }
        if let Some(size) = env_parse::<u32>("FOLIO_THUMBNAIL_SIZE")? {
            config = config.with_thumbnail_size(size);
        }
        if let Some(depth) = env_parse::<usize>("FOLIO_ARCHIVE_SEARCH_DEPTH")? {
            config.archive_search_depth = depth;
        }
        if let Some(workers) = env_parse::<usize>("FOLIO_LOAD_WORKERS")? {
            config = config.with_load_workers(workers);
        }

        Ok(config)
    }

    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    /// Parses configuration from a JSON string. Unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    /// Saves configuration to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&self.target_utilization) {
            return Err(ConfigError::InvalidValue("target_utilization".to_string()));
        }
        if self.load_workers == 0 {
            return Err(ConfigError::InvalidValue("load_workers".to_string()));
        }
        if self.thumbnail_size == 0 {
            return Err(ConfigError::InvalidValue("thumbnail_size".to_string()));
        }
        Ok(self)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("Invalid value for configuration key: {0}")]
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Malformed JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
