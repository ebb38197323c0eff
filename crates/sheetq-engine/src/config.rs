use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for loading and caching.
///
/// Every field has a default, so a config file only needs to list overrides:
///
/// ```json
/// { "base_batch_size": 2000, "show_images": false }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows read and committed per batch (default: 10 000).
    pub base_batch_size: usize,
    /// Decode pictures for image-bearing columns (default: true).
    pub show_images: bool,
    /// Number of decoded images kept before least-recently-used eviction (default: 200).
    pub image_cache_capacity: usize,
    /// Period of the background cache sweep, in seconds; 0 disables it (default: 300).
    pub image_cache_sweep_secs: u64,
    /// Back off when process memory exceeds this fraction of system memory (default: 0.7).
    pub memory_high_water_fraction: f64,
    /// Per-row soft ceiling on process memory that triggers a cache sweep (default: 200 MiB).
    pub row_memory_soft_limit_bytes: u64,
    /// How often (in rows) the soft ceiling is checked (default: 100).
    pub memory_check_every_rows: u32,
    /// Pause after a high-water reclamation, in milliseconds (default: 50).
    pub memory_backoff_ms: u64,
    /// Minimum time between progress events, in milliseconds (default: 200).
    pub progress_interval_ms: u64,
    /// Largest RGBA buffer a single picture may decode into (default: 64 MiB).
    pub max_decoded_image_bytes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_batch_size: 10_000,
            show_images: true,
            image_cache_capacity: 200,
            image_cache_sweep_secs: 5 * 60,
            memory_high_water_fraction: 0.7,
            row_memory_soft_limit_bytes: 200 * 1024 * 1024,
            memory_check_every_rows: 100,
            memory_backoff_ms: 50,
            progress_interval_ms: 200,
            max_decoded_image_bytes: 64 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.memory_high_water_fraction;
        if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "memory_high_water_fraction must be in (0, 1], got {fraction}"
            )));
        }
        Ok(())
    }

    pub fn batch_size(&self) -> usize {
        self.base_batch_size.max(1)
    }

    pub fn memory_check_every_rows(&self) -> u32 {
        self.memory_check_every_rows.max(1)
    }

    pub fn image_cache_sweep_interval(&self) -> Option<Duration> {
        (self.image_cache_sweep_secs > 0).then(|| Duration::from_secs(self.image_cache_sweep_secs))
    }

    pub fn memory_backoff(&self) -> Duration {
        Duration::from_millis(self.memory_backoff_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "base_batch_size": 250 }"#).unwrap();
        assert_eq!(config.base_batch_size, 250);
        assert_eq!(config.image_cache_capacity, 200);
        assert_eq!(
            config.image_cache_sweep_interval(),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn rejects_out_of_range_fraction() {
        let err = EngineConfig::from_json_str(r#"{ "memory_high_water_fraction": 1.5 }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn zero_values_are_clamped_where_they_would_stall() {
        let config = EngineConfig {
            base_batch_size: 0,
            memory_check_every_rows: 0,
            image_cache_sweep_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.memory_check_every_rows(), 1);
        assert_eq!(config.image_cache_sweep_interval(), None);
    }

    #[test]
    fn reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheetq.json");
        std::fs::write(&path, r#"{ "show_images": false }"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert!(!config.show_images);
    }
}
