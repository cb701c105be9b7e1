//! Engine configuration, read from TOML.
//!
//! Every section and field has a default, so an empty file yields a working
//! offline-only engine.

use crate::error::AppError;
use photo_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub sync: SyncConfig,
    pub capture: CaptureConfig,
    /// Remote WebDAV endpoint; without it the engine stays local-only
    pub server: Option<ServerConfig>,
    /// Overrides the platform default database location
    pub database_path: Option<PathBuf>,
}

/// Retry and concurrency policy of the photo upload queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Failed attempts after which an item is parked as `failed`
    pub retry_ceiling: u32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Upper bound of uploads in flight at the same time
    pub max_concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 5,
            backoff_base_secs: 30,
            backoff_max_secs: 300,
            max_concurrency: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of background drain cycles while online
    pub interval_secs: u64,
    pub connectivity_debounce_ms: u64,
    /// Device storage budget for queued media
    pub storage_budget_bytes: u64,
    /// Fraction of the budget at which the snapshot reports `storage_nearly_full`
    pub storage_warning_ratio: f32,
    /// Period of the reachability probe used by the agent binary
    pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            connectivity_debounce_ms: 1500,
            storage_budget_bytes: 200 * 1024 * 1024,
            storage_warning_ratio: 0.9,
            probe_interval_secs: 20,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.connectivity_debounce_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub thumbnail_size: u32,
    /// Upper bound on waiting for a geolocation fix
    pub location_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            max_dimension: pipeline.max_dimension,
            jpeg_quality: pipeline.jpeg_quality,
            thumbnail_size: pipeline.thumbnail_size,
            location_timeout_ms: 3000,
        }
    }
}

impl CaptureConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_dimension: self.max_dimension,
            jpeg_quality: self.jpeg_quality,
            thumbnail_size: self.thumbnail_size,
        }
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location_timeout_ms)
    }
}

/// Connection settings for Nextcloud/WebDAV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server_url: String,
    pub username: String,
    pub app_password: String,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
}

fn default_remote_path() -> String {
    "FieldSurveys".to_string()
}

impl EngineConfig {
    pub fn from_toml(s: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(s)?)
    }

    /// Loads the configuration file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}
