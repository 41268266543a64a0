//! Configuration for the preprocessing service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Where datasets, results and job documents live
    #[serde(default)]
    pub storage: StorageConfig,
    /// Background processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Dataset validation limits
    #[serde(default)]
    pub dataset: DatasetConfig,
}

impl PrepConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Load from `DATAPREP_CONFIG` if set, then apply environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("DATAPREP_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(host) = std::env::var("DATAPREP_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("DATAPREP_PORT") {
            config.server.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid DATAPREP_PORT '{}': {}", port, e)))?;
        }
        if let Ok(dir) = std::env::var("DATAPREP_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the executor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.processing.queue_capacity == 0 {
            return Err(Error::Config("processing.queue_capacity must be > 0".to_string()));
        }
        if self.processing.worker_count == Some(0) {
            return Err(Error::Config("processing.worker_count must be > 0".to_string()));
        }
        if self.dataset.max_rows == 0 {
            return Err(Error::Config("dataset.max_rows must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 10MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            max_upload_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; `uploads/` and `processed/` are created below it
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dataprep");
        Self { data_dir }
    }
}

/// Background processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of job workers (default: CPU count, max 4)
    pub worker_count: Option<usize>,
    /// Jobs that may wait for a worker before submissions are refused
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long to wait for a resource lock (default: 30s)
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    /// Extra attempts for a failed state document write
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,
    /// Pause between state document write attempts
    #[serde(default = "default_persist_retry_delay")]
    pub persist_retry_delay_ms: u64,
}

fn default_queue_capacity() -> usize { 64 }
fn default_lock_timeout() -> u64 { 30 }
fn default_persist_retries() -> u32 { 2 }
fn default_persist_retry_delay() -> u64 { 50 }

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            worker_count: None, // Auto-detect from CPU count
            queue_capacity: default_queue_capacity(),
            lock_timeout_secs: default_lock_timeout(),
            persist_retries: default_persist_retries(),
            persist_retry_delay_ms: default_persist_retry_delay(),
        }
    }
}

impl ProcessingConfig {
    /// Effective number of workers
    pub fn workers(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn persist_retry_delay(&self) -> Duration {
        Duration::from_millis(self.persist_retry_delay_ms)
    }
}

/// Dataset validation limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Maximum number of data rows in an upload
    pub max_rows: usize,
    /// Rows used by the preview endpoint
    pub preview_rows: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            max_rows: 1_000_000,
            preview_rows: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PrepConfig::default();
        assert_eq!(config.processing.lock_timeout(), Duration::from_secs(30));
        assert!(config.processing.workers() >= 1);
        assert_eq!(config.dataset.preview_rows, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: PrepConfig = toml::from_str(
            r#"
            [processing]
            worker_count = 2
            lock_timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.processing.workers(), 2);
        assert_eq!(config.processing.lock_timeout_secs, 5);
        assert_eq!(config.processing.queue_capacity, 64);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut config = PrepConfig::default();
        config.processing.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
