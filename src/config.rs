use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::blocking::DEFAULT_SPILL_BUFFER_SIZE;
use crate::storage::{create_storage, RetryPolicy, StorageBackend, StorageConfig};

/// Top-level application configuration loaded from file + environment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSection,
    pub retry: RetrySection,
    pub blocking: BlockingSection,
    pub parallel: ParallelSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load configuration from disk and environment.
    ///
    /// The file is named by `RECORDLINK_CONFIG` (default `recordlink.toml`) and is optional.
    /// Environment variables such as `RECORDLINK_PARALLEL__WORKERS=8` override it.
    pub fn load() -> Result<Self> {
        let config_path =
            env::var("RECORDLINK_CONFIG").unwrap_or_else(|_| "recordlink.toml".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();
        let mut builder = config::Config::builder();

        if config_path.exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(config_path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("RECORDLINK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("invalid recordlink configuration")?;

        if config.logging.level.trim().is_empty() {
            config.logging.level = "info".to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallel.workers == Some(0) {
            bail!("parallel.workers must be at least 1");
        }
        if self.parallel.queue_size == 0 {
            bail!("parallel.queue_size must be at least 1");
        }
        if self.blocking.block_max_size == Some(0) {
            bail!("blocking.block_max_size must be at least 1 when set");
        }
        if self.blocking.spill_buffer_size == 0 {
            bail!("blocking.spill_buffer_size must be at least 1");
        }
        if self.blocking.block_file_batch == 0 {
            bail!("blocking.block_file_batch must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        self.storage.to_runtime()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackendKind,
    pub local: Option<LocalStorageSection>,
    pub s3: Option<S3StorageSection>,
}

impl StorageSection {
    pub fn to_runtime(&self) -> Result<StorageConfig> {
        match self.backend {
            StorageBackendKind::Local => {
                let local = self.local.clone().unwrap_or_default();
                Ok(StorageConfig::Local {
                    root_path: local.root_path,
                })
            }
            StorageBackendKind::S3 => {
                let s3 = self
                    .s3
                    .clone()
                    .context("storage.s3 configuration required when backend is 's3'")?;

                if s3.bucket.trim().is_empty() {
                    bail!("storage.s3.bucket must be specified");
                }
                if s3.region.trim().is_empty() {
                    bail!("storage.s3.region must be specified");
                }

                Ok(StorageConfig::S3 {
                    bucket: s3.bucket,
                    region: s3.region,
                    endpoint: s3.endpoint,
                })
            }
        }
    }

    /// Object key prefix for storage-backed adapters; empty for local storage.
    pub fn key_prefix(&self) -> String {
        match (&self.backend, &self.s3) {
            (StorageBackendKind::S3, Some(s3)) => s3
                .prefix
                .as_deref()
                .map(|p| p.trim().trim_end_matches('/').to_string())
                .unwrap_or_default(),
            _ => String::new(),
        }
    }

    /// Build the configured backend wrapped in retries.
    pub async fn create_backend(&self, retry: &RetrySection) -> Result<Arc<dyn StorageBackend>> {
        let storage_config = self.to_runtime()?;
        create_storage(storage_config, retry.policy())
            .await
            .context("failed to initialise storage backend")
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Local,
            local: Some(LocalStorageSection::default()),
            s3: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalStorageSection {
    pub root_path: String,
}

impl Default for LocalStorageSection {
    fn default() -> Self {
        Self {
            root_path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct S3StorageSection {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 50,
            max_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlockingSection {
    /// Blocks growing past this many members are dropped and blacklisted
    pub block_max_size: Option<usize>,
    /// Candidate pairs held in memory before spilling to disk
    pub spill_buffer_size: usize,
    pub work_dir: Option<PathBuf>,
    /// Lines buffered by block file writers between flushes
    pub block_file_batch: usize,
}

impl BlockingSection {
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

impl Default for BlockingSection {
    fn default() -> Self {
        Self {
            block_max_size: None,
            spill_buffer_size: DEFAULT_SPILL_BUFFER_SIZE,
            work_dir: None,
            block_file_batch: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParallelSection {
    /// Defaults to the available parallelism
    pub workers: Option<usize>,
    pub queue_size: usize,
}

impl ParallelSection {
    pub fn effective_workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

impl Default for ParallelSection {
    fn default() -> Self {
        Self {
            workers: None,
            queue_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}
