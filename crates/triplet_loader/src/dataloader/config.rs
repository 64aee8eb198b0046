//! src/dataloader/config.rs
//!
//! Configuration for TripletLoader behaviour
//!
//! The `LoaderConfig` struct stores every parameter that controls how triplet
//! batches are read, sampled, encoded and cached. It can be built in code or
//! read from a JSON file.
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .path("data/mentions.tsv.gz")
//!     .read_size(500)
//!     .batch_size(10)
//!     .num_workers(4)
//!     .cycles(2)
//!     .build();
//! ```
//!
//! JSON files use the same field names. Durations are given in milliseconds:
//! ```text
//! { "path": "data/mentions.tsv", "batch_size": 16, "timeout": 60000 }
//! ```
//!
//! # Performance considerations:
//! - `read_size`: Larger chunks give a wider pool of negatives but hold more
//!                records in memory at once.
//! - `num_workers`: More workers speed up sampling and encoding, not file reading.
//! - `cache_budget_mb`: Caches at or above this size are streamed instead of loaded.

use crate::cache::CorruptionPolicy;
use crate::encoder::EncodingSettings;
use crate::error::{LoaderError, Result};
use crate::sampler::DEFAULT_PLACEHOLDER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for TripletLoader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Source file (plain, `.gz` or `.zip`). The cache lives at `<path>.cache`.
    pub path: PathBuf,
    /// Number of lines grouped together per chunk.
    pub read_size: usize,
    /// Number of positive/negative units per batch. Each batch has `2 * batch_size` rows.
    pub batch_size: usize,
    /// Feature id range handed to the encoder.
    pub dict_size: usize,
    /// Encode character n-grams instead of whole words.
    pub ngram_mode: bool,
    /// Number of parallel workers (0 = single-threaded)
    pub num_workers: usize,
    /// Passes over the source per epoch when no cache is used.
    pub cycles: usize,
    /// Memory budget in megabytes for loading a cache eagerly.
    pub cache_budget_mb: u64,
    /// Ignore any existing cache and always read the source.
    pub force: bool,
    /// Random seed for reproducible sampling. Drawn at random when unset.
    pub seed: Option<u64>,
    /// Failed positive-group draws allowed per unit before giving up.
    /// Raise it for chunks with many singleton keys (see `TripletSampler`).
    pub max_draw_attempts: usize,
    /// Chunks in flight per worker (must be >0 when using workers)
    pub prefetch_factor: usize,
    /// Maximum time to wait for a batch from workers. If exceeded, the epoch
    /// ends with an error. Default: `None` (wait for as long as it takes, the
    /// same as single-threaded mode).
    #[serde(with = "optional_millis")]
    pub timeout: Option<Duration>,
    /// How often idle workers check for shutdown signal.
    /// Not an error timeout - just a polling interval. Default: 100ms.
    #[serde(with = "millis")]
    pub worker_timeout: Duration,
    /// How to react to an unreadable cache record.
    pub corruption_policy: CorruptionPolicy,
    /// Token that replaces the mention between the two context fields.
    pub mention_placeholder: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            read_size: 500,
            batch_size: 10,
            dict_size: 20_000,
            ngram_mode: false,
            num_workers: 0,
            cycles: 1,
            cache_budget_mb: 1,
            force: false,
            seed: None,
            max_draw_attempts: 1000,
            prefetch_factor: 2,
            timeout: None,
            worker_timeout: Duration::from_millis(100),
            corruption_policy: CorruptionPolicy::Fail,
            mention_placeholder: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::default()
    }

    /// Reads a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| LoaderError::SourceAccess {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: LoaderConfig = serde_json::from_str(&text).map_err(|e| {
            LoaderError::invalid_config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every field the pipeline depends on.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(LoaderError::invalid_config("path must be set"));
        }
        if self.read_size == 0 {
            return Err(LoaderError::invalid_config("read_size must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(LoaderError::invalid_config("batch_size must be greater than 0"));
        }
        if self.dict_size <= 1 {
            return Err(LoaderError::invalid_config(format!(
                "dict_size must be greater than 1, got {}",
                self.dict_size
            )));
        }
        if self.cycles == 0 {
            return Err(LoaderError::invalid_config("cycles must be greater than 0"));
        }
        if self.max_draw_attempts == 0 {
            return Err(LoaderError::invalid_config(
                "max_draw_attempts must be greater than 0",
            ));
        }
        if self.num_workers > 0 && self.prefetch_factor == 0 {
            return Err(LoaderError::invalid_config(format!(
                "prefetch_factor must be > 0 when using {} workers",
                self.num_workers
            )));
        }
        Ok(())
    }

    /// Encoder-facing subset of the configuration.
    pub fn encoding_settings(&self) -> EncodingSettings {
        EncodingSettings {
            dict_size: self.dict_size,
            ngram_mode: self.ngram_mode,
        }
    }
}

/// Builder for LoaderConfig with method chaining
#[derive(Default)]
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    /// Set the source file
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the number of lines per chunk (must be > 0)
    pub fn read_size(mut self, size: usize) -> Self {
        self.config.read_size = size;
        self
    }

    /// Set the number of units per batch (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn dict_size(mut self, size: usize) -> Self {
        self.config.dict_size = size;
        self
    }

    pub fn ngram_mode(mut self, enabled: bool) -> Self {
        self.config.ngram_mode = enabled;
        self
    }

    /// Set the number of workers
    pub fn num_workers(mut self, workers: usize) -> Self {
        self.config.num_workers = workers;
        self
    }

    /// Set the number of passes over the source per epoch
    pub fn cycles(mut self, cycles: usize) -> Self {
        self.config.cycles = cycles;
        self
    }

    /// Set the memory budget (in MB) under which a cache is loaded eagerly
    pub fn cache_budget_mb(mut self, budget: u64) -> Self {
        self.config.cache_budget_mb = budget;
        self
    }

    /// Ignore an existing cache
    pub fn force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    /// Set the random seed for reproducible sampling.
    ///
    /// The same seed, source and configuration produce identical batches in
    /// identical order, with or without workers.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn max_draw_attempts(mut self, attempts: usize) -> Self {
        self.config.max_draw_attempts = attempts;
        self
    }

    /// Set the number of chunks in flight per worker.
    /// Higher values keep workers busy but hold more chunks in memory.
    pub fn prefetch_factor(mut self, factor: usize) -> Self {
        self.config.prefetch_factor = factor;
        self
    }

    /// Set a timeout for receiving a batch from workers. Unset by default.
    ///
    /// A slow encoder that exceeds it fails the epoch in parallel mode, while
    /// single-threaded mode would still finish, so only set it to catch hangs.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the worker polling interval
    pub fn worker_timeout(mut self, worker_timeout: Duration) -> Self {
        self.config.worker_timeout = worker_timeout;
        self
    }

    pub fn corruption_policy(mut self, policy: CorruptionPolicy) -> Self {
        self.config.corruption_policy = policy;
        self
    }

    pub fn mention_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.config.mention_placeholder = placeholder.into();
        self
    }

    /// Build the final configuration. Validation happens in `TripletLoader::new`.
    pub fn build(self) -> LoaderConfig {
        self.config
    }
}

/// `Duration` as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Option<Duration>` as integer milliseconds or `null`.
mod optional_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
