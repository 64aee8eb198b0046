//! src/dataloader/loader.rs
//!
//! TripletLoader construction and per-epoch iteration.
//!
//! # Epoch sources
//! - Cache present and `force = false`: the epoch replays the cache, eagerly
//!   or streaming as decided when the loader was created.
//! - Otherwise: `cycles` passes over the source, each driving
//!   grouper -> sampler -> encoder for every eligible chunk.
//!
//! # Seed Coordination
//!
//! Every chunk samples with its own RNG seeded from
//! `(seed, epoch, chunk_index)`. Batches therefore depend only on the seed,
//! the epoch number and the file contents, never on which thread built them:
//!
//! ```ignore
//! let config = LoaderConfig::builder().path(path).seed(42).num_workers(4).build();
//! let loader = TripletLoader::new(config, HashingEncoder::default())?;
//! for batch in loader.iter()? {
//!     let batch = batch?;
//!     // batch.tensor_a, batch.tensor_b, batch.labels
//! }
//! ```
//!
//! Each call to `iter()` starts a new epoch, so consecutive epochs draw
//! different triplets from the same chunks.

use crate::cache::{CacheHandle, CacheStore};
use crate::encoder::BatchEncoder;
use crate::error::Result;
use crate::readers::LineSource;
use crate::sampler::TripletSampler;
use crate::stats::{LoaderStats, StatsSnapshot};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use super::config::LoaderConfig;
use super::iterator::chunks::ChunkStream;
use super::iterator::ordered::OrderedBatches;
use super::iterator::BatchIter;
use super::workers::pool::WorkerPool;
use super::workers::ChunkBuilder;

/// Produces epochs of encoded triplet batches from one source file.
///
/// # Thread safety:
/// - `TripletLoader` is Send + Sync when its encoder is.
/// - Iterators own their file handles and workers and are independent of
///   each other.
///
/// # Type parameters:
/// - `E`: Batch encoder, shared read-only with the workers
pub struct TripletLoader<E> {
    config: LoaderConfig,
    source: LineSource,
    builder: Arc<ChunkBuilder<E>>,
    cache: Option<CacheHandle>,
    stats: LoaderStats,
    current_epoch: AtomicUsize,
    runtime_seed: u64,
}

impl<E> TripletLoader<E>
where
    E: BatchEncoder + 'static,
{
    /// Creates a loader and, unless `config.force` is set, opens the cache.
    ///
    /// # Errors
    /// - `InvalidConfig` if the configuration fails validation
    /// - `CacheIo` / `CacheCorruption` if an existing cache cannot be opened
    pub fn new(config: LoaderConfig, encoder: E) -> Result<Self> {
        config.validate()?;

        let stats = LoaderStats::new();
        let sampler = TripletSampler::new(
            config.mention_placeholder.clone(),
            config.max_draw_attempts,
        )?;
        let source = LineSource::new(&config.path);

        let cache = if config.force {
            None
        } else {
            CacheStore::for_source(&config.path, config.corruption_policy, stats.clone())
                .open(config.cache_budget_mb)?
        };

        let runtime_seed = config.seed.unwrap_or_else(|| rand::rng().random());

        info!(
            path = %config.path.display(),
            format = ?source.format(),
            workers = config.num_workers,
            cycles = config.cycles,
            cached = cache.is_some(),
            "triplet loader ready"
        );

        let builder = Arc::new(ChunkBuilder {
            sampler,
            encoder,
            settings: config.encoding_settings(),
            batch_size: config.batch_size,
            stats: stats.clone(),
        });

        Ok(Self {
            config,
            source,
            builder,
            cache,
            stats,
            current_epoch: AtomicUsize::new(0),
            runtime_seed,
        })
    }

    /// Starts the next epoch.
    ///
    /// # Errors
    /// - `CacheIo` / `CacheCorruption` if a streaming cache cannot be reopened
    /// - `Worker` if the worker threads cannot be spawned
    pub fn iter(&self) -> Result<BatchIter<E>> {
        let epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed);

        match &self.cache {
            Some(CacheHandle::Eager(batches)) => Ok(BatchIter::cached_eager(batches.clone())),
            Some(CacheHandle::Streaming(store)) => Ok(BatchIter::cached_stream(store.stream()?)),
            None => self.source_batches(epoch),
        }
    }

    /// Runs the source pipeline once and writes every batch to `<path>.cache`.
    ///
    /// Always reads the source, even when a cache is already in use. The new
    /// cache is picked up by loaders created afterwards. Returns the number of
    /// batches written.
    pub fn build_cache(&self) -> Result<usize> {
        let epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed);
        let store = CacheStore::for_source(
            &self.config.path,
            self.config.corruption_policy,
            self.stats.clone(),
        );
        store.write(self.source_batches(epoch)?)
    }

    /// Approximate number of batches per epoch.
    ///
    /// Exact for an in-memory cache. Otherwise `lines / read_size * cycles`,
    /// which over-counts when chunks are skipped.
    pub fn estimated_len(&self) -> Result<usize> {
        if let Some(CacheHandle::Eager(batches)) = &self.cache {
            return Ok(batches.len());
        }
        let lines = self.source.count_lines()?;
        Ok(lines / self.config.read_size * self.config.cycles)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Cache opened at construction, if any.
    pub fn cache(&self) -> Option<&CacheHandle> {
        self.cache.as_ref()
    }

    /// Base seed for chunk RNGs: `config.seed`, or a random one drawn at creation.
    pub fn seed(&self) -> u64 {
        self.runtime_seed
    }

    /// Number of epochs started so far.
    pub fn epoch(&self) -> usize {
        self.current_epoch.load(Ordering::Relaxed)
    }

    fn source_batches(&self, epoch: usize) -> Result<BatchIter<E>> {
        let chunks = ChunkStream::new(
            self.source.clone(),
            self.config.read_size,
            self.config.cycles,
            self.runtime_seed,
            epoch,
            self.stats.clone(),
        );

        if self.config.num_workers == 0 {
            return Ok(BatchIter::serial(chunks, self.builder.clone()));
        }

        let window = self.config.num_workers * self.config.prefetch_factor;
        let builder = self.builder.clone();
        let pool = WorkerPool::new(
            self.config.num_workers,
            window,
            self.config.worker_timeout,
            move |task| builder.build(task),
        )?;
        Ok(BatchIter::parallel(OrderedBatches::new(
            chunks,
            pool,
            window,
            self.config.timeout,
        )))
    }
}
