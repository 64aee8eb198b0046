//! src/dataloader/mod.rs
//!
//! This module implements the `TripletLoader`.
//!
//! The `TripletLoader` coordinates the `LineSource`, `ChunkGrouper`,
//! `TripletSampler`, `BatchEncoder` and `CacheStore` to deliver encoded
//! triplet batches for training, one epoch per call to `iter()`.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌────────────┐
//!                   │ LineSource │ (plain, gzip or zip)
//!                   └─────┬──────┘
//!                         │ lines, re-opened every cycle
//!                         ↓
//!                  ┌──────────────┐
//!                  │ ChunkGrouper │ (read_size lines → GroupMap)
//!                  └──────┬───────┘
//!                         │ eligible chunks only
//!                         ↓
//!                  ┌───────────────┐
//!                  │ TripletLoader │ ←───── Config (batch_size, workers, etc.)
//!                  └──────┬────────┘
//!                         │ ChunkTask { index, groups, seed }
//!                         ↓
//!                   [Worker Threads] (optional parallelism)
//!                         │
//!                         │ TripletSampler → BatchEncoder
//!                         ↓
//!                  ┌────────────────┐
//!                  │ Reorder buffer │ (file order restored)
//!                  └──────┬─────────┘
//!                         ↓
//!                  ┌──────────────┐
//!                  │ EncodedBatch │ (ready for model)
//!                  └──────────────┘
//!
//!   <path>.cache present: CacheStore replays batches instead (eager or streaming)
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/dataloader/
//! ├── mod.rs             # Public API exports + module-level architecture docs
//! ├── config.rs          # LoaderConfig, builder, validation and JSON loading
//! ├── loader.rs          # TripletLoader struct and epoch setup
//! ├── iterator/
//! │   ├── mod.rs         # BatchIter and its variants
//! │   ├── chunks.rs      # Seeded chunk tasks across cycles
//! │   └── ordered.rs     # Order-preserving fan-out over the worker pool
//! ├── workers/
//! │   ├── mod.rs         # ChunkTask, ChunkOutput and the shared ChunkBuilder
//! │   └── pool.rs        # Generic `WorkerPool<Task, Output>` implementation
//! └── common/
//!     ├── mod.rs         # Module declarations for shared utilities
//!     └── thread.rs      # Thread-local worker ID
//! ```
//!
//! # Example Usage
//!
//! ## Basic single-threaded usage:
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .path("data/mentions.tsv.gz")
//!     .batch_size(16)
//!     .seed(7)
//!     .build();
//! let loader = TripletLoader::new(config, HashingEncoder::default())?;
//!
//! for batch in loader.iter()? {
//!     let batch: EncodedBatch = batch?;
//!     // batch.tensor_a, batch.tensor_b, batch.labels
//! }
//! ```
//!
//! ## Multi-threaded with a cache
//! ```ignore
//! let config = LoaderConfig::builder()
//!     .path("data/mentions.tsv.gz")
//!     .num_workers(4)
//!     .prefetch_factor(2)
//!     .build();
//! TripletLoader::new(config.clone(), HashingEncoder::default())?.build_cache()?;
//!
//! // Later runs replay data/mentions.tsv.gz.cache
//! let loader = TripletLoader::new(config, HashingEncoder::default())?;
//! ```
//!
//! # Performance Guidelines
//!
//! ## Worker Configuration
//! - `num_workers = 0`: Single-threaded, lowest memory usage but no parallelism
//! - `num_workers > 0`: Sampling and encoding run on workers; reading stays on
//!                      the calling thread
//!
//! ## Memory Usage
//! - Single-threaded: O(read_size) records
//! - Multi-threaded: O(num_workers x prefetch_factor x read_size) records
//! - Eager cache: the whole cache file, bounded by `cache_budget_mb`
//!
//! ## Notes:
//! - Results are identical with and without workers for the same seed
//! - Reduce `read_size`, `num_workers` or `prefetch_factor` if out-of-memory.

mod common;
mod config;
mod iterator;
mod loader;
mod workers;

pub use common::thread::{current_worker_id, WORKER_ID};
pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use iterator::BatchIter;
pub use loader::TripletLoader;
