pub mod cache;
pub mod dataloader;
pub mod encoder;
pub mod error;
pub mod grouping;
pub mod readers;
pub mod sampler;
pub mod stats;

pub use cache::{CacheHandle, CacheStore, CacheStream, CorruptionPolicy};
pub use dataloader::{BatchIter, LoaderConfig, LoaderConfigBuilder, TripletLoader};
pub use encoder::{
    AlphaTokenizer, BatchEncoder, EncodedBatch, EncodingSettings, HashingEncoder, PaddedMatrix,
    Tokenizer,
};
pub use error::{LoaderError, Result};
pub use grouping::{ChunkGrouper, GroupMap, Record};
pub use readers::{LineSource, SourceFormat};
pub use sampler::{TripletBatch, TripletSampler};
pub use stats::{LoaderStats, StatsSnapshot};
