//! src/dataloader/iterator/mod.rs
//!
//! Iterator implementations for TripletLoader.
//!
//! - `BatchIter`: The public iterator type returned by `TripletLoader::iter()`
//! - `IteratorImpl`: Internal enum with one variant per way an epoch is produced
//!
//! # Iterator Variants
//!
//! - `CachedEager`: Replays batches held in memory
//! - `CachedStream`: Decodes cached batches from disk one at a time
//! - `Serial`: Reads, samples and encodes on the calling thread
//! - `Parallel`: Reads on the calling thread, samples and encodes on workers,
//!               and yields in file order
//!
//! Every variant ends the epoch after yielding its first error. Dropping the
//! iterator closes the source or cache file and shuts the worker pool down.

use crate::cache::CacheStream;
use crate::encoder::{BatchEncoder, EncodedBatch};
use crate::error::Result;
use std::sync::Arc;

use super::workers::ChunkBuilder;

pub(crate) mod chunks;
pub(crate) mod ordered;

use chunks::ChunkStream;
use ordered::OrderedBatches;

/// Iterator over the encoded batches of one epoch.
///
/// Created by calling `loader.iter()`.
pub struct BatchIter<E> {
    inner: IteratorImpl<E>,
}

enum IteratorImpl<E> {
    /// In-memory cache replay.
    CachedEager {
        batches: Arc<[EncodedBatch]>,
        position: usize,
    },

    /// Lazy cache replay.
    CachedStream { stream: CacheStream },

    /// Single-threaded pipeline.
    Serial {
        chunks: ChunkStream,
        builder: Arc<ChunkBuilder<E>>,
    },

    /// Worker pool with reorder buffer.
    Parallel { batches: OrderedBatches },

    /// Exhausted or failed. Holds no file or thread.
    Done,
}

impl<E> BatchIter<E> {
    pub(crate) fn cached_eager(batches: Arc<[EncodedBatch]>) -> Self {
        Self {
            inner: IteratorImpl::CachedEager {
                batches,
                position: 0,
            },
        }
    }

    pub(crate) fn cached_stream(stream: CacheStream) -> Self {
        Self {
            inner: IteratorImpl::CachedStream { stream },
        }
    }

    pub(crate) fn serial(chunks: ChunkStream, builder: Arc<ChunkBuilder<E>>) -> Self {
        Self {
            inner: IteratorImpl::Serial { chunks, builder },
        }
    }

    pub(crate) fn parallel(batches: OrderedBatches) -> Self {
        Self {
            inner: IteratorImpl::Parallel { batches },
        }
    }

    /// Whether batches come from a cache rather than the source file.
    pub fn is_cached(&self) -> bool {
        matches!(
            self.inner,
            IteratorImpl::CachedEager { .. } | IteratorImpl::CachedStream { .. }
        )
    }
}

impl<E: BatchEncoder> Iterator for BatchIter<E> {
    type Item = Result<EncodedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match &mut self.inner {
            IteratorImpl::CachedEager { batches, position } => {
                let batch = batches.get(*position).cloned();
                *position += 1;
                batch.map(Ok)
            }
            IteratorImpl::CachedStream { stream } => stream.next(),
            IteratorImpl::Serial { chunks, builder } => chunks
                .next()
                .map(|task| task.and_then(|task| builder.build(task).result)),
            IteratorImpl::Parallel { batches } => batches.next(),
            IteratorImpl::Done => None,
        };

        match item {
            Some(Ok(batch)) => Some(Ok(batch)),
            Some(Err(e)) => {
                self.inner = IteratorImpl::Done;
                Some(Err(e))
            }
            None => {
                self.inner = IteratorImpl::Done;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            IteratorImpl::CachedEager { batches, position } => {
                let left = batches.len().saturating_sub(*position);
                (left, Some(left))
            }
            IteratorImpl::Done => (0, Some(0)),
            _ => (0, None),
        }
    }
}
