//! Worker management for parallel batch construction.
//!
//! - `pool`: Worker pool implementation
//!
//! A unit of work is one eligible chunk: the orchestrating thread reads and
//! groups it, a worker samples and encodes it. The same [`ChunkBuilder`] runs
//! on the orchestrating thread in single-threaded mode, so both modes build
//! identical batches from identical tasks.

pub(crate) mod pool;

use crate::encoder::{encode_batch, BatchEncoder, EncodedBatch, EncodingSettings};
use crate::error::Result;
use crate::grouping::GroupMap;
use crate::sampler::TripletSampler;
use crate::stats::LoaderStats;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// One eligible chunk, owned by whichever thread builds it.
#[derive(Debug)]
pub(crate) struct ChunkTask {
    /// Position of the chunk within the epoch, across all cycles.
    pub(crate) index: usize,
    pub(crate) groups: GroupMap,
    pub(crate) seed: u64,
}

/// Result of a task, tagged with the chunk index for reordering.
#[derive(Debug)]
pub(crate) struct ChunkOutput {
    pub(crate) index: usize,
    pub(crate) result: Result<EncodedBatch>,
}

/// Read-only state shared by every worker: sampler, encoder and settings.
pub(crate) struct ChunkBuilder<E> {
    pub(crate) sampler: TripletSampler,
    pub(crate) encoder: E,
    pub(crate) settings: EncodingSettings,
    pub(crate) batch_size: usize,
    pub(crate) stats: LoaderStats,
}

impl<E: BatchEncoder> ChunkBuilder<E> {
    /// Samples and encodes one chunk with its own seeded RNG.
    pub(crate) fn build(&self, task: ChunkTask) -> ChunkOutput {
        let mut rng = StdRng::seed_from_u64(task.seed);
        let result = self
            .sampler
            .sample(&task.groups, self.batch_size, &mut rng)
            .and_then(|batch| encode_batch(&self.encoder, batch, &self.settings));

        if result.is_ok() {
            self.stats.record_batch();
        }
        ChunkOutput {
            index: task.index,
            result,
        }
    }
}
