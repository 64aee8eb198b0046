//! src/dataloader/iterator/chunks.rs
//!
//! Chunk tasks for one epoch: `cycles` passes over the source, each pass
//! re-opening the file and grouping it from the start.

use crate::error::Result;
use crate::grouping::ChunkGrouper;
use crate::readers::{LineIter, LineSource};
use crate::sampler::chunk_seed;
use crate::stats::LoaderStats;
use tracing::debug;

use crate::dataloader::workers::ChunkTask;

/// Produces seeded [`ChunkTask`]s in file order.
///
/// Chunk indices keep counting across cycles, so every chunk of the epoch gets
/// its own seed. The first error ends the stream.
pub(crate) struct ChunkStream {
    source: LineSource,
    read_size: usize,
    cycles: usize,
    cycle: usize,
    grouper: Option<ChunkGrouper<LineIter>>,
    next_index: usize,
    base_seed: u64,
    epoch: usize,
    stats: LoaderStats,
    failed: bool,
}

impl ChunkStream {
    pub(crate) fn new(
        source: LineSource,
        read_size: usize,
        cycles: usize,
        base_seed: u64,
        epoch: usize,
        stats: LoaderStats,
    ) -> Self {
        Self {
            source,
            read_size,
            cycles,
            cycle: 0,
            grouper: None,
            next_index: 0,
            base_seed,
            epoch,
            stats,
            failed: false,
        }
    }

    fn start_cycle(&mut self) -> Result<ChunkGrouper<LineIter>> {
        self.cycle += 1;
        debug!(
            path = %self.source.path().display(),
            cycle = self.cycle,
            cycles = self.cycles,
            epoch = self.epoch,
            "starting pass over source"
        );
        let lines = self.source.open()?;
        ChunkGrouper::new(lines, self.read_size, self.stats.clone())
    }
}

impl Iterator for ChunkStream {
    type Item = Result<ChunkTask>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            if self.grouper.is_none() {
                if self.cycle >= self.cycles {
                    return None;
                }
                match self.start_cycle() {
                    Ok(grouper) => self.grouper = Some(grouper),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
            }

            match self.grouper.as_mut()?.next() {
                Some(Ok(groups)) => {
                    let index = self.next_index;
                    self.next_index += 1;
                    return Some(Ok(ChunkTask {
                        index,
                        groups,
                        seed: chunk_seed(self.base_seed, self.epoch, index),
                    }));
                }
                Some(Err(e)) => {
                    self.failed = true;
                    self.grouper = None;
                    return Some(Err(e));
                }
                None => self.grouper = None,
            }
        }
    }
}
