//! src/dataloader/iterator/ordered.rs
//!
//! Order-preserving fan-out over the worker pool.
//!
//! Chunks are submitted in file order and may finish in any order. Finished
//! batches wait in a reorder buffer keyed by chunk index until every earlier
//! chunk has been yielded.
//!
//! The window of submitted-but-not-yielded chunks (in flight plus buffered) is
//! capped at `num_workers x prefetch_factor`, so one slow chunk stalls reading
//! instead of growing the buffer.

use crate::encoder::EncodedBatch;
use crate::error::Result;
use std::collections::BTreeMap;
use std::time::Duration;

use super::chunks::ChunkStream;
use crate::dataloader::workers::pool::WorkerPool;
use crate::dataloader::workers::{ChunkOutput, ChunkTask};

pub(crate) struct OrderedBatches {
    chunks: ChunkStream,
    pool: WorkerPool<ChunkTask, ChunkOutput>,
    reorder: BTreeMap<usize, Result<EncodedBatch>>,
    window: usize,
    in_flight: usize,
    submitted: usize,
    next_out: usize,
    exhausted: bool,
    timeout: Option<Duration>,
}

impl OrderedBatches {
    pub(crate) fn new(
        chunks: ChunkStream,
        pool: WorkerPool<ChunkTask, ChunkOutput>,
        window: usize,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            chunks,
            pool,
            reorder: BTreeMap::new(),
            window: window.max(1),
            in_flight: 0,
            submitted: 0,
            next_out: 0,
            exhausted: false,
            timeout,
        }
    }

    /// Keeps the window full. A source error takes the next index so it is
    /// yielded after every batch read before it.
    fn fill(&mut self) -> Result<()> {
        while !self.exhausted && self.submitted - self.next_out < self.window {
            match self.chunks.next() {
                Some(Ok(task)) => {
                    self.pool.submit(task)?;
                    self.in_flight += 1;
                    self.submitted += 1;
                }
                Some(Err(e)) => {
                    self.reorder.insert(self.submitted, Err(e));
                    self.exhausted = true;
                }
                None => self.exhausted = true,
            }
        }
        Ok(())
    }
}

impl Iterator for OrderedBatches {
    type Item = Result<EncodedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(result) = self.reorder.remove(&self.next_out) {
                self.next_out += 1;
                return Some(result);
            }

            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
            if self.reorder.contains_key(&self.next_out) {
                continue;
            }
            if self.in_flight == 0 {
                return None;
            }

            match self.pool.recv(self.timeout) {
                Ok(output) => {
                    self.in_flight -= 1;
                    self.reorder.insert(output.index, output.result);
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
