//! Bounded-memory grouping of source records.
//!
//! The [`ChunkGrouper`] pulls at most `read_size` lines at a time and groups
//! them by their first field. Only the current chunk is held in memory, so peak
//! memory is `O(read_size)` records regardless of the file size.
//!
//! NOTE: Negatives are only ever drawn from records that share a chunk. With a
//!       file sorted by key, a small `read_size` yields few distinct groups per
//!       chunk and therefore a narrow pool of negatives.

use crate::error::{LoaderError, Result};
use crate::stats::LoaderStats;
use std::collections::BTreeMap;
use tracing::debug;

/// Fields 0 (key), 1 (left context) and 3 (right context) must be present.
pub const MIN_FIELDS: usize = 4;

const LEFT_CONTEXT: usize = 1;
const RIGHT_CONTEXT: usize = 3;

/// One tab-separated source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    pub fn parse(line: &str) -> Self {
        Self {
            fields: line.split('\t').map(str::to_string).collect(),
        }
    }

    pub fn from_fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Group key (entity identity). Empty for an empty record.
    pub fn key(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Builds the training sentence: left context, placeholder, right context.
    ///
    /// # Errors
    /// `MalformedRecord` if the record has fewer than [`MIN_FIELDS`] fields.
    pub fn sentence(&self, placeholder: &str) -> Result<String> {
        if self.fields.len() < MIN_FIELDS {
            return Err(LoaderError::MalformedRecord {
                key: self.key().to_string(),
                expected: MIN_FIELDS,
                found: self.fields.len(),
            });
        }
        let joined = format!(
            "{} {} {}",
            self.fields[LEFT_CONTEXT], placeholder, self.fields[RIGHT_CONTEXT]
        );
        Ok(joined.trim().to_string())
    }
}

/// Records of one chunk keyed by group key. Keys iterate in sorted order so
/// that seeded sampling is reproducible.
pub type GroupMap = BTreeMap<String, Vec<Record>>;

/// Whether a chunk can produce at least one positive and one negative pair.
pub fn is_samplable(groups: &GroupMap) -> bool {
    groups.len() > 1 && groups.values().any(|records| records.len() > 1)
}

/// Lazy, finite, non-restartable sequence of group maps over a line iterator.
///
/// - Pulls up to `read_size` lines per chunk and groups them by key.
/// - Yields a chunk only if it has more than one group and at least one group
///   with two or more records. Other chunks are skipped, logged and counted.
/// - Stops after the first chunk shorter than `read_size` (end of input).
/// - A read error is yielded once and ends the sequence.
pub struct ChunkGrouper<I> {
    lines: I,
    read_size: usize,
    stats: LoaderStats,
    finished: bool,
}

impl<I> ChunkGrouper<I>
where
    I: Iterator<Item = Result<String>>,
{
    pub fn new(lines: I, read_size: usize, stats: LoaderStats) -> Result<Self> {
        if read_size == 0 {
            return Err(LoaderError::invalid_config("read_size must be greater than 0"));
        }
        Ok(Self {
            lines,
            read_size,
            stats,
            finished: false,
        })
    }

    /// Reads the next chunk. `None` once the input is exhausted.
    fn read_chunk(&mut self) -> Option<Result<(GroupMap, usize)>> {
        let mut groups = GroupMap::new();
        let mut pulled = 0;

        while pulled < self.read_size {
            match self.lines.next() {
                Some(Ok(line)) => {
                    let record = Record::parse(&line);
                    groups
                        .entry(record.key().to_string())
                        .or_default()
                        .push(record);
                    pulled += 1;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => break,
            }
        }

        if pulled < self.read_size {
            self.finished = true;
        }
        if pulled == 0 {
            return None;
        }
        Some(Ok((groups, pulled)))
    }
}

impl<I> Iterator for ChunkGrouper<I>
where
    I: Iterator<Item = Result<String>>,
{
    type Item = Result<GroupMap>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let (groups, pulled) = match self.read_chunk()? {
                Ok(chunk) => chunk,
                Err(e) => return Some(Err(e)),
            };

            self.stats.record_chunk(pulled);
            if is_samplable(&groups) {
                return Some(Ok(groups));
            }

            self.stats.record_skipped_chunk();
            debug!(
                records = pulled,
                groups = groups.len(),
                "skipping chunk without usable triplets"
            );
        }
        None
    }
}
