use crate::error::{LoaderError, Result};
use crate::grouping::{GroupMap, Record};
use rand::seq::index;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, warn};

/// Label of a pair whose sentences come from the same group.
pub const POSITIVE: i64 = 1;
/// Label of a pair whose sentences come from different groups.
pub const NEGATIVE: i64 = 0;

/// Default mention placeholder inserted between left and right context.
pub const DEFAULT_PLACEHOLDER: &str = "XXXXX";

/// Three parallel sequences produced by one sampling call.
///
/// For `n` units each sequence has length `2n`, and `labels` is always the
/// pattern `1, 0, 1, 0, ...`: every unit contributes its positive pair first
/// and its negative pair second.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripletBatch {
    pub sentences_a: Vec<String>,
    pub sentences_b: Vec<String>,
    pub labels: Vec<i64>,
}

impl TripletBatch {
    fn with_capacity(pairs: usize) -> Self {
        Self {
            sentences_a: Vec::with_capacity(pairs),
            sentences_b: Vec::with_capacity(pairs),
            labels: Vec::with_capacity(pairs),
        }
    }

    /// Number of sentence pairs.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// ============================================================================
/// Draws randomized, balanced positive/negative sentence pairs from one chunk.
///
/// Per unit:
/// 1. Two distinct group keys are drawn uniformly: the positive and the negative group.
/// 2. A positive group with fewer than 2 records is rejected and the draw is repeated
///    without progress, at most `max_draw_attempts` times in a row.
/// 3. `base` and `positive` are drawn without replacement from the positive group,
///    `negative` from the negative group (with replacement across units).
/// 4. For both pairs a fair coin decides whether `base` lands in slot A or slot B.
///    Labels are never flipped.
///
/// # Choosing `max_draw_attempts`
/// A single draw succeeds with probability `eligible / groups`, so a unit fails
/// with probability about `exp(-attempts * eligible / groups)`. One failed unit
/// fails the whole batch. Chunks with many singleton keys and few eligible
/// groups need `max_draw_attempts` to grow with the key count: with one
/// eligible group among 500 keys, 1000 attempts fail roughly one unit in 7.
///
/// # Randomness
/// The caller owns the RNG. The loader seeds one `StdRng` per chunk with
/// [`chunk_seed`], so a fixed seed reproduces identical batches in serial
/// and parallel mode.
///
/// # Example
/// ```ignore
/// let sampler = TripletSampler::new("XXXXX", 1000)?;
/// let mut rng = StdRng::seed_from_u64(42);
/// let batch = sampler.sample(&groups, 16, &mut rng)?;
/// assert_eq!(batch.len(), 32);
/// ```
#[derive(Debug, Clone)]
pub struct TripletSampler {
    placeholder: String,
    max_draw_attempts: usize,
}

impl TripletSampler {
    pub fn new(placeholder: impl Into<String>, max_draw_attempts: usize) -> Result<Self> {
        if max_draw_attempts == 0 {
            return Err(LoaderError::invalid_config(
                "max_draw_attempts must be greater than 0",
            ));
        }
        Ok(Self {
            placeholder: placeholder.into(),
            max_draw_attempts,
        })
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Samples `size` units (`2 * size` pairs) from `groups`.
    ///
    /// # Errors
    /// - `NotEnoughGroups` if `groups` has fewer than 2 keys.
    /// - `SamplingExhausted` if no group has 2+ records, or a unit could not
    ///   find a usable positive group within `max_draw_attempts` draws.
    /// - `MalformedRecord` if a drawn record lacks the context fields.
    pub fn sample<R>(&self, groups: &GroupMap, size: usize, rng: &mut R) -> Result<TripletBatch>
    where
        R: Rng + ?Sized,
    {
        let members: Vec<&[Record]> = groups.values().map(Vec::as_slice).collect();
        if members.len() < 2 {
            return Err(LoaderError::NotEnoughGroups(members.len()));
        }

        let eligible = members.iter().filter(|records| records.len() > 1).count();
        if eligible == 0 {
            return Err(LoaderError::SamplingExhausted {
                attempts: 0,
                eligible,
                groups: members.len(),
            });
        }

        let mut batch = TripletBatch::with_capacity(2 * size);
        let mut rejected = 0;
        for _ in 0..size {
            let (base, positive, negative) =
                self.draw_unit(&members, eligible, &mut rejected, rng)?;
            self.push_pair(&mut batch, base, positive, POSITIVE, rng)?;
            self.push_pair(&mut batch, base, negative, NEGATIVE, rng)?;
        }
        if rejected > 0 {
            debug!(
                rejected,
                units = size,
                eligible,
                groups = members.len(),
                "rejected positive-group draws"
            );
        }
        Ok(batch)
    }

    /// Draws `(base, positive, negative)` for one unit. Adds every rejected
    /// draw to `rejected`.
    fn draw_unit<'g, R>(
        &self,
        members: &[&'g [Record]],
        eligible: usize,
        rejected: &mut usize,
        rng: &mut R,
    ) -> Result<(&'g Record, &'g Record, &'g Record)>
    where
        R: Rng + ?Sized,
    {
        for _ in 0..self.max_draw_attempts {
            let picked = index::sample(rng, members.len(), 2);
            let positive_group = members[picked.index(0)];
            let negative_group = members[picked.index(1)];

            if positive_group.len() < 2 {
                *rejected += 1;
                continue;
            }

            let pair = index::sample(rng, positive_group.len(), 2);
            let base = &positive_group[pair.index(0)];
            let positive = &positive_group[pair.index(1)];
            let negative = &negative_group[rng.random_range(0..negative_group.len())];
            return Ok((base, positive, negative));
        }

        warn!(
            attempts = self.max_draw_attempts,
            eligible,
            groups = members.len(),
            "no usable positive group drawn; consider raising max_draw_attempts"
        );
        Err(LoaderError::SamplingExhausted {
            attempts: self.max_draw_attempts,
            eligible,
            groups: members.len(),
        })
    }

    fn push_pair<R>(
        &self,
        batch: &mut TripletBatch,
        base: &Record,
        other: &Record,
        label: i64,
        rng: &mut R,
    ) -> Result<()>
    where
        R: Rng + ?Sized,
    {
        let base_sentence = base.sentence(&self.placeholder)?;
        let other_sentence = other.sentence(&self.placeholder)?;

        let (a, b) = if rng.random_bool(0.5) {
            (base_sentence, other_sentence)
        } else {
            (other_sentence, base_sentence)
        };
        batch.sentences_a.push(a);
        batch.sentences_b.push(b);
        batch.labels.push(label);
        Ok(())
    }
}

/// Seed for the RNG of one chunk.
/// Seed formula: base_seed + (epoch << 32) + chunk_index
/// Each chunk gets unique but deterministic randomness, independent of which
/// thread ends up building it.
pub fn chunk_seed(base_seed: u64, epoch: usize, chunk_index: usize) -> u64 {
    base_seed
        .wrapping_add((epoch as u64) << 32)
        .wrapping_add(chunk_index as u64)
}

/// Derives the RNG for one chunk, see [`chunk_seed`].
#[inline]
pub fn chunk_rng(base_seed: u64, epoch: usize, chunk_index: usize) -> StdRng {
    StdRng::seed_from_u64(chunk_seed(base_seed, epoch, chunk_index))
}
