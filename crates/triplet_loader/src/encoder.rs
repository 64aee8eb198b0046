//! Numeric encoding of sentence batches.
//!
//! The pipeline treats encoding as an external collaborator: it only relies on
//! [`BatchEncoder`] being deterministic for identical input and returning one
//! row per sentence, padded to a common width. [`HashingEncoder`] is the
//! default implementation (dictionary hashing of words or character trigrams).

use crate::error::{LoaderError, Result};
use crate::sampler::TripletBatch;
use anyhow::ensure;
use serde::{Deserialize, Serialize};

/// Value used for padding positions; real features are always `>= 1`.
pub const PAD_ID: i64 = 0;

/// Row-major integer matrix, one row per sentence, padded with [`PAD_ID`].
///
/// Deserialization rejects a payload whose `data` length is not
/// `rows * width`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix")]
pub struct PaddedMatrix {
    rows: usize,
    width: usize,
    data: Vec<i64>,
}

/// Unchecked wire form of [`PaddedMatrix`].
#[derive(Deserialize)]
struct RawMatrix {
    rows: usize,
    width: usize,
    data: Vec<i64>,
}

impl TryFrom<RawMatrix> for PaddedMatrix {
    type Error = String;

    fn try_from(raw: RawMatrix) -> std::result::Result<Self, Self::Error> {
        match raw.rows.checked_mul(raw.width) {
            Some(cells) if cells == raw.data.len() => Ok(Self {
                rows: raw.rows,
                width: raw.width,
                data: raw.data,
            }),
            _ => Err(format!(
                "matrix shape ({}, {}) does not match {} values",
                raw.rows,
                raw.width,
                raw.data.len()
            )),
        }
    }
}

impl PaddedMatrix {
    /// Pads variable-length rows to the longest row (MaxLength padding).
    pub fn from_rows(rows: Vec<Vec<i64>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in &rows {
            data.extend_from_slice(row);
            data.extend(std::iter::repeat(PAD_ID).take(width - row.len()));
        }
        Self {
            rows: rows.len(),
            width,
            data,
        }
    }

    /// `(rows, width)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.width)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, index: usize) -> Option<&[i64]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.width;
        self.data.get(start..start + self.width)
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.data
    }
}

/// Numeric form of a [`TripletBatch`]: `(tensor_a, tensor_b, labels)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedBatch {
    pub tensor_a: PaddedMatrix,
    pub tensor_b: PaddedMatrix,
    pub labels: Vec<i64>,
}

impl EncodedBatch {
    /// Number of sentence pairs.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Checks that both matrices have one row per label and that every label
    /// is 0 or 1.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let pairs = self.labels.len();
        if self.tensor_a.rows() != pairs || self.tensor_b.rows() != pairs {
            return Err(format!(
                "row counts ({}, {}) do not match {} labels",
                self.tensor_a.rows(),
                self.tensor_b.rows(),
                pairs
            ));
        }
        if let Some(label) = self.labels.iter().find(|&&l| l != 0 && l != 1) {
            return Err(format!("label {} is not 0 or 1", label));
        }
        Ok(())
    }
}

/// Encoder settings forwarded from the loader configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingSettings {
    /// Upper bound (exclusive) on feature ids.
    pub dict_size: usize,
    /// Encode character trigrams instead of whole words.
    pub ngram_mode: bool,
}

/// Splits text into tokens. Treated as an opaque function by the pipeline.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn tokenize(&self, text: &str) -> Vec<String> {
        self(text)
    }
}

/// Turns sentences into a padded integer matrix.
///
/// Implementations must be deterministic and return exactly one row per
/// input sentence. They are shared read-only across worker threads.
pub trait BatchEncoder: Send + Sync {
    fn encode(&self, sentences: &[String], settings: &EncodingSettings)
        -> anyhow::Result<PaddedMatrix>;
}

/// Encodes both sides of a triplet batch and attaches its labels.
pub fn encode_batch<E>(
    encoder: &E,
    batch: TripletBatch,
    settings: &EncodingSettings,
) -> Result<EncodedBatch>
where
    E: BatchEncoder + ?Sized,
{
    let encode_side = |sentences: &[String]| -> Result<PaddedMatrix> {
        let matrix = encoder
            .encode(sentences, settings)
            .map_err(LoaderError::Encode)?;
        if matrix.rows() != sentences.len() {
            return Err(LoaderError::Encode(anyhow::anyhow!(
                "encoder returned {} rows for {} sentences",
                matrix.rows(),
                sentences.len()
            )));
        }
        Ok(matrix)
    };

    Ok(EncodedBatch {
        tensor_a: encode_side(&batch.sentences_a)?,
        tensor_b: encode_side(&batch.sentences_b)?,
        labels: batch.labels,
    })
}

/// Lowercased alphabetic word tokenizer.
///
/// Splits on every non-alphanumeric character and drops tokens containing digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaTokenizer;

impl Tokenizer for AlphaTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty() && token.chars().all(char::is_alphabetic))
            .map(str::to_lowercase)
            .collect()
    }
}

/// ===========================================================================
/// Dictionary-hashing encoder
///
/// Maps every feature to `1 + fnv1a(feature) % (dict_size - 1)`, so ids stay in
/// `1..dict_size` and `0` is free for padding. FNV-1a is stable across
/// processes and platforms, which keeps cached batches valid between runs.
///
/// - Word mode: one feature per token.
/// - N-gram mode: character trigrams of each token, with `#` marking token
///   boundaries (`cat` -> `#ca`, `cat`, `at#`).
#[derive(Debug, Clone)]
pub struct HashingEncoder<T = AlphaTokenizer> {
    tokenizer: T,
}

impl Default for HashingEncoder {
    fn default() -> Self {
        Self::new(AlphaTokenizer)
    }
}

impl<T: Tokenizer> HashingEncoder<T> {
    pub fn new(tokenizer: T) -> Self {
        Self { tokenizer }
    }

    fn features(&self, sentence: &str, ngram_mode: bool) -> Vec<String> {
        let tokens = self.tokenizer.tokenize(sentence);
        if !ngram_mode {
            return tokens;
        }
        tokens
            .iter()
            .flat_map(|token| {
                let marked: Vec<char> = format!("#{}#", token).chars().collect();
                marked
                    .windows(3)
                    .map(|w| w.iter().collect::<String>())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl<T: Tokenizer> BatchEncoder for HashingEncoder<T> {
    fn encode(
        &self,
        sentences: &[String],
        settings: &EncodingSettings,
    ) -> anyhow::Result<PaddedMatrix> {
        ensure!(
            settings.dict_size > 1,
            "dict_size must be greater than 1, got {}",
            settings.dict_size
        );
        let buckets = (settings.dict_size - 1) as u64;

        let rows = sentences
            .iter()
            .map(|sentence| {
                self.features(sentence, settings.ngram_mode)
                    .iter()
                    .map(|feature| 1 + (fnv1a(feature.as_bytes()) % buckets) as i64)
                    .collect()
            })
            .collect();
        Ok(PaddedMatrix::from_rows(rows))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}
