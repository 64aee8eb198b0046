//! On-disk cache of encoded batches.
//!
//! A cache file holds one full pass of the pipeline so later runs can skip
//! reading, grouping, sampling and encoding altogether.
//!
//! # File layout
//! ```text
//! [8 bytes magic "TLCACHE\0"][u32 LE format version]
//! [u64 LE length][bincode payload]   <- one record per encoded batch
//! [u64 LE length][bincode payload]
//! ...
//! ```
//!
//! # Load strategy
//! Decided once when the cache is opened, by comparing the file size with the
//! configured memory budget:
//! - Below budget: every record is decoded up front and replayed from memory.
//! - At or above budget: records are decoded one at a time per `next()`.
//!
//! # Corruption
//! A truncated or undecodable record either fails the stream
//! (`CorruptionPolicy::Fail`, the default) or ends it early with a warning
//! (`CorruptionPolicy::Truncate`). Truncations are counted in [`LoaderStats`].

use crate::encoder::EncodedBatch;
use crate::error::{LoaderError, Result};
use crate::stats::LoaderStats;
use bincode::config;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAGIC: &[u8; 8] = b"TLCACHE\0";
const FORMAT_VERSION: u32 = 1;
const HEADER_BYTES: u64 = 12;
const LENGTH_PREFIX_BYTES: u64 = 8;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Suffix appended to the source path to locate its cache.
pub const CACHE_SUFFIX: &str = ".cache";

/// What to do with a record that cannot be read back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionPolicy {
    /// Yield a `CacheCorruption` error and stop.
    #[default]
    Fail,
    /// Log, count and end the stream as if the file ended there.
    Truncate,
}

/// A cache opened for replay.
#[derive(Debug, Clone)]
pub enum CacheHandle {
    /// Fully materialized in memory.
    Eager(Arc<[EncodedBatch]>),
    /// Decoded lazily from disk on every pass.
    Streaming(CacheStore),
}

impl CacheHandle {
    pub fn is_streaming(&self) -> bool {
        matches!(self, CacheHandle::Streaming(_))
    }
}

/// Reads and writes the cache file for one source.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
    policy: CorruptionPolicy,
    stats: LoaderStats,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>, policy: CorruptionPolicy, stats: LoaderStats) -> Self {
        Self {
            path: path.into(),
            policy,
            stats,
        }
    }

    /// Store located at `<source>.cache`.
    pub fn for_source(source: &Path, policy: CorruptionPolicy, stats: LoaderStats) -> Self {
        Self::new(cache_path_for(source), policy, stats)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Writes every batch to a fresh cache file and returns how many were written.
    ///
    /// Batches go to a temporary sibling first and are renamed into place at the
    /// end, so an existing cache is replaced whole and a failed pass leaves no
    /// cache behind. The first `Err` from `batches` aborts the write.
    pub fn write<I>(&self, batches: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<EncodedBatch>>,
    {
        let tmp_path = sibling_with_suffix(&self.path, ".tmp");
        let result = self.write_to(&tmp_path, batches);

        match result {
            Ok(count) => {
                fs::rename(&tmp_path, &self.path)
                    .map_err(|e| LoaderError::cache_io(&self.path, e))?;
                info!(path = %self.path.display(), batches = count, "cache written");
                Ok(count)
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    fn write_to<I>(&self, tmp_path: &Path, batches: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<EncodedBatch>>,
    {
        let io_err = |e| LoaderError::cache_io(tmp_path, e);
        let file = File::create(tmp_path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC).map_err(io_err)?;
        writer
            .write_all(&FORMAT_VERSION.to_le_bytes())
            .map_err(io_err)?;

        let mut count = 0;
        for batch in batches {
            let payload = bincode::serde::encode_to_vec(&batch?, config::standard())
                .map_err(|e| io_err(std::io::Error::other(e.to_string())))?;
            writer
                .write_all(&(payload.len() as u64).to_le_bytes())
                .map_err(io_err)?;
            writer.write_all(&payload).map_err(io_err)?;
            count += 1;
        }

        writer
            .into_inner()
            .map_err(|e| io_err(e.into_error()))?
            .sync_all()
            .map_err(io_err)?;
        Ok(count)
    }

    /// Opens the cache for replay, choosing eager or streaming mode.
    ///
    /// Returns `Ok(None)` when no cache file exists. Streams when the file size
    /// is at or above `budget_mb` megabytes, otherwise loads every batch.
    pub fn open(&self, budget_mb: u64) -> Result<Option<CacheHandle>> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LoaderError::cache_io(&self.path, e)),
        };
        let budget = budget_mb.saturating_mul(BYTES_PER_MB);

        if size >= budget {
            // Header check only; records are decoded on demand.
            self.stream()?;
            info!(
                path = %self.path.display(),
                size_bytes = size,
                budget_bytes = budget,
                "streaming cache from disk"
            );
            Ok(Some(CacheHandle::Streaming(self.clone())))
        } else {
            let batches = self.load_all()?;
            info!(
                path = %self.path.display(),
                size_bytes = size,
                batches = batches.len(),
                "loaded cache into memory"
            );
            Ok(Some(CacheHandle::Eager(batches.into())))
        }
    }

    /// Decodes every record into memory, honouring the corruption policy.
    pub fn load_all(&self) -> Result<Vec<EncodedBatch>> {
        self.stream()?.collect()
    }

    /// Opens a lazy, sequential reader over the records.
    pub fn stream(&self) -> Result<CacheStream> {
        let file = File::open(&self.path).map_err(|e| LoaderError::cache_io(&self.path, e))?;
        let size = file
            .metadata()
            .map_err(|e| LoaderError::cache_io(&self.path, e))?
            .len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_BYTES as usize];
        reader.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => LoaderError::corruption(&self.path, 0, "missing header"),
            _ => LoaderError::cache_io(&self.path, e),
        })?;
        if &header[..8] != MAGIC {
            return Err(LoaderError::corruption(&self.path, 0, "not a batch cache file"));
        }
        let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if version != FORMAT_VERSION {
            return Err(LoaderError::corruption(
                &self.path,
                0,
                format!("unsupported format version {}", version),
            ));
        }

        debug!(path = %self.path.display(), "opened cache stream");
        Ok(CacheStream {
            reader,
            path: self.path.clone(),
            remaining: size.saturating_sub(HEADER_BYTES),
            record: 0,
            policy: self.policy,
            stats: self.stats.clone(),
            done: false,
        })
    }
}

/// `<source>.cache`
pub fn cache_path_for(source: &Path) -> PathBuf {
    sibling_with_suffix(source, CACHE_SUFFIX)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

enum RecordError {
    Io(std::io::Error),
    Corrupt(String),
}

/// Sequential reader over cache records. Holds the file open until dropped.
pub struct CacheStream {
    reader: BufReader<File>,
    path: PathBuf,
    remaining: u64,
    record: usize,
    policy: CorruptionPolicy,
    stats: LoaderStats,
    done: bool,
}

impl CacheStream {
    /// Index of the next record to be read.
    pub fn position(&self) -> usize {
        self.record
    }

    fn read_record(&mut self) -> std::result::Result<Option<EncodedBatch>, RecordError> {
        let at_eof = self.reader.fill_buf().map_err(RecordError::Io)?.is_empty();
        if at_eof {
            return Ok(None);
        }

        if self.remaining < LENGTH_PREFIX_BYTES {
            return Err(RecordError::Corrupt("truncated length prefix".into()));
        }
        let mut prefix = [0u8; LENGTH_PREFIX_BYTES as usize];
        self.reader.read_exact(&mut prefix).map_err(RecordError::Io)?;
        self.remaining -= LENGTH_PREFIX_BYTES;

        let len = u64::from_le_bytes(prefix);
        if len > self.remaining {
            return Err(RecordError::Corrupt(format!(
                "record length {} exceeds the {} remaining bytes",
                len, self.remaining
            )));
        }

        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload).map_err(RecordError::Io)?;
        self.remaining -= len;

        let (batch, consumed): (EncodedBatch, usize) =
            bincode::serde::decode_from_slice(&payload, config::standard())
                .map_err(|e| RecordError::Corrupt(e.to_string()))?;
        if consumed != payload.len() {
            return Err(RecordError::Corrupt(format!(
                "{} trailing bytes after record",
                payload.len() - consumed
            )));
        }
        batch.validate().map_err(RecordError::Corrupt)?;
        Ok(Some(batch))
    }
}

impl Iterator for CacheStream {
    type Item = Result<EncodedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.read_record() {
            Ok(Some(batch)) => {
                self.record += 1;
                Some(Ok(batch))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(RecordError::Io(e)) => {
                self.done = true;
                Some(Err(LoaderError::cache_io(&self.path, e)))
            }
            Err(RecordError::Corrupt(reason)) => {
                self.done = true;
                match self.policy {
                    CorruptionPolicy::Fail => {
                        Some(Err(LoaderError::corruption(&self.path, self.record, reason)))
                    }
                    CorruptionPolicy::Truncate => {
                        self.stats.record_cache_truncation();
                        warn!(
                            path = %self.path.display(),
                            record = self.record,
                            %reason,
                            "cache stream truncated at corrupt record"
                        );
                        None
                    }
                }
            }
        }
    }
}
