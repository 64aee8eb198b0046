#![allow(dead_code)]

use triplet_loader::{
    BatchEncoder, EncodedBatch, EncodingSettings, HashingEncoder, LoaderConfig,
    LoaderConfigBuilder, PaddedMatrix,
};

use anyhow::{bail, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Spells a number with letters so the default tokenizer keeps it (`12` -> `bc`).
pub fn word(n: usize) -> String {
    n.to_string()
        .bytes()
        .map(|digit| (b'a' + (digit - b'0')) as char)
        .collect()
}

/// One TSV line for `key` with alphabetic, record-specific context.
pub fn record_line(key: &str, n: usize) -> String {
    format!("{}\tleft {}\tmention\tright {} end", key, word(n), word(n + 7))
}

/// Lines for the given keys, in order.
pub fn lines_for(keys: &[&str]) -> Vec<String> {
    keys.iter()
        .enumerate()
        .map(|(n, key)| record_line(key, n))
        .collect()
}

/// `num_keys` entities with `per_key` mentions each, grouped by key.
pub fn entity_lines(num_keys: usize, per_key: usize) -> Vec<String> {
    (0..num_keys)
        .flat_map(|k| (0..per_key).map(move |j| record_line(&format!("Q{}", word(k)), k * per_key + j)))
        .collect()
}

pub fn write_plain(dir: &Path, name: &str, lines: &[String]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut file = File::create(&path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(path)
}

pub fn write_gzip(dir: &Path, name: &str, lines: &[String]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
    for line in lines {
        writeln!(encoder, "{}", line)?;
    }
    encoder.finish()?;
    Ok(path)
}

pub fn write_zip(dir: &Path, name: &str, lines: &[String]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut zip = ZipWriter::new(File::create(&path)?);
    zip.start_file("data.tsv", SimpleFileOptions::default())?;
    for line in lines {
        writeln!(zip, "{}", line)?;
    }
    zip.finish()?;
    Ok(path)
}

/// Seeded configuration for `path` with small, test-friendly sizes.
pub fn config_for(path: &Path) -> LoaderConfigBuilder {
    LoaderConfig::builder()
        .path(path)
        .read_size(4)
        .batch_size(3)
        .dict_size(1000)
        .seed(42)
        .worker_timeout(Duration::from_millis(10))
}

pub fn collect_batches<I>(batches: I) -> Result<Vec<EncodedBatch>>
where
    I: Iterator<Item = triplet_loader::Result<EncodedBatch>>,
{
    Ok(batches.collect::<triplet_loader::Result<Vec<_>>>()?)
}

// ============================================================================
// Test encoders
// ============================================================================

/// Counts `encode` calls and delegates to the hashing encoder.
#[derive(Clone, Default)]
pub struct CountingEncoder {
    pub calls: Arc<AtomicUsize>,
    inner: HashingEncoder,
}

impl BatchEncoder for CountingEncoder {
    fn encode(&self, sentences: &[String], settings: &EncodingSettings) -> Result<PaddedMatrix> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        self.inner.encode(sentences, settings)
    }
}

/// Sleeps a content-dependent time so workers finish out of order.
#[derive(Clone, Default)]
pub struct JitterEncoder {
    inner: HashingEncoder,
}

impl BatchEncoder for JitterEncoder {
    fn encode(&self, sentences: &[String], settings: &EncodingSettings) -> Result<PaddedMatrix> {
        let jitter = sentences.iter().map(String::len).sum::<usize>() % 7;
        std::thread::sleep(Duration::from_millis(jitter as u64 * 3));
        self.inner.encode(sentences, settings)
    }
}

/// Sleeps a fixed time on every call.
#[derive(Clone)]
pub struct SlowEncoder {
    pub delay: Duration,
}

impl BatchEncoder for SlowEncoder {
    fn encode(&self, sentences: &[String], settings: &EncodingSettings) -> Result<PaddedMatrix> {
        std::thread::sleep(self.delay);
        <HashingEncoder>::default().encode(sentences, settings)
    }
}

/// Panics whenever a sentence contains `poison`.
#[derive(Clone, Default)]
pub struct PanickingEncoder {
    inner: HashingEncoder,
}

impl BatchEncoder for PanickingEncoder {
    fn encode(&self, sentences: &[String], settings: &EncodingSettings) -> Result<PaddedMatrix> {
        if sentences.iter().any(|s| s.contains("poison")) {
            panic!("encoder crashed on a poisoned sentence");
        }
        self.inner.encode(sentences, settings)
    }
}

/// Fails whenever a sentence contains `poison`.
#[derive(Clone, Default)]
pub struct PoisonEncoder {
    inner: HashingEncoder,
}

impl BatchEncoder for PoisonEncoder {
    fn encode(&self, sentences: &[String], settings: &EncodingSettings) -> Result<PaddedMatrix> {
        if sentences.iter().any(|s| s.contains("poison")) {
            bail!("refusing to encode poisoned sentence");
        }
        self.inner.encode(sentences, settings)
    }
}

/// Keeps every sentence and the name of the thread that encoded it.
#[derive(Clone, Default)]
pub struct RecordingEncoder {
    pub sentences: Arc<Mutex<Vec<String>>>,
    pub threads: Arc<Mutex<Vec<String>>>,
    inner: HashingEncoder,
}

impl BatchEncoder for RecordingEncoder {
    fn encode(&self, sentences: &[String], settings: &EncodingSettings) -> Result<PaddedMatrix> {
        let thread_name = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        if let (Ok(mut seen), Ok(mut threads)) = (self.sentences.lock(), self.threads.lock()) {
            seen.extend(sentences.iter().cloned());
            threads.push(thread_name);
        }
        self.inner.encode(sentences, settings)
    }
}
