use std::path::PathBuf;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors raised by the loading and sampling pipeline
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Cannot open source {path}: {source}")]
    SourceAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported source {path}: {reason}")]
    UnsupportedSource { path: PathBuf, reason: String },

    #[error("Failed to decode line {line} of {path}: {source}")]
    Decode {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record for key '{key}': expected at least {expected} fields, got {found}")]
    MalformedRecord {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("Group map has {0} distinct key(s), at least 2 are required")]
    NotEnoughGroups(usize),

    #[error("No usable positive group found after {attempts} draw(s) ({eligible} of {groups} groups have 2+ records)")]
    SamplingExhausted {
        attempts: usize,
        eligible: usize,
        groups: usize,
    },

    #[error("Cache {path} is corrupted at record {record}: {reason}")]
    CacheCorruption {
        path: PathBuf,
        record: usize,
        reason: String,
    },

    #[error("Cache I/O error on {path}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Batch encoding failed: {0:#}")]
    Encode(anyhow::Error),

    #[error("Worker pool error: {0}")]
    Worker(String),
}

impl LoaderError {
    /// Create an invalid configuration error with a custom message
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        LoaderError::InvalidConfig(msg.into())
    }

    /// Create a worker pool error with a custom message
    pub fn worker<S: Into<String>>(msg: S) -> Self {
        LoaderError::Worker(msg.into())
    }

    pub(crate) fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoaderError::CacheIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corruption(
        path: impl Into<PathBuf>,
        record: usize,
        reason: impl Into<String>,
    ) -> Self {
        LoaderError::CacheCorruption {
            path: path.into(),
            record,
            reason: reason.into(),
        }
    }
}
