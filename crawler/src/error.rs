//! Error taxonomy.
//!
//! Each variant carries the stable integer code from the design's error
//! table (`spec.md` §7); the code is part of the external contract of a
//! fetch result and must never be renumbered.

use std::io;

/// Errors raised anywhere in the crawler pipeline.
#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    #[error("database schema is out of sync: {0}")]
    DatabaseCorrupt(String),

    #[error("invalid filter query: must specify a domain or url")]
    QueryError,

    #[error("bloom filter error: {0}")]
    BloomFilterError(String),

    #[error("bloom filter exceeded its maximum insertion count ({max_n})")]
    SizeOverflow { max_n: usize },

    #[error("bloom filter's current error rate {current_p} exceeds configured {p}")]
    ExceedsErrorRate { current_p: f64, p: f64 },

    #[error("insufficient memory to allocate {name} ({size} bytes, {available} available)")]
    InsufficientMemory {
        name: String,
        size: usize,
        available: u64,
    },

    #[error("allocation size for {name} must be positive, got {size}")]
    AllocationValueError { name: String, size: i64 },

    #[error("operation attempted on a closed channel")]
    QueueClosed,

    #[error("resolved authority '{resolved}' does not match origin '{origin}'")]
    NetlocMismatch { origin: String, resolved: String },

    #[error("read timed out")]
    ReadTimeout,

    #[error("response exceeded the configured size limit")]
    ReadCutoff,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("could not parse url: {0}")]
    ParseError(String),

    #[error("channel misuse: {0}")]
    QueueError(String),

    #[error("no such admin operation: {0}")]
    NoSuchOperation(i64),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Sqlite(#[from] sqlite::Error),

    #[error(transparent)]
    Idna(#[from] idna::Errors),
}

impl CrawlError {
    /// The stable integer code, part of the fetch-result external contract.
    pub fn code(&self) -> i32 {
        match self {
            Self::DatabaseCorrupt(_) => 1,
            Self::QueryError => 2,
            Self::BloomFilterError(_) => 3,
            Self::SizeOverflow { .. } => 4,
            Self::ExceedsErrorRate { .. } => 5,
            Self::InsufficientMemory { .. } => 6,
            Self::AllocationValueError { .. } => 7,
            Self::QueueClosed => 8,
            Self::NetlocMismatch { .. } => 9,
            Self::ReadTimeout => 10,
            Self::ReadCutoff => 11,
            Self::FileNotFound(_) => 12,
            Self::ParseError(_) => 13,
            Self::QueueError(_) => 14,
            Self::NoSuchOperation(_) => 15,
            // Not part of the design's numbered taxonomy: these wrap
            // lower-level failures that are always reported alongside a
            // more specific code at the point they're raised, or bubble up
            // as process-fatal errors before a code would ever be read.
            Self::Io(_) | Self::Sqlite(_) | Self::Idna(_) => 0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout)
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
