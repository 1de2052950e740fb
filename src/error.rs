//! Custom error types for the application.
//!
//! This module defines the primary error type, `LogError`, for the entire
//! pipeline. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes the logger distinguishes:
//!
//! - **`Config`**: wraps errors from the `config` crate (missing or malformed
//!   configuration files).
//! - **`Io`**: wraps standard `std::io::Error` for filesystem issues outside
//!   the segment write path (session directory creation, manifest writes).
//! - **`Decode`**: a raw peripheral payload could not be converted into a
//!   sample. Non-fatal; the acquisition loop logs and skips it, and the
//!   persistence pipeline never sees it.
//! - **`Persistence`**: a segment write or flush failed (disk full,
//!   permission lost). Retried a bounded number of times at the flush call
//!   site; see `RetriesExhausted`.
//! - **`Merge`**: the segment directory could not be consolidated. Corrupt
//!   individual rows are *not* errors — they are dropped and counted — so
//!   this variant only covers irrecoverable problems such as an unreadable
//!   directory.
//! - **`Draining`**: `ingest` was called after `shutdown` began. Rejected
//!   explicitly rather than silently accepted.
//!
//! With `#[from]`, `LogError` can be created from underlying error types,
//! keeping `?` propagation clean throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, LogError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sample decode error: {0}")]
    Decode(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Flush failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Merge error: {0}")]
    Merge(String),

    #[error("Ingest rejected: persistence is draining or stopped")]
    Draining,

    #[error("Persistence task terminated unexpectedly")]
    WriterGone,
}

impl LogError {
    /// Whether the error is local to one sample and the pipeline can keep
    /// running. Decode failures are skipped by the acquisition loop;
    /// everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LogError::Decode(_))
    }
}
