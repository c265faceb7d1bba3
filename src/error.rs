//! Error handling for the address enrichment pipeline
//!
//! Errors are split by blast radius: archive and staging failures abort the
//! whole run, while format and store failures only terminate the file task
//! that hit them.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::DictionaryKind;

/// Main error type for an enrichment run
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ambiguous {kind} key '{key_code}': exact lookup returned {rows} rows")]
    LookupAmbiguity {
        kind: DictionaryKind,
        key_code: String,
        rows: usize,
    },

    #[error("Archive not found: {}", path.display())]
    ArchiveNotFound { path: PathBuf },

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Source record decoding errors
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Truncated DBF header: expected {expected} bytes, found {found}")]
    TruncatedHeader { expected: usize, found: usize },

    #[error("Invalid DBF header: {message}")]
    InvalidHeader { message: String },

    #[error("Truncated record {index}: expected {expected} bytes, found {found}")]
    TruncatedRecord {
        index: u32,
        expected: usize,
        found: usize,
    },

    #[error("Record {index} has invalid deletion flag 0x{flag:02X}")]
    InvalidDeletionFlag { index: u32, flag: u8 },

    #[error("Undecodable {encoding} text in record {index}, field '{field}'")]
    Encoding {
        index: u32,
        field: String,
        encoding: &'static str,
    },

    #[error("Schema mismatch: field '{expected}' expected at position {position}, found {found}")]
    SchemaMismatch {
        expected: &'static str,
        position: usize,
        found: String,
    },

    #[error("IO error while reading records: {0}")]
    Io(#[from] std::io::Error),
}

/// Keyed store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid table binding: {message}")]
    InvalidBinding { message: String },

    #[error("Store unavailable: {message}")]
    Unavailable { message: String },
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {name}")]
    Missing { name: &'static str },

    #[error("Invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Result alias used across the pipeline
pub type EnrichResult<T> = Result<T, EnrichError>;
