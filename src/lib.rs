//! Address enrichment
//!
//! Stamps FIAS registry codes (`AOGUID`) onto the KLADR street and
//! settlement dictionaries. A run reads a ZIP of `ADDROB<nn>.DBF` tables,
//! matches every record's KLADR code against the dictionaries (exact first,
//! then by parent prefix) and writes the codes back in chunked
//! transactions, one file per worker.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use address_enrich::{AddressEnrichmentService, EnrichConfig, InMemoryDictionaryStore};
//!
//! # async fn demo() -> address_enrich::EnrichResult<()> {
//! let config = EnrichConfig::new("/data/fias", "fias_dbf.zip");
//! let service = AddressEnrichmentService::new(config, Arc::new(InMemoryDictionaryStore::new()));
//! let report = service.run().await?;
//! println!("{} records, {} matches", report.processed, report.matched);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

pub mod config;
pub mod models;

// Archive extraction and DBF decoding
pub mod archive;
pub mod source;

// Dictionary stores (Postgres when enabled)
pub mod database;

pub mod services;

// HTTP trigger (when enabled)
#[cfg(feature = "server")]
pub mod api;

pub use config::{AmbiguityPolicy, EnrichConfig};
pub use database::{DictionaryBindings, DictionaryStore, InMemoryDictionaryStore, TableBinding};
pub use error::{ConfigError, EnrichError, EnrichResult, FormatError, StoreError};
pub use models::{DictionaryEntry, DictionaryKind, ExternalRecord};
pub use services::{
    AddressEnrichmentService, FileOutcome, FileResult, RunReport, TriggerOutcome, WriteMode,
};

#[cfg(feature = "database")]
pub use database::{DatabaseConfig, DatabaseManager, PgDictionaryStore};
