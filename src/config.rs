//! Run configuration
//!
//! Settings come from the environment (after `dotenvy` has loaded any
//! `.env` file). The CLI layers its own flags on top of the same struct.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CHUNK_SIZE: usize = 5000;
pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

/// What to do when an exact key lookup returns more than one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguityPolicy {
    /// Stamp every returned row, log a warning and count the key.
    #[default]
    MatchAll,
    /// Fail the owning file task.
    Reject,
}

impl FromStr for AmbiguityPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "match-all" | "match_all" | "all" => Ok(AmbiguityPolicy::MatchAll),
            "reject" | "error" => Ok(AmbiguityPolicy::Reject),
            other => Err(ConfigError::Invalid {
                name: "ENRICH_AMBIGUITY_POLICY",
                value: other.to_string(),
                reason: "expected 'match-all' or 'reject'".to_string(),
            }),
        }
    }
}

/// Enrichment run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Directory holding the archive; the staging directory is created here
    pub archive_dir: PathBuf,
    /// Archive file name inside `archive_dir`
    pub archive_file_name: String,
    /// Raw records (or staged rows) per flush
    pub chunk_size: usize,
    /// Maximum number of files processed concurrently
    pub worker_pool_size: usize,
    pub ambiguity_policy: AmbiguityPolicy,
}

impl EnrichConfig {
    pub fn new(archive_dir: impl Into<PathBuf>, archive_file_name: impl Into<String>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            archive_file_name: archive_file_name.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            ambiguity_policy: AmbiguityPolicy::default(),
        }
    }

    /// Load from `ADDRESS_FILE_PATH`, `ADDRESS_FILE_NAME`, `ENRICH_CHUNK_SIZE`,
    /// `ENRICH_WORKER_POOL_SIZE` and `ENRICH_AMBIGUITY_POLICY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let archive_dir = lookup("ADDRESS_FILE_PATH").ok_or(ConfigError::Missing {
            name: "ADDRESS_FILE_PATH",
        })?;
        let archive_file_name = lookup("ADDRESS_FILE_NAME").ok_or(ConfigError::Missing {
            name: "ADDRESS_FILE_NAME",
        })?;

        let mut config = Self::new(archive_dir, archive_file_name);
        if let Some(raw) = lookup("ENRICH_CHUNK_SIZE") {
            config.chunk_size = parse_count("ENRICH_CHUNK_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("ENRICH_WORKER_POOL_SIZE") {
            config.worker_pool_size = parse_count("ENRICH_WORKER_POOL_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("ENRICH_AMBIGUITY_POLICY") {
            config.ambiguity_policy = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_worker_pool_size(mut self, worker_pool_size: usize) -> Self {
        self.worker_pool_size = worker_pool_size;
        self
    }

    pub fn with_ambiguity_policy(mut self, policy: AmbiguityPolicy) -> Self {
        self.ambiguity_policy = policy;
        self
    }

    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir.join(&self.archive_file_name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.archive_file_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "ADDRESS_FILE_NAME",
                value: self.archive_file_name.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                name: "ENRICH_CHUNK_SIZE",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid {
                name: "ENRICH_WORKER_POOL_SIZE",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_count(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse::<usize>().map_err(|e| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
