//! Batch writer
//!
//! Drains a staging buffer into the store. Every flush is one call to
//! `DictionaryStore::write_batch` and therefore one transaction; nothing is
//! retried and earlier flushes are never rolled back.

use std::sync::Arc;

use tracing::debug;

use crate::database::DictionaryStore;
use crate::error::StoreError;
use crate::services::staging::StagingBuffer;

/// Whether flushes reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Persist,
    /// Drain buffers and count rows without writing them.
    DryRun,
}

/// Result of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub staged: usize,
    pub written: u64,
}

pub struct BatchWriter {
    store: Arc<dyn DictionaryStore>,
    mode: WriteMode,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn DictionaryStore>, mode: WriteMode) -> Self {
        Self { store, mode }
    }

    /// Write and clear both per-kind buffers.
    ///
    /// The buffer is emptied before the write is attempted, so it is empty
    /// afterwards whether or not the store call succeeds.
    pub async fn flush(&self, buffer: &mut StagingBuffer) -> Result<FlushStats, StoreError> {
        let batch = buffer.take();
        if batch.is_empty() {
            return Ok(FlushStats::default());
        }

        let staged = batch.len();
        let written = match self.mode {
            WriteMode::Persist => {
                self.store
                    .write_batch(&batch.streets, &batch.settlements)
                    .await?
            }
            WriteMode::DryRun => staged as u64,
        };

        debug!(
            streets = batch.streets.len(),
            settlements = batch.settlements.len(),
            written,
            dry_run = self.mode == WriteMode::DryRun,
            "Flushed staging buffer"
        );

        Ok(FlushStats { staged, written })
    }
}
