//! Per-file staging buffer
//!
//! Accumulates stamped dictionary rows between flushes. A buffer belongs to
//! exactly one file task and is never shared.

use crate::models::{DictionaryEntry, DictionaryKind};

/// Rows taken out of a buffer for one flush
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StagedBatch {
    pub streets: Vec<DictionaryEntry>,
    pub settlements: Vec<DictionaryEntry>,
}

impl StagedBatch {
    pub fn len(&self) -> usize {
        self.streets.len() + self.settlements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streets.is_empty() && self.settlements.is_empty()
    }
}

/// Bounded accumulator of stamped rows, one list per dictionary kind
#[derive(Debug)]
pub struct StagingBuffer {
    chunk_size: usize,
    records_since_flush: usize,
    batch: StagedBatch,
}

impl StagingBuffer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            records_since_flush: 0,
            batch: StagedBatch::default(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn push(&mut self, entry: DictionaryEntry) {
        match entry.kind {
            DictionaryKind::Street => self.batch.streets.push(entry),
            DictionaryKind::Settlement => self.batch.settlements.push(entry),
        }
    }

    /// Count one raw source record toward the flush threshold.
    pub fn record_processed(&mut self) {
        self.records_since_flush += 1;
    }

    pub fn records_since_flush(&self) -> usize {
        self.records_since_flush
    }

    /// Staged rows across both kinds.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn staged(&self, kind: DictionaryKind) -> &[DictionaryEntry] {
        match kind {
            DictionaryKind::Street => &self.batch.streets,
            DictionaryKind::Settlement => &self.batch.settlements,
        }
    }

    /// True once the records read or the rows staged since the last flush
    /// reach the chunk size.
    ///
    /// The staged-row trigger is deliberate and goes beyond a per-record
    /// chunk: prefix fallback can stage many rows for one record, and the
    /// buffer must stay bounded by `chunk_size` rows plus one record's
    /// fan-out.
    pub fn should_flush(&self) -> bool {
        self.records_since_flush >= self.chunk_size || self.batch.len() >= self.chunk_size
    }

    /// Empty the buffer and reset the record counter.
    pub fn take(&mut self) -> StagedBatch {
        self.records_since_flush = 0;
        std::mem::take(&mut self.batch)
    }
}
