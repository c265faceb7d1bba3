//! In-memory dictionary store
//!
//! Holds both dictionaries behind a `tokio::sync::RwLock`. Records how it was
//! called (lookups and flush sizes) so pipeline behaviour can be asserted
//! without a database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::DictionaryStore;
use crate::error::StoreError;
use crate::models::{DictionaryEntry, DictionaryKind};

/// Rows keyed by (kind, id)
type Rows = BTreeMap<(DictionaryKind, i64), DictionaryEntry>;

#[derive(Debug, Default)]
pub struct InMemoryDictionaryStore {
    rows: RwLock<Rows>,
    lookups: AtomicUsize,
    flushes: Mutex<Vec<usize>>,
    fail_writes: AtomicBool,
}

impl InMemoryDictionaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = DictionaryEntry>) -> Self {
        let rows = entries
            .into_iter()
            .map(|entry| ((entry.kind, entry.id), entry))
            .collect();
        Self {
            rows: RwLock::new(rows),
            ..Self::default()
        }
    }

    pub async fn get(&self, kind: DictionaryKind, id: i64) -> Option<DictionaryEntry> {
        self.rows.read().await.get(&(kind, id)).cloned()
    }

    /// Snapshot of one dictionary in id order.
    pub async fn entries(&self, kind: DictionaryKind) -> Vec<DictionaryEntry> {
        self.rows
            .read()
            .await
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Exact and prefix lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Row count of every successful `write_batch` call, in commit order.
    pub fn flush_sizes(&self) -> Vec<usize> {
        self.flushes
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    /// Make every following `write_batch` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    async fn select<F>(&self, kind: DictionaryKind, matches: F) -> Vec<DictionaryEntry>
    where
        F: Fn(&str) -> bool,
    {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.rows
            .read()
            .await
            .values()
            .filter(|e| e.kind == kind && matches(&e.key_code))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DictionaryStore for InMemoryDictionaryStore {
    async fn find_by_key(
        &self,
        kind: DictionaryKind,
        key_code: &str,
    ) -> Result<Vec<DictionaryEntry>, StoreError> {
        Ok(self.select(kind, |key| key == key_code).await)
    }

    async fn find_by_prefix(
        &self,
        kind: DictionaryKind,
        prefix: &str,
    ) -> Result<Vec<DictionaryEntry>, StoreError> {
        Ok(self.select(kind, |key| key.starts_with(prefix)).await)
    }

    async fn write_batch(
        &self,
        streets: &[DictionaryEntry],
        settlements: &[DictionaryEntry],
    ) -> Result<u64, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "writes disabled".to_string(),
            });
        }

        // Both kinds are applied under one write guard.
        let mut rows = self.rows.write().await;
        let mut written = 0u64;
        for entry in streets.iter().chain(settlements) {
            if let Some(row) = rows.get_mut(&(entry.kind, entry.id)) {
                row.external_code = entry.external_code.clone();
                written += 1;
            }
        }
        drop(rows);

        if let Ok(mut flushes) = self.flushes.lock() {
            flushes.push(streets.len() + settlements.len());
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn street(id: i64, key: &str) -> DictionaryEntry {
        DictionaryEntry::new(DictionaryKind::Street, id, key)
    }

    fn settlement(id: i64, key: &str) -> DictionaryEntry {
        DictionaryEntry::new(DictionaryKind::Settlement, id, key)
    }

    #[tokio::test]
    async fn lookups_are_scoped_to_kind() {
        let store = InMemoryDictionaryStore::with_entries([
            street(1, "6612345"),
            settlement(1, "6612345"),
            settlement(2, "6612399"),
        ]);

        let exact = store
            .find_by_key(DictionaryKind::Settlement, "6612345")
            .await
            .unwrap();
        assert_eq!(exact, vec![settlement(1, "6612345")]);

        let prefix = store
            .find_by_prefix(DictionaryKind::Settlement, "66123")
            .await
            .unwrap();
        assert_eq!(prefix.len(), 2);
        assert_eq!(store.lookup_count(), 2);
    }

    #[tokio::test]
    async fn write_batch_updates_existing_rows_only() {
        let store = InMemoryDictionaryStore::with_entries([street(1, "a"), settlement(5, "b")]);

        let mut s = street(1, "a");
        s.stamp("FIAS-1");
        let mut missing = settlement(99, "zz");
        missing.stamp("FIAS-9");

        let written = store.write_batch(&[s], &[missing]).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(
            store
                .get(DictionaryKind::Street, 1)
                .await
                .unwrap()
                .external_code
                .as_deref(),
            Some("FIAS-1")
        );
        assert!(store.get(DictionaryKind::Settlement, 99).await.is_none());
        assert_eq!(store.flush_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn failing_writes_leave_rows_untouched() {
        let store = InMemoryDictionaryStore::with_entries([street(1, "a")]);
        store.fail_writes(true);

        let mut s = street(1, "a");
        s.stamp("FIAS-1");
        assert!(store.write_batch(&[s], &[]).await.is_err());
        assert!(store
            .get(DictionaryKind::Street, 1)
            .await
            .unwrap()
            .external_code
            .is_none());
        assert!(store.flush_sizes().is_empty());
    }
}
