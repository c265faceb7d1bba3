//! Reconciliation engine
//!
//! Maps one external record onto dictionary rows:
//!
//! 1. empty key code: skipped, nothing is looked up or counted
//! 2. 17-character key code: street dictionary, anything else: settlement
//! 3. exact lookup; any hit stamps every returned row and ends the search
//! 4. otherwise prefix fallback on the key minus its last two characters,
//!    stamping every row that shares the parent prefix
//!
//! A miss is not an error. Only store failures (and ambiguous exact hits
//! under `AmbiguityPolicy::Reject`) propagate.

use std::sync::Arc;

use serde::Serialize;
use tracing::{trace, warn};

use crate::config::AmbiguityPolicy;
use crate::database::DictionaryStore;
use crate::error::{EnrichError, EnrichResult};
use crate::models::{DictionaryEntry, DictionaryKind, ExternalRecord};
use crate::services::staging::StagingBuffer;

/// How one record was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Empty key code
    Skipped,
    Exact { kind: DictionaryKind, rows: usize },
    Prefix { kind: DictionaryKind, rows: usize },
    NoMatch { kind: DictionaryKind },
}

/// Running match statistics for one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchCounters {
    /// Dictionary rows stamped
    pub matched: u64,
    /// Records resolved by exact lookup
    pub exact_hits: u64,
    /// Records resolved by prefix fallback
    pub prefix_hits: u64,
    /// Records with a key code that matched nothing
    pub no_match: u64,
    /// Exact lookups that returned more than one row
    pub ambiguous_keys: u64,
}

pub struct ReconciliationEngine {
    store: Arc<dyn DictionaryStore>,
    policy: AmbiguityPolicy,
    counters: MatchCounters,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn DictionaryStore>, policy: AmbiguityPolicy) -> Self {
        Self {
            store,
            policy,
            counters: MatchCounters::default(),
        }
    }

    pub fn counters(&self) -> MatchCounters {
        self.counters
    }

    /// Resolve `record` and stage every stamped row in `buffer`.
    pub async fn reconcile(
        &mut self,
        record: &ExternalRecord,
        buffer: &mut StagingBuffer,
    ) -> EnrichResult<MatchOutcome> {
        let key_code = record.key_code.as_str();
        if key_code.is_empty() {
            return Ok(MatchOutcome::Skipped);
        }

        let kind = DictionaryKind::for_key_code(key_code);

        let exact = self.store.find_by_key(kind, key_code).await?;
        if !exact.is_empty() {
            if exact.len() > 1 {
                self.on_ambiguous(kind, key_code, exact.len())?;
            }
            let rows = self.stamp_all(exact, &record.external_code, buffer);
            self.counters.exact_hits += 1;
            trace!(%kind, key_code, rows, "Exact match");
            return Ok(MatchOutcome::Exact { kind, rows });
        }

        let Some(prefix) = record.parent_prefix() else {
            self.counters.no_match += 1;
            return Ok(MatchOutcome::NoMatch { kind });
        };

        let children = self.store.find_by_prefix(kind, prefix).await?;
        if children.is_empty() {
            self.counters.no_match += 1;
            return Ok(MatchOutcome::NoMatch { kind });
        }

        let rows = self.stamp_all(children, &record.external_code, buffer);
        self.counters.prefix_hits += 1;
        trace!(%kind, key_code, prefix, rows, "Prefix match");
        Ok(MatchOutcome::Prefix { kind, rows })
    }

    fn on_ambiguous(
        &mut self,
        kind: DictionaryKind,
        key_code: &str,
        rows: usize,
    ) -> EnrichResult<()> {
        match self.policy {
            AmbiguityPolicy::MatchAll => {
                warn!(%kind, key_code, rows, "Exact lookup returned several rows; stamping all");
                self.counters.ambiguous_keys += 1;
                Ok(())
            }
            AmbiguityPolicy::Reject => Err(EnrichError::LookupAmbiguity {
                kind,
                key_code: key_code.to_string(),
                rows,
            }),
        }
    }

    fn stamp_all(
        &mut self,
        entries: Vec<DictionaryEntry>,
        external_code: &str,
        buffer: &mut StagingBuffer,
    ) -> usize {
        let rows = entries.len();
        for mut entry in entries {
            entry.stamp(external_code);
            buffer.push(entry);
        }
        self.counters.matched += rows as u64;
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryDictionaryStore;

    fn engine(store: &Arc<InMemoryDictionaryStore>) -> ReconciliationEngine {
        ReconciliationEngine::new(store.clone(), AmbiguityPolicy::MatchAll)
    }

    #[tokio::test]
    async fn exact_street_match_is_staged() {
        let store = Arc::new(InMemoryDictionaryStore::with_entries([DictionaryEntry::new(
            DictionaryKind::Street,
            1,
            "66123456789012345",
        )]));
        let mut engine = engine(&store);
        let mut buffer = StagingBuffer::new(100);

        let outcome = engine
            .reconcile(&ExternalRecord::new("FIAS-1", "66123456789012345"), &mut buffer)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MatchOutcome::Exact {
                kind: DictionaryKind::Street,
                rows: 1
            }
        );
        let staged = buffer.staged(DictionaryKind::Street);
        assert_eq!(staged[0].external_code.as_deref(), Some("FIAS-1"));
        assert_eq!(engine.counters().matched, 1);
        assert_eq!(engine.counters().exact_hits, 1);
    }

    #[tokio::test]
    async fn exact_hit_skips_prefix_fallback() {
        let store = Arc::new(InMemoryDictionaryStore::with_entries([
            DictionaryEntry::new(DictionaryKind::Settlement, 1, "6612345"),
            DictionaryEntry::new(DictionaryKind::Settlement, 2, "6612399"),
        ]));
        let mut engine = engine(&store);
        let mut buffer = StagingBuffer::new(100);

        engine
            .reconcile(&ExternalRecord::new("FIAS-2", "6612345"), &mut buffer)
            .await
            .unwrap();

        assert_eq!(store.lookup_count(), 1);
        assert_eq!(buffer.len(), 1);
        assert_eq!(engine.counters().prefix_hits, 0);
    }

    #[tokio::test]
    async fn prefix_fallback_stamps_every_child() {
        let store = Arc::new(InMemoryDictionaryStore::with_entries([
            DictionaryEntry::new(DictionaryKind::Settlement, 1, "661234501"),
            DictionaryEntry::new(DictionaryKind::Settlement, 2, "661234502"),
            DictionaryEntry::new(DictionaryKind::Settlement, 3, "6699"),
        ]));
        let mut engine = engine(&store);
        let mut buffer = StagingBuffer::new(100);

        let outcome = engine
            .reconcile(&ExternalRecord::new("FIAS-2", "6612345"), &mut buffer)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MatchOutcome::Prefix {
                kind: DictionaryKind::Settlement,
                rows: 2
            }
        );
        assert!(buffer
            .staged(DictionaryKind::Settlement)
            .iter()
            .all(|e| e.external_code.as_deref() == Some("FIAS-2")));
        assert_eq!(engine.counters().matched, 2);
    }

    #[tokio::test]
    async fn empty_key_does_nothing() {
        let store = Arc::new(InMemoryDictionaryStore::new());
        let mut engine = engine(&store);
        let mut buffer = StagingBuffer::new(100);

        let outcome = engine
            .reconcile(&ExternalRecord::new("FIAS-3", "   "), &mut buffer)
            .await
            .unwrap();

        assert_eq!(outcome, MatchOutcome::Skipped);
        assert_eq!(store.lookup_count(), 0);
        assert_eq!(engine.counters(), MatchCounters::default());
    }

    #[tokio::test]
    async fn short_key_skips_fallback() {
        let store = Arc::new(InMemoryDictionaryStore::with_entries([DictionaryEntry::new(
            DictionaryKind::Settlement,
            1,
            "66",
        )]));
        let mut engine = engine(&store);
        let mut buffer = StagingBuffer::new(100);

        let outcome = engine
            .reconcile(&ExternalRecord::new("FIAS-4", "6"), &mut buffer)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MatchOutcome::NoMatch {
                kind: DictionaryKind::Settlement
            }
        );
        assert_eq!(store.lookup_count(), 1);
        assert_eq!(engine.counters().no_match, 1);
    }

    #[tokio::test]
    async fn two_character_key_falls_back_on_empty_prefix() {
        let store = Arc::new(InMemoryDictionaryStore::with_entries([
            DictionaryEntry::new(DictionaryKind::Settlement, 1, "7701"),
            DictionaryEntry::new(DictionaryKind::Settlement, 2, "6601"),
        ]));
        let mut engine = engine(&store);
        let mut buffer = StagingBuffer::new(100);

        let outcome = engine
            .reconcile(&ExternalRecord::new("FIAS-X", "66"), &mut buffer)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            MatchOutcome::Prefix {
                kind: DictionaryKind::Settlement,
                rows: 2
            }
        );
        assert_eq!(store.lookup_count(), 2);
        assert_eq!(buffer.staged(DictionaryKind::Settlement).len(), 2);
    }

    #[tokio::test]
    async fn ambiguous_exact_hit_stamps_all_by_default() {
        let store = Arc::new(InMemoryDictionaryStore::with_entries([
            DictionaryEntry::new(DictionaryKind::Street, 1, "66123456789012345"),
            DictionaryEntry::new(DictionaryKind::Street, 2, "66123456789012345"),
        ]));
        let mut engine = engine(&store);
        let mut buffer = StagingBuffer::new(100);

        engine
            .reconcile(&ExternalRecord::new("FIAS-5", "66123456789012345"), &mut buffer)
            .await
            .unwrap();

        assert_eq!(buffer.len(), 2);
        assert_eq!(engine.counters().ambiguous_keys, 1);
        assert_eq!(engine.counters().matched, 2);
    }

    #[tokio::test]
    async fn ambiguous_exact_hit_fails_under_reject() {
        let store = Arc::new(InMemoryDictionaryStore::with_entries([
            DictionaryEntry::new(DictionaryKind::Street, 1, "66123456789012345"),
            DictionaryEntry::new(DictionaryKind::Street, 2, "66123456789012345"),
        ]));
        let mut engine = ReconciliationEngine::new(store.clone(), AmbiguityPolicy::Reject);
        let mut buffer = StagingBuffer::new(100);

        let err = engine
            .reconcile(&ExternalRecord::new("FIAS-5", "66123456789012345"), &mut buffer)
            .await
            .unwrap_err();

        assert!(matches!(err, EnrichError::LookupAmbiguity { rows: 2, .. }));
        assert!(buffer.is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::database::InMemoryDictionaryStore;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn arb_key(max_len: usize) -> impl Strategy<Value = String> {
        prop::collection::vec(prop::char::range('0', '3'), 0..=max_len)
            .prop_map(|chars| chars.into_iter().collect())
    }

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(future)
    }

    proptest! {
        #[test]
        fn key_length_decides_dictionary(key in arb_key(24)) {
            let kind = DictionaryKind::for_key_code(&key);
            prop_assert_eq!(kind == DictionaryKind::Street, key.chars().count() == 17);
        }

        #[test]
        fn stamped_rows_are_exact_hits_or_prefix_children(
            keys in prop::collection::vec(arb_key(6), 0..12),
            record_key in arb_key(6),
        ) {
            let entries: Vec<DictionaryEntry> = keys
                .iter()
                .enumerate()
                .map(|(id, key)| DictionaryEntry::new(DictionaryKind::Settlement, id as i64, key.clone()))
                .collect();
            let record = ExternalRecord::new("FIAS", &record_key);

            let exact: BTreeSet<i64> = entries
                .iter()
                .filter(|e| !record_key.is_empty() && e.key_code == record_key)
                .map(|e| e.id)
                .collect();
            let expected = if !exact.is_empty() || record_key.is_empty() {
                exact
            } else {
                match record.parent_prefix() {
                    Some(prefix) => entries
                        .iter()
                        .filter(|e| e.key_code.starts_with(prefix))
                        .map(|e| e.id)
                        .collect(),
                    None => BTreeSet::new(),
                }
            };

            let store = Arc::new(InMemoryDictionaryStore::with_entries(entries));
            let mut engine = ReconciliationEngine::new(store, AmbiguityPolicy::MatchAll);
            let mut buffer = StagingBuffer::new(1000);
            block_on(engine.reconcile(&record, &mut buffer)).expect("reconcile");

            let stamped: BTreeSet<i64> = buffer
                .staged(DictionaryKind::Settlement)
                .iter()
                .map(|e| e.id)
                .collect();
            prop_assert_eq!(&stamped, &expected);
            prop_assert_eq!(engine.counters().matched, expected.len() as u64);
            prop_assert!(buffer.staged(DictionaryKind::Street).is_empty());
        }
    }
}
