//! Postgres dictionary store
//!
//! Queries are rendered once per dictionary kind from its `TableBinding`.
//! Batch writes update both tables inside one transaction using
//! `UNNEST`-ed id/code arrays, so a chunk costs one round trip per kind.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use super::{DictionaryBindings, DictionaryStore, TableBinding};
use crate::error::StoreError;
use crate::models::{DictionaryEntry, DictionaryKind};

#[derive(Debug, FromRow)]
struct EntryRow {
    id: i64,
    key_code: String,
    external_code: Option<String>,
}

impl EntryRow {
    fn into_entry(self, kind: DictionaryKind) -> DictionaryEntry {
        DictionaryEntry {
            kind,
            id: self.id,
            key_code: self.key_code,
            external_code: self.external_code,
        }
    }
}

/// Rendered SQL for one dictionary kind
#[derive(Debug, Clone)]
struct KindQueries {
    exact: String,
    prefix: String,
    update: String,
}

impl KindQueries {
    fn render(binding: &TableBinding) -> Self {
        let TableBinding {
            table,
            id_column,
            key_column,
            external_column,
        } = binding;

        let select = format!(
            "SELECT {id_column}::bigint AS id, {key_column} AS key_code, {external_column} AS external_code FROM {table}"
        );

        Self {
            exact: format!("{select} WHERE {key_column} = $1 ORDER BY {id_column}"),
            prefix: format!(
                "{select} WHERE {key_column} LIKE $1 ESCAPE '\\' ORDER BY {id_column}"
            ),
            update: format!(
                r#"
                UPDATE {table} AS t
                SET {external_column} = v.external_code
                FROM UNNEST($1::bigint[], $2::text[]) AS v(id, external_code)
                WHERE t.{id_column} = v.id
                "#
            ),
        }
    }
}

/// Dictionary store backed by the KLADR tables in Postgres
#[derive(Debug, Clone)]
pub struct PgDictionaryStore {
    pool: PgPool,
    street: KindQueries,
    settlement: KindQueries,
}

impl PgDictionaryStore {
    pub fn new(pool: PgPool, bindings: DictionaryBindings) -> Result<Self, StoreError> {
        bindings.validate()?;
        Ok(Self {
            pool,
            street: KindQueries::render(&bindings.street),
            settlement: KindQueries::render(&bindings.settlement),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn queries(&self, kind: DictionaryKind) -> &KindQueries {
        match kind {
            DictionaryKind::Street => &self.street,
            DictionaryKind::Settlement => &self.settlement,
        }
    }

    async fn fetch(
        &self,
        kind: DictionaryKind,
        sql: &str,
        param: &str,
    ) -> Result<Vec<DictionaryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, EntryRow>(sql)
            .bind(param)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.into_entry(kind)).collect())
    }
}

#[async_trait]
impl DictionaryStore for PgDictionaryStore {
    async fn find_by_key(
        &self,
        kind: DictionaryKind,
        key_code: &str,
    ) -> Result<Vec<DictionaryEntry>, StoreError> {
        self.fetch(kind, &self.queries(kind).exact, key_code).await
    }

    async fn find_by_prefix(
        &self,
        kind: DictionaryKind,
        prefix: &str,
    ) -> Result<Vec<DictionaryEntry>, StoreError> {
        let pattern = format!("{}%", escape_like(prefix));
        self.fetch(kind, &self.queries(kind).prefix, &pattern).await
    }

    async fn write_batch(
        &self,
        streets: &[DictionaryEntry],
        settlements: &[DictionaryEntry],
    ) -> Result<u64, StoreError> {
        if streets.is_empty() && settlements.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for (kind, entries) in [
            (DictionaryKind::Street, streets),
            (DictionaryKind::Settlement, settlements),
        ] {
            if entries.is_empty() {
                continue;
            }
            let (ids, codes) = latest_per_id(entries);
            let result = sqlx::query(&self.queries(kind).update)
                .bind(&ids)
                .bind(&codes)
                .execute(&mut *tx)
                .await?;
            debug!(%kind, rows = result.rows_affected(), "Updated dictionary rows");
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }
}

/// Escape `LIKE` metacharacters so the prefix matches literally.
fn escape_like(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// One (id, code) pair per row in ascending id order; a later stamp of the
/// same row wins.
///
/// `UPDATE .. FROM` picks an arbitrary source row when ids repeat. Ordered
/// ids make concurrent flushes lock shared rows in the same order.
fn latest_per_id(entries: &[DictionaryEntry]) -> (Vec<i64>, Vec<Option<String>>) {
    let latest: BTreeMap<i64, Option<String>> = entries
        .iter()
        .map(|entry| (entry.id, entry.external_code.clone()))
        .collect();
    latest.into_iter().unzip()
}
