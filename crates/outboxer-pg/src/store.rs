use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outboxer_core::domain::{OutboxEntry, OutboxId, PublishedReference, Subject};
use outboxer_core::ports::{OutboxStore, OutboxTransaction, StoreError};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Executor, Postgres, Row, Transaction};
use tracing::info;

use crate::sql::{Statements, TableName};

#[derive(Debug, Clone, Default)]
pub struct PgStoreOptions {
    /// `SET LOCAL lock_timeout` for every claim transaction. `None` keeps the server default.
    pub lock_timeout: Option<Duration>,
}

/// Outbox store backed by one PostgreSQL table.
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
    table: TableName,
    sql: Arc<Statements>,
    options: PgStoreOptions,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool, table: TableName) -> Self {
        Self::with_options(pool, table, PgStoreOptions::default())
    }

    pub fn with_options(pool: PgPool, table: TableName, options: PgStoreOptions) -> Self {
        let sql = Arc::new(Statements::for_table(&table));
        Self {
            pool,
            table,
            sql,
            options,
        }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Create the table and its partial index if they do not exist.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        self.pool
            .execute(self.sql.create_table.as_str())
            .await
            .map_err(StoreError::backend)?;
        self.pool
            .execute(self.sql.create_index.as_str())
            .await
            .map_err(StoreError::backend)?;
        info!(table = %self.table, "outbox table ready");
        Ok(())
    }

    /// Append a row through the caller's executor, typically inside the
    /// business transaction that produced it.
    pub async fn insert<'c, E>(
        &self,
        executor: E,
        subject: &Subject,
        payload: &[u8],
    ) -> Result<OutboxId, StoreError>
    where
        E: Executor<'c, Database = Postgres>,
    {
        let id: i64 = sqlx::query_scalar(&self.sql.insert)
            .bind(subject.as_str())
            .bind(payload)
            .fetch_one(executor)
            .await
            .map_err(StoreError::backend)?;
        id_from_db(id)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        if let Some(timeout) = self.options.lock_timeout {
            let stmt = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            (&mut *tx)
                .execute(stmt.as_str())
                .await
                .map_err(StoreError::backend)?;
        }
        Ok(Box::new(PgOutboxTransaction {
            tx,
            sql: Arc::clone(&self.sql),
        }))
    }

    async fn scan_unpublished(
        &self,
        after: OutboxId,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&self.sql.scan_unpublished)
            .bind(id_to_db(after)?)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        rows.iter().map(entry_from_row).collect()
    }
}

struct PgOutboxTransaction {
    tx: Transaction<'static, Postgres>,
    sql: Arc<Statements>,
}

#[async_trait]
impl OutboxTransaction for PgOutboxTransaction {
    async fn lock_unpublished(&mut self, id: OutboxId) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query(&self.sql.lock_unpublished)
            .bind(id_to_db(id)?)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn mark_published(
        &mut self,
        id: OutboxId,
        reference: &PublishedReference,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(&self.sql.mark_published)
            .bind(id_to_db(id)?)
            .bind(at)
            .bind(reference.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::backend)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::backend)
    }
}

fn id_to_db(id: OutboxId) -> Result<i64, StoreError> {
    i64::try_from(id.get()).map_err(|_| StoreError::other(format!("{id} does not fit BIGINT")))
}

fn id_from_db(id: i64) -> Result<OutboxId, StoreError> {
    u64::try_from(id)
        .map(OutboxId::new)
        .map_err(|_| StoreError::other(format!("negative outbox id {id}")))
}

fn entry_from_row(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    let get = |err: sqlx::Error| StoreError::backend(err);
    let reference: Option<String> = row.try_get("published_reference").map_err(get)?;
    Ok(OutboxEntry {
        id: id_from_db(row.try_get("id").map_err(get)?)?,
        published: row.try_get("published").map_err(get)?,
        // 空文字は未 publish と同じ扱い
        published_reference: reference
            .filter(|r| !r.is_empty())
            .map(PublishedReference::new),
        created_at: row.try_get("created_at").map_err(get)?,
        published_at: row.try_get("published_at").map_err(get)?,
        subject: Subject::new(row.try_get::<String, _>("subject").map_err(get)?),
        payload: row.try_get("payload").map_err(get)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_convert_both_ways() {
        assert_eq!(id_to_db(OutboxId::MIN).unwrap(), 0);
        assert_eq!(id_from_db(42).unwrap(), OutboxId::new(42));
    }

    #[test]
    fn out_of_range_ids_are_errors() {
        assert!(id_to_db(OutboxId::new(u64::MAX)).is_err());
        assert!(id_from_db(-1).is_err());
    }
}
