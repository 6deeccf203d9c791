//! OutboxStore port - トランザクショナルな outbox テーブル
//!
//! エンジンが必要とする操作は 3 つだけです：
//! - `SELECT ... WHERE id = ? AND published = false FOR UPDATE`（トランザクション内）
//! - `UPDATE ... SET published = true, ... WHERE id = ? AND published = false`（影響行数を返す）
//! - `published = false AND id > cursor ORDER BY id, created_at LIMIT n`（読み取りのみ）
//!
//! スキーマ作成やコネクションプールは実装側の責務です。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::BoxError;
use crate::domain::{OutboxEntry, OutboxId, PublishedReference};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        StoreError::Backend(err.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        StoreError::Other(msg.into())
    }
}

/// Outbox store port (interface).
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, StoreError>;

    /// Up to `limit` unpublished rows with `id > after`, ordered by `(id, created_at)`.
    async fn scan_unpublished(
        &self,
        after: OutboxId,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError>;
}

/// An open transaction.
///
/// Dropping it without `commit` rolls it back and releases its row locks.
#[async_trait]
pub trait OutboxTransaction: Send {
    /// Lock the row if it exists and is unpublished.
    ///
    /// Waits while another transaction holds the row. `None` means the row is
    /// already published or does not exist.
    async fn lock_unpublished(&mut self, id: OutboxId) -> Result<Option<OutboxEntry>, StoreError>;

    /// Set the three completion fields, conditional on `published = false`.
    ///
    /// Returns the number of rows affected.
    async fn mark_published(
        &mut self,
        id: OutboxId,
        reference: &PublishedReference,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
