//! outboxer-pg
//!
//! OutboxStore の PostgreSQL 実装（sqlx）。
//!
//! # テーブル（名前は呼び出し側が決める）
//! ```sql
//! id BIGSERIAL PRIMARY KEY, published BOOLEAN NOT NULL DEFAULT FALSE,
//! published_reference VARCHAR(255), created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//! published_at TIMESTAMPTZ, subject TEXT NOT NULL, payload BYTEA NOT NULL
//! ```

mod sql;
mod store;

pub use sql::{Statements, TableName, TableNameError};
pub use store::{PgOutboxStore, PgStoreOptions};
