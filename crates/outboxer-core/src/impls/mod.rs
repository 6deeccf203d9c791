//! Impls - 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryOutboxStore**: 行ロック付きの in-memory outbox テーブル
//! - **InMemoryBus**: ack を別タスクから返す in-memory message bus
//!
//! # 本番用実装
//! - `outboxer-pg`: PgOutboxStore
//! - `outboxer-nats`: JetStreamBus

pub mod inmem_bus;
pub mod inmem_store;

pub use self::inmem_bus::{InMemoryBus, PublishedMessage};
pub use self::inmem_store::InMemoryOutboxStore;
