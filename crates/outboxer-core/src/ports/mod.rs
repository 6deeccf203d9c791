//! Ports - 抽象化レイヤー
//!
//! 外部システム（リレーショナル DB, message bus, 時計）へのインターフェース。
//! 実装は `impls`（開発・テスト用）と別クレート（`outboxer-pg`, `outboxer-nats`）に置きます。
//!
//! # 設計原則
//! - outbox テーブルが source of truth（正本）
//! - 排他制御は行ロックのみ
//! - bus の ack は 1 回だけ完了する single-shot future

pub mod clock;
pub mod message_bus;
pub mod outbox_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::message_bus::{AckHandle, BusError, MessageBus, PendingAck, ack_channel};
pub use self::outbox_store::{OutboxStore, OutboxTransaction, StoreError};

/// Boxed error used as the source of collaborator failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
