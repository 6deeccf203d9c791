//! outboxer-core
//!
//! Transactional outbox の配送エンジン。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, entry, errors）
//! - **ports**: 抽象化レイヤー（OutboxStore, MessageBus, Clock）
//! - **app**: アプリケーションロジック（builder, publisher, worker_loop, recovery, config）
//! - **impls**: 実装（InMemoryOutboxStore, InMemoryBus など開発・テスト用）
//! - **observability**: 配送統計（PublisherStats）

pub mod domain;
pub mod ports;
pub mod app;
pub mod impls;
pub mod observability;

pub use app::{
    Publisher, PublisherBuilder, PublisherConfig, SweepHandle, SweepReport, WorkerMode,
};
pub use domain::{
    ClaimOutcome, ErrorKind, OutboxEntry, OutboxError, OutboxId, PublishReceipt,
    PublishedReference, Subject,
};
pub use observability::PublisherStats;
