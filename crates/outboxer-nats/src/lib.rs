//! outboxer-nats
//!
//! MessageBus の NATS JetStream 実装。
//!
//! # フロー
//! 1. `publish` で JetStream に送信（ここで失敗したら `BusError::Rejected`）
//! 2. PublishAck を別タスクで待つ
//! 3. `AckHandle` を `{stream}:{sequence}` の reference か `Nack` で完了させる

mod bus;

pub use bus::{JetStreamBus, NatsBusError, ack_reference};
