//! Errors - エラー型と分類
//!
//! 行単位の失敗はすべて `OutboxError` として error stream に流れます。
//! worker pool も scanner も、エラーで停止することはありません。

use std::time::Duration;

use thiserror::Error;

use super::ids::OutboxId;
use crate::ports::{BusError, StoreError};

/// ErrorKind は失敗の運用分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 行ロック / select の失敗。行は変更されていない。
    Claim,
    /// bus がエラーを返した（または ack が来なかった）。行は未 publish のまま。
    Publish,
    /// 行ロック中にもかかわらず条件付き update が 1 行以外に作用した。
    ConfirmationAnomaly,
    /// confirm update / commit の失敗。次の sweep で再評価される。
    Commit,
    /// recovery sweep の range scan 失敗。
    Scan,
    /// queue / 設定 / task など呼び出し側の問題。
    Usage,
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("claim failed for {id}: {source}")]
    Claim {
        id: OutboxId,
        #[source]
        source: StoreError,
    },

    #[error("publish failed for {id}: {source}")]
    Publish {
        id: OutboxId,
        #[source]
        source: BusError,
    },

    #[error("publish ack for {id} not received within {after:?}")]
    AckTimeout { id: OutboxId, after: Duration },

    #[error("confirmation update for {id} affected {affected} rows, expected exactly 1")]
    ConfirmationAnomaly { id: OutboxId, affected: u64 },

    #[error("confirmation update failed for {id}: {source}")]
    Confirm {
        id: OutboxId,
        #[source]
        source: StoreError,
    },

    #[error("commit failed for {id}: {source}")]
    Commit {
        id: OutboxId,
        #[source]
        source: StoreError,
    },

    #[error("recovery scan failed after {after}: {source}")]
    Scan {
        after: OutboxId,
        #[source]
        source: StoreError,
    },

    #[error("queue is full, {0} was not enqueued")]
    QueueFull(OutboxId),

    #[error("queue is closed")]
    QueueClosed,

    #[error("invalid publisher config: {0}")]
    InvalidConfig(String),

    #[error("background task failed: {0}")]
    Join(String),
}

impl OutboxError {
    /// The row this failure belongs to, if any.
    pub fn row_id(&self) -> Option<OutboxId> {
        match self {
            OutboxError::Claim { id, .. }
            | OutboxError::Publish { id, .. }
            | OutboxError::AckTimeout { id, .. }
            | OutboxError::ConfirmationAnomaly { id, .. }
            | OutboxError::Confirm { id, .. }
            | OutboxError::Commit { id, .. } => Some(*id),
            OutboxError::QueueFull(id) => Some(*id),
            OutboxError::Scan { .. }
            | OutboxError::QueueClosed
            | OutboxError::InvalidConfig(_)
            | OutboxError::Join(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OutboxError::Claim { .. } => ErrorKind::Claim,
            OutboxError::Publish { .. } | OutboxError::AckTimeout { .. } => ErrorKind::Publish,
            OutboxError::ConfirmationAnomaly { .. } => ErrorKind::ConfirmationAnomaly,
            OutboxError::Confirm { .. } | OutboxError::Commit { .. } => ErrorKind::Commit,
            OutboxError::Scan { .. } => ErrorKind::Scan,
            OutboxError::QueueFull(_)
            | OutboxError::QueueClosed
            | OutboxError::InvalidConfig(_)
            | OutboxError::Join(_) => ErrorKind::Usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn id() -> OutboxId {
        OutboxId::new(9)
    }

    #[rstest]
    #[case::claim(
        OutboxError::Claim { id: id(), source: StoreError::other("lock timeout") },
        ErrorKind::Claim
    )]
    #[case::publish(
        OutboxError::Publish { id: id(), source: BusError::Nack("no stream".into()) },
        ErrorKind::Publish
    )]
    #[case::ack_timeout(
        OutboxError::AckTimeout { id: id(), after: Duration::from_secs(1) },
        ErrorKind::Publish
    )]
    #[case::anomaly(
        OutboxError::ConfirmationAnomaly { id: id(), affected: 0 },
        ErrorKind::ConfirmationAnomaly
    )]
    #[case::confirm(
        OutboxError::Confirm { id: id(), source: StoreError::other("conn reset") },
        ErrorKind::Commit
    )]
    #[case::commit(
        OutboxError::Commit { id: id(), source: StoreError::other("conn reset") },
        ErrorKind::Commit
    )]
    fn row_level_errors_carry_their_row(#[case] err: OutboxError, #[case] kind: ErrorKind) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.row_id(), Some(id()));
    }

    #[test]
    fn scan_error_has_no_row() {
        let err = OutboxError::Scan {
            after: OutboxId::MIN,
            source: StoreError::other("db down"),
        };
        assert_eq!(err.kind(), ErrorKind::Scan);
        assert_eq!(err.row_id(), None);
    }

    #[test]
    fn anomaly_message_mentions_row_count() {
        let err = OutboxError::ConfirmationAnomaly {
            id: id(),
            affected: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("outbox-9"));
        assert!(msg.contains("2 rows"));
    }
}
