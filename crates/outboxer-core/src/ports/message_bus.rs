//! MessageBus port - 非同期 publish + 完了コールバック
//!
//! bus は `publish(subject, payload)` を受け付け、後で（別スレッドから）
//! reference かエラーのどちらかで 1 回だけ完了を通知します。
//!
//! コールバック表の代わりに、publish 1 回ごとに oneshot を 1 本作ります。
//! - 完了側: [`AckHandle`]（`complete(self, ..)` で消費されるので 2 回呼べない）
//! - 待機側: [`PendingAck`]（worker はこれを await する）
//!
//! handle が完了せずに drop された場合、待機側は [`BusError::AckDropped`] になります。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use super::BoxError;
use crate::domain::{PublishReceipt, Subject};

#[derive(Debug, Error)]
pub enum BusError {
    /// The bus refused the publish call itself. No acknowledgment will follow.
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// The bus acknowledged the publish with an error.
    #[error("publish not acknowledged: {0}")]
    Nack(String),

    #[error("acknowledgment handle dropped without completing")]
    AckDropped,

    #[error("bus backend error: {0}")]
    Backend(#[source] BoxError),
}

impl BusError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        BusError::Backend(err.into())
    }
}

/// Message bus port (interface).
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Start an asynchronous publish.
    ///
    /// `Err` means the call was rejected up front and the ack will never fire.
    async fn publish(&self, subject: &Subject, payload: &[u8]) -> Result<PendingAck, BusError>;
}

/// Create the two halves of one publish acknowledgment.
pub fn ack_channel() -> (AckHandle, PendingAck) {
    let (tx, rx) = oneshot::channel();
    (AckHandle { tx }, PendingAck { rx })
}

/// Completion side of a publish. Consumed on use.
#[derive(Debug)]
pub struct AckHandle {
    tx: oneshot::Sender<Result<PublishReceipt, BusError>>,
}

impl AckHandle {
    pub fn complete(self, result: Result<PublishReceipt, BusError>) {
        // 待機側が timeout 済みなら受け手はいない
        let _ = self.tx.send(result);
    }

    pub fn succeed(self, reference: impl Into<String>) {
        self.complete(Ok(PublishReceipt::new(reference)));
    }

    pub fn fail(self, err: BusError) {
        self.complete(Err(err));
    }
}

/// Waiting side of a publish. Resolves exactly once.
#[derive(Debug)]
pub struct PendingAck {
    rx: oneshot::Receiver<Result<PublishReceipt, BusError>>,
}

impl PendingAck {
    /// An acknowledgment that is already complete.
    pub fn ready(result: Result<PublishReceipt, BusError>) -> Self {
        let (handle, pending) = ack_channel();
        handle.complete(result);
        pending
    }
}

impl Future for PendingAck {
    type Output = Result<PublishReceipt, BusError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BusError::AckDropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completion_from_another_task_resolves_pending() {
        let (handle, pending) = ack_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.succeed("seq-1");
        });

        let receipt = pending.await.unwrap();
        assert_eq!(receipt.reference.as_str(), "seq-1");
    }

    #[tokio::test]
    async fn dropped_handle_resolves_to_error() {
        let (handle, pending) = ack_channel();
        drop(handle);
        assert!(matches!(pending.await, Err(BusError::AckDropped)));
    }

    #[tokio::test]
    async fn nack_is_passed_through() {
        let pending = PendingAck::ready(Err(BusError::Nack("stream not found".into())));
        let err = pending.await.unwrap_err();
        assert!(err.to_string().contains("stream not found"));
    }
}
