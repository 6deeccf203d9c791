//! InMemoryBus - 開発・テスト用の message bus
//!
//! # 実装詳細
//! - publish ごとに ack_channel を作り、完了は spawn したタスクから返す
//!   （本物の bus と同じく「別スレッドから、後で」コールバックされる）
//! - reference は ULID（bus 採番の不透明な ID）
//! - 次の n 回の挙動を台本で指定できる: nack / reject / silent（ack が来ない）

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use ulid::Ulid;

use crate::domain::{PublishedReference, Subject};
use crate::ports::{AckHandle, BusError, MessageBus, PendingAck, ack_channel};

/// A message the bus accepted and acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: Subject,
    pub payload: Vec<u8>,
    pub reference: PublishedReference,
}

#[derive(Debug, Clone)]
enum Scripted {
    Nack(String),
    Reject(String),
    Silent,
}

#[derive(Default)]
struct BusState {
    delivered: Vec<PublishedMessage>,
    script: VecDeque<Scripted>,
    // silent の handle はここで保持して、完了も drop もさせない
    parked: Vec<AckHandle>,
    attempts: u64,
}

/// In-memory message bus with asynchronous acknowledgments.
#[derive(Clone)]
pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
    delivered: Arc<Notify>,
    ack_delay: Duration,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            delivered: Arc::new(Notify::new()),
            ack_delay: Duration::ZERO,
        }
    }

    /// Delay every acknowledgment by `delay`.
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `n` publishes are acknowledged with an error.
    pub fn nack_next(&self, n: usize, reason: &str) {
        let mut state = self.state();
        for _ in 0..n {
            state.script.push_back(Scripted::Nack(reason.to_string()));
        }
    }

    /// The next `n` publish calls are refused up front.
    pub fn reject_next(&self, n: usize, reason: &str) {
        let mut state = self.state();
        for _ in 0..n {
            state.script.push_back(Scripted::Reject(reason.to_string()));
        }
    }

    /// The next `n` publishes are never acknowledged.
    pub fn silence_next(&self, n: usize) {
        let mut state = self.state();
        for _ in 0..n {
            state.script.push_back(Scripted::Silent);
        }
    }

    pub fn delivered(&self) -> Vec<PublishedMessage> {
        self.state().delivered.clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.state().delivered.len()
    }

    /// Publish calls seen, including rejected and failed ones.
    pub fn attempts(&self) -> u64 {
        self.state().attempts
    }

    /// Wait until at least `n` messages have been delivered.
    pub async fn wait_for_deliveries(&self, n: usize) {
        loop {
            let notified = self.delivered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.delivered_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &Subject, payload: &[u8]) -> Result<PendingAck, BusError> {
        let scripted = {
            let mut state = self.state();
            state.attempts += 1;
            state.script.pop_front()
        };

        let (handle, pending) = ack_channel();
        match scripted {
            Some(Scripted::Reject(reason)) => return Err(BusError::Rejected(reason)),
            Some(Scripted::Silent) => {
                self.state().parked.push(handle);
            }
            Some(Scripted::Nack(reason)) => {
                let delay = self.ack_delay;
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    handle.fail(BusError::Nack(reason));
                });
            }
            None => {
                let message = PublishedMessage {
                    subject: subject.clone(),
                    payload: payload.to_vec(),
                    reference: PublishedReference::new(Ulid::new().to_string()),
                };
                let state = Arc::clone(&self.state);
                let notify = Arc::clone(&self.delivered);
                let delay = self.ack_delay;
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let reference = message.reference.clone();
                    state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .delivered
                        .push(message);
                    notify.notify_waiters();
                    handle.succeed(reference.as_str());
                });
            }
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_publish_is_delivered_and_acked() {
        let bus = InMemoryBus::new();
        let pending = bus.publish(&Subject::new("s"), b"hello").await.unwrap();
        let receipt = pending.await.unwrap();

        let delivered = bus.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].subject, Subject::new("s"));
        assert_eq!(delivered[0].payload, b"hello".to_vec());
        assert_eq!(delivered[0].reference, receipt.reference);
        assert!(!receipt.reference.is_empty());
    }

    #[tokio::test]
    async fn scripted_behaviours_apply_in_order() {
        let bus = InMemoryBus::new();
        bus.reject_next(1, "closed");
        bus.nack_next(1, "timeout");

        let subject = Subject::new("s");
        assert!(matches!(
            bus.publish(&subject, b"a").await,
            Err(BusError::Rejected(_))
        ));
        let nacked = bus.publish(&subject, b"b").await.unwrap().await;
        assert!(matches!(nacked, Err(BusError::Nack(_))));
        assert!(bus.publish(&subject, b"c").await.unwrap().await.is_ok());

        assert_eq!(bus.attempts(), 3);
        assert_eq!(bus.delivered_count(), 1);
    }

    #[tokio::test]
    async fn silent_publish_never_completes() {
        let bus = InMemoryBus::new();
        bus.silence_next(1);
        let pending = bus.publish(&Subject::new("s"), b"a").await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), pending).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn wait_for_deliveries_wakes_up() {
        let bus = InMemoryBus::new().with_ack_delay(Duration::from_millis(20));
        let _pending = bus.publish(&Subject::new("s"), b"a").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), bus.wait_for_deliveries(1))
            .await
            .expect("delivery should arrive");
    }
}
