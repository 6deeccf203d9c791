//! WorkerLoop - claim → publish → confirm ループ
//!
//! # フロー（id 1 件ごと）
//! 1. OutboxStore::begin() で transaction 開始
//! 2. lock_unpublished() で行ロック（0 行なら publish 済み → 何もせず終了）
//! 3. MessageBus::publish() で非同期 publish
//! 4. PendingAck を await（唯一の待機点。行ロックは保持したまま）
//! 5. 失敗なら rollback（行は published=false のまま、次の sweep で拾われる）
//! 6. 成功なら同じ transaction で条件付き update、影響行数が 1 でなければ異常として rollback
//! 7. commit
//!
//! 1 行の失敗で worker が止まることはありません。エラーは error stream に流して次へ進みます。
//! worker は id の出どころ（enqueue か sweep か）を区別しません。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};

use crate::domain::{ClaimOutcome, OutboxError, OutboxId, PublishReceipt};
use crate::observability::StatsCounters;
use crate::ports::{BusError, Clock, MessageBus, OutboxStore, OutboxTransaction, PendingAck};

/// Receiving end of an identifier queue, shared by the workers draining it.
pub(crate) type SharedQueue = Arc<Mutex<mpsc::Receiver<OutboxId>>>;

pub(crate) type ErrorSender = mpsc::UnboundedSender<OutboxError>;

/// Row-level failures, one per failed attempt.
pub type ErrorStream = mpsc::UnboundedReceiver<OutboxError>;

/// Everything one claim/publish/confirm attempt needs.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) store: Arc<dyn OutboxStore>,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ack_timeout: Option<Duration>,
    pub(crate) stats: Arc<StatsCounters>,
}

/// Drain `queue` until it is closed and empty.
pub(crate) async fn run(
    worker: String,
    ctx: WorkerContext,
    queue: SharedQueue,
    errors: ErrorSender,
) {
    debug!(worker = %worker, "worker started");
    loop {
        // recv を待つのは 1 worker ずつ。他の worker は Mutex 側で待つ
        let next = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(id) = next else {
            break;
        };

        match claim_and_publish(&ctx, id).await {
            Ok(ClaimOutcome::Published(receipt)) => {
                ctx.stats.record_published();
                debug!(
                    worker = %worker,
                    outbox_id = %id,
                    reference = %receipt.reference,
                    "published"
                );
            }
            Ok(ClaimOutcome::AlreadyPublished) => {
                ctx.stats.record_already_published();
                debug!(worker = %worker, outbox_id = %id, "already published, skipped");
            }
            Err(err) => {
                // 行単位の失敗の報告は error stream の受け手に任せる。異常だけはここで出す
                if matches!(err, OutboxError::ConfirmationAnomaly { .. }) {
                    error!(worker = %worker, outbox_id = %id, error = %err, "consistency anomaly");
                } else {
                    debug!(
                        worker = %worker,
                        outbox_id = %id,
                        error = %err,
                        "publish attempt failed"
                    );
                }
                // 受け手がいなくても worker は続行
                let _ = errors.send(err);
                ctx.stats.record_failed();
            }
        }
    }
    debug!(worker = %worker, "worker stopped");
}

/// One claim/publish/confirm attempt for `id`.
pub(crate) async fn claim_and_publish(
    ctx: &WorkerContext,
    id: OutboxId,
) -> Result<ClaimOutcome, OutboxError> {
    let mut tx = ctx
        .store
        .begin()
        .await
        .map_err(|source| OutboxError::Claim { id, source })?;

    let entry = match tx.lock_unpublished(id).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            abort(tx, id).await;
            return Ok(ClaimOutcome::AlreadyPublished);
        }
        Err(source) => {
            abort(tx, id).await;
            return Err(OutboxError::Claim { id, source });
        }
    };

    let pending = match ctx.bus.publish(&entry.subject, &entry.payload).await {
        Ok(pending) => pending,
        Err(source) => {
            abort(tx, id).await;
            return Err(OutboxError::Publish { id, source });
        }
    };

    let receipt = match await_ack(pending, id, ctx.ack_timeout).await {
        Ok(receipt) => receipt,
        Err(err) => {
            abort(tx, id).await;
            return Err(err);
        }
    };

    let at = ctx.clock.now();
    match tx.mark_published(id, &receipt.reference, at).await {
        Ok(1) => {}
        Ok(affected) => {
            abort(tx, id).await;
            return Err(OutboxError::ConfirmationAnomaly { id, affected });
        }
        Err(source) => {
            abort(tx, id).await;
            return Err(OutboxError::Confirm { id, source });
        }
    }

    tx.commit()
        .await
        .map_err(|source| OutboxError::Commit { id, source })?;
    Ok(ClaimOutcome::Published(receipt))
}

async fn await_ack(
    pending: PendingAck,
    id: OutboxId,
    timeout: Option<Duration>,
) -> Result<PublishReceipt, OutboxError> {
    let result = match timeout {
        Some(after) => tokio::time::timeout(after, pending)
            .await
            .map_err(|_| OutboxError::AckTimeout { id, after })?,
        None => pending.await,
    };
    let receipt = result.map_err(|source| OutboxError::Publish { id, source })?;
    if receipt.reference.is_empty() {
        return Err(OutboxError::Publish {
            id,
            source: BusError::Nack("bus acknowledged with an empty reference".to_string()),
        });
    }
    Ok(receipt)
}

async fn abort(tx: Box<dyn OutboxTransaction>, id: OutboxId) {
    if let Err(err) = tx.rollback().await {
        warn!(outbox_id = %id, error = %err, "rollback failed");
    }
}
