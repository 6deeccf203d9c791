//! Publisher - worker pool と queue のライフサイクル
//!
//! # 所有するもの
//! - bounded な id queue（enqueue と recovery sweep の両方がここに流す）
//! - error stream（行単位の失敗を呼び出し側へ）
//! - worker pool
//!
//! # Shutdown
//! `close()` は id queue を閉じ、worker と実行中の sweep（ad-hoc の一時 worker を含む）の
//! 終了を待ってから error stream を閉じます。
//! - pooled: worker は queue に残った id を処理し切ってから終了
//! - ad-hoc: 常駐 worker がいないので、standing queue に残った id は処理されません
//!   （行は published=false のまま、次の sweep で拾われる）
//!
//! Publisher 自身はリトライしません。

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::{PublisherConfig, WorkerMode};
use super::recovery::{RecoveryScanner, SweepReport};
use super::worker_loop::{self, ErrorSender, ErrorStream, SharedQueue, WorkerContext};
use crate::domain::{OutboxError, OutboxId};
use crate::observability::PublisherStats;

pub struct Publisher {
    ctx: WorkerContext,
    config: PublisherConfig,
    queue_tx: mpsc::Sender<OutboxId>,
    queue_rx: SharedQueue,
    errors_tx: ErrorSender,
    errors_rx: Option<ErrorStream>,
    workers: Vec<JoinHandle<()>>,
    // sweep タスクが 1 本ずつ clone を持つ。全部 drop されたら recv が None を返す
    sweeps_tx: mpsc::Sender<()>,
    sweeps_rx: mpsc::Receiver<()>,
}

impl Publisher {
    /// Spawn the pool. Must run inside a tokio runtime.
    pub(crate) fn start(ctx: WorkerContext, config: PublisherConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.workers.queue_capacity());
        let queue_rx: SharedQueue = Arc::new(Mutex::new(queue_rx));
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (sweeps_tx, sweeps_rx) = mpsc::channel(1);

        let workers = match config.workers {
            WorkerMode::Pooled { size } => (0..size)
                .map(|n| {
                    tokio::spawn(worker_loop::run(
                        format!("pool-{n}"),
                        ctx.clone(),
                        Arc::clone(&queue_rx),
                        errors_tx.clone(),
                    ))
                })
                .collect(),
            WorkerMode::AdHoc { .. } => Vec::new(),
        };
        info!(
            workers = workers.len(),
            queue_capacity = config.workers.queue_capacity(),
            "publisher started"
        );

        Self {
            ctx,
            config,
            queue_tx,
            queue_rx,
            errors_tx,
            errors_rx: Some(errors_rx),
            workers,
            sweeps_tx,
            sweeps_rx,
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Hand a row identifier to the workers. Waits while the queue is full.
    pub async fn enqueue(&self, id: OutboxId) -> Result<(), OutboxError> {
        self.queue_tx
            .send(id)
            .await
            .map_err(|_| OutboxError::QueueClosed)
    }

    /// Like `enqueue`, but fails with `QueueFull` instead of waiting.
    pub fn try_enqueue(&self, id: OutboxId) -> Result<(), OutboxError> {
        self.queue_tx.try_send(id).map_err(|err| match err {
            mpsc::error::TrySendError::Full(id) => OutboxError::QueueFull(id),
            mpsc::error::TrySendError::Closed(_) => OutboxError::QueueClosed,
        })
    }

    /// Identifiers currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue_tx.max_capacity() - self.queue_tx.capacity()
    }

    /// The error stream of the standing queue. Handed out once.
    ///
    /// Until it is taken, failures accumulate inside the publisher.
    pub fn take_errors(&mut self) -> Option<ErrorStream> {
        self.errors_rx.take()
    }

    pub fn stats(&self) -> PublisherStats {
        self.ctx.stats.snapshot()
    }

    /// Start one recovery sweep over all unpublished rows.
    ///
    /// Pooled: ids go into the standing queue, failures into the standing error
    /// stream, and the sweep completes once every id has been dispatched.
    ///
    /// Ad-hoc: one temporary worker drains a queue of its own; the handle carries
    /// that worker's error stream and completes after the worker has exited.
    pub fn recover_unpublished(&self) -> SweepHandle {
        let scanner = RecoveryScanner::new(Arc::clone(&self.ctx.store), self.config.scan_window());
        let stats = Arc::clone(&self.ctx.stats);
        let in_flight = self.sweeps_tx.clone();

        match self.config.workers {
            WorkerMode::Pooled { .. } => {
                let queue = self.queue_tx.clone();
                let done = tokio::spawn(async move {
                    let _in_flight = in_flight;
                    let report = scanner.sweep(&queue).await?;
                    stats.record_swept(report.dispatched);
                    Ok::<_, OutboxError>(report)
                });
                SweepHandle { errors: None, done }
            }
            WorkerMode::AdHoc { queue_capacity } => {
                let (sweep_tx, sweep_rx) = mpsc::channel(queue_capacity);
                let (errors_tx, errors_rx) = mpsc::unbounded_channel();
                let worker = tokio::spawn(worker_loop::run(
                    "ad-hoc".to_string(),
                    self.ctx.clone(),
                    Arc::new(Mutex::new(sweep_rx)),
                    errors_tx,
                ));
                let standing = Arc::clone(&self.queue_rx);

                let done = tokio::spawn(async move {
                    let _in_flight = in_flight;
                    let swept = scanner.sweep(&sweep_tx).await;
                    let drained = if swept.is_ok() {
                        drain_into(&standing, &sweep_tx).await
                    } else {
                        0
                    };
                    // queue を閉じて一時 worker の終了を待つ
                    drop(sweep_tx);
                    worker
                        .await
                        .map_err(|err| OutboxError::Join(err.to_string()))?;

                    let mut report = swept?;
                    report.drained = drained;
                    stats.record_swept(report.dispatched);
                    Ok::<_, OutboxError>(report)
                });
                SweepHandle {
                    errors: Some(errors_rx),
                    done,
                }
            }
        }
    }

    /// Graceful shutdown: close the queue, wait for the workers and running sweeps,
    /// close the error stream.
    ///
    /// A sweep whose `SweepHandle` was dropped is still waited for.
    pub async fn close(self) -> PublisherStats {
        let Publisher {
            ctx,
            queue_tx,
            queue_rx,
            errors_tx,
            workers,
            sweeps_tx,
            mut sweeps_rx,
            ..
        } = self;

        drop(queue_tx);
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }
        drop(sweeps_tx);
        let _ = sweeps_rx.recv().await;
        drop(errors_tx);
        drop(queue_rx);

        let stats = ctx.stats.snapshot();
        info!(
            published = stats.published,
            already_published = stats.already_published,
            failed = stats.failed,
            "publisher closed"
        );
        stats
    }
}

/// Move ids already waiting in `standing` into `target` without waiting for new ones.
async fn drain_into(standing: &SharedQueue, target: &mpsc::Sender<OutboxId>) -> u64 {
    let mut drained = 0;
    loop {
        let next = standing.lock().await.try_recv();
        let Ok(id) = next else {
            break;
        };
        if target.send(id).await.is_err() {
            break;
        }
        drained += 1;
    }
    drained
}

/// Completion signal of one recovery sweep.
pub struct SweepHandle {
    errors: Option<ErrorStream>,
    done: JoinHandle<Result<SweepReport, OutboxError>>,
}

impl SweepHandle {
    /// Failures of the temporary worker (ad-hoc mode only).
    pub fn take_errors(&mut self) -> Option<ErrorStream> {
        self.errors.take()
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_finished()
    }

    pub async fn wait(self) -> Result<SweepReport, OutboxError> {
        self.done
            .await
            .map_err(|err| OutboxError::Join(err.to_string()))?
    }
}
