//! PublisherBuilder - Publisher の構築とワイヤリング
//!
//! store / bus / clock は引数で注入します（プロセス全体のシングルトンにしない）。
//! テストでは in-memory 実装に差し替え、複数の Publisher を同時に動かせます。

use std::sync::Arc;
use std::time::Duration;

use super::config::{PublisherConfig, WorkerMode};
use super::publisher::Publisher;
use super::worker_loop::WorkerContext;
use crate::domain::OutboxError;
use crate::observability::StatsCounters;
use crate::ports::{Clock, MessageBus, OutboxStore, SystemClock};

/// # 使用例
/// ```ignore
/// let publisher = PublisherBuilder::new(store, bus)
///     .workers(WorkerMode::Pooled { size: 4 })
///     .ack_timeout(Duration::from_secs(10))
///     .build()?;
/// ```
///
/// `build()` は設定を検証してから worker を spawn します（Fail-fast）。
pub struct PublisherBuilder {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    config: PublisherConfig,
}

impl PublisherBuilder {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            store,
            bus,
            clock: Arc::new(SystemClock),
            config: PublisherConfig::default(),
        }
    }

    /// Replace the whole config.
    pub fn config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, mode: WorkerMode) -> Self {
        self.config.workers = mode;
        self
    }

    /// Rounded up to whole milliseconds. `Duration::ZERO` is rejected by `build()`.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.config.ack_timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    /// Wait for acknowledgments forever.
    pub fn without_ack_timeout(mut self) -> Self {
        self.config.ack_timeout_ms = None;
        self
    }

    pub fn scan_window(mut self, window: usize) -> Self {
        self.config.scan_window = Some(window);
        self
    }

    /// Clock used for `published_at`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the config and spawn the pool. Must run inside a tokio runtime.
    pub fn build(self) -> Result<Publisher, OutboxError> {
        self.config.validate()?;
        let ctx = WorkerContext {
            store: self.store,
            bus: self.bus,
            clock: self.clock,
            ack_timeout: self.config.ack_timeout(),
            stats: Arc::new(StatsCounters::default()),
        };
        Ok(Publisher::start(ctx, self.config))
    }
}
