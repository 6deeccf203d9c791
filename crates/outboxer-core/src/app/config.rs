//! PublisherConfig - worker pool の設定
//!
//! 「常駐 worker なし」を 0 で表さず、別のバリアントとして持ちます。
//!
//! ```toml
//! [publisher]
//! workers = { mode = "pooled", size = 4 }
//! ack_timeout_ms = 30000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::OutboxError;

pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 30_000;

/// How identifiers get drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkerMode {
    /// `size` standing workers share one queue of capacity `size`.
    Pooled { size: usize },
    /// No standing pool. Each recovery sweep spins up one temporary worker with
    /// its own queue of capacity `queue_capacity`.
    AdHoc { queue_capacity: usize },
}

impl WorkerMode {
    /// Workers that drain one queue concurrently.
    pub fn concurrency(&self) -> usize {
        match self {
            WorkerMode::Pooled { size } => *size,
            WorkerMode::AdHoc { .. } => 1,
        }
    }

    pub fn queue_capacity(&self) -> usize {
        match self {
            WorkerMode::Pooled { size } => *size,
            WorkerMode::AdHoc { queue_capacity } => *queue_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub workers: WorkerMode,
    /// Upper bound on the wait for a bus acknowledgment. `None` waits forever.
    pub ack_timeout_ms: Option<u64>,
    /// Rows fetched per recovery window. Defaults to worker count + 1.
    pub scan_window: Option<usize>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            workers: WorkerMode::Pooled {
                size: DEFAULT_POOL_SIZE,
            },
            ack_timeout_ms: Some(DEFAULT_ACK_TIMEOUT_MS),
            scan_window: None,
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<(), OutboxError> {
        match self.workers {
            WorkerMode::Pooled { size: 0 } => {
                return Err(OutboxError::InvalidConfig(
                    "pooled mode needs at least one worker, use ad_hoc for no standing pool"
                        .to_string(),
                ));
            }
            WorkerMode::AdHoc { queue_capacity: 0 } => {
                return Err(OutboxError::InvalidConfig(
                    "ad_hoc queue_capacity must be at least 1".to_string(),
                ));
            }
            _ => {}
        }
        if self.scan_window == Some(0) {
            return Err(OutboxError::InvalidConfig(
                "scan_window must be at least 1".to_string(),
            ));
        }
        if self.ack_timeout_ms == Some(0) {
            return Err(OutboxError::InvalidConfig(
                "ack_timeout_ms must be positive, omit it to wait forever".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_ms.map(Duration::from_millis)
    }

    pub fn scan_window(&self) -> usize {
        self.scan_window
            .unwrap_or_else(|| self.workers.concurrency() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_is_a_small_pool_with_timeout() {
        let config = PublisherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, WorkerMode::Pooled { size: 4 });
        assert_eq!(config.ack_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.scan_window(), 5);
    }

    #[rstest]
    #[case::pooled(WorkerMode::Pooled { size: 3 }, 4, 3)]
    #[case::ad_hoc(WorkerMode::AdHoc { queue_capacity: 10 }, 2, 10)]
    fn window_and_capacity_follow_mode(
        #[case] workers: WorkerMode,
        #[case] window: usize,
        #[case] capacity: usize,
    ) {
        let config = PublisherConfig {
            workers,
            ..PublisherConfig::default()
        };
        assert_eq!(config.scan_window(), window);
        assert_eq!(config.workers.queue_capacity(), capacity);
    }

    #[rstest]
    #[case::empty_pool(WorkerMode::Pooled { size: 0 }, None, Some(1000))]
    #[case::empty_ad_hoc_queue(WorkerMode::AdHoc { queue_capacity: 0 }, None, Some(1000))]
    #[case::zero_window(WorkerMode::Pooled { size: 1 }, Some(0), Some(1000))]
    #[case::zero_timeout(WorkerMode::Pooled { size: 1 }, None, Some(0))]
    fn invalid_configs_are_rejected(
        #[case] workers: WorkerMode,
        #[case] scan_window: Option<usize>,
        #[case] ack_timeout_ms: Option<u64>,
    ) {
        let config = PublisherConfig {
            workers,
            ack_timeout_ms,
            scan_window,
        };
        assert!(matches!(
            config.validate(),
            Err(OutboxError::InvalidConfig(_))
        ));
    }

    #[test]
    fn explicit_window_wins() {
        let config = PublisherConfig {
            scan_window: Some(50),
            ..PublisherConfig::default()
        };
        assert_eq!(config.scan_window(), 50);
    }

    #[test]
    fn deserializes_tagged_worker_mode() {
        let config: PublisherConfig = serde_json::from_str(
            r#"{ "workers": { "mode": "ad_hoc", "queue_capacity": 8 }, "ack_timeout_ms": null }"#,
        )
        .unwrap();
        assert_eq!(config.workers, WorkerMode::AdHoc { queue_capacity: 8 });
        assert_eq!(config.ack_timeout(), None);
        assert_eq!(config.scan_window, None);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: PublisherConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PublisherConfig::default());
    }
}
