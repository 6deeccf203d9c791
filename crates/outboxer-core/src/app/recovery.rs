//! RecoveryScanner - 未 publish 行の再発見
//!
//! # フロー
//! 1. cursor を OutboxId::MIN で初期化
//! 2. `published = false AND id > cursor` を `(id, created_at)` 順に window 件取得
//! 3. 0 件なら sweep 完了
//! 4. 各行について cursor を進め、id を queue に送る（queue が満杯なら待つ = backpressure）
//! 5. 2 に戻る
//!
//! offset ではなく `id > cursor` を使うので、sweep 中に worker が publish した行は
//! 結果から自然に消え、同じ行を 2 度拾うこともありません。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::{OutboxError, OutboxId};
use crate::ports::OutboxStore;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Identifiers handed to the queue by the scan.
    pub dispatched: u64,
    /// Non-empty windows fetched.
    pub windows: u64,
    /// Highest identifier dispatched (`OutboxId::MIN` if none).
    pub last_id: OutboxId,
    /// Identifiers already waiting in an ad-hoc standing queue, processed by the same sweep.
    pub drained: u64,
}

/// Walks unpublished rows in id order and feeds their ids into a queue.
pub struct RecoveryScanner {
    store: Arc<dyn OutboxStore>,
    window: usize,
}

impl RecoveryScanner {
    pub fn new(store: Arc<dyn OutboxStore>, window: usize) -> Self {
        Self {
            store,
            window: window.max(1),
        }
    }

    /// Run one sweep to completion.
    pub async fn sweep(&self, queue: &mpsc::Sender<OutboxId>) -> Result<SweepReport, OutboxError> {
        info!(window = self.window, "recovery sweep started");
        let mut report = SweepReport::default();
        let mut cursor = OutboxId::MIN;

        loop {
            let rows = self
                .store
                .scan_unpublished(cursor, self.window)
                .await
                .map_err(|source| OutboxError::Scan {
                    after: cursor,
                    source,
                })?;
            if rows.is_empty() {
                break;
            }
            report.windows += 1;
            debug!(after = %cursor, rows = rows.len(), "recovery window");

            for row in rows {
                if row.id > cursor {
                    cursor = row.id;
                }
                queue
                    .send(row.id)
                    .await
                    .map_err(|_| OutboxError::QueueClosed)?;
                report.dispatched += 1;
            }
        }

        report.last_id = cursor;
        info!(
            dispatched = report.dispatched,
            windows = report.windows,
            last_id = %report.last_id,
            "recovery sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryOutboxStore;
    use crate::ports::OutboxTransaction;
    use chrono::Utc;
    use std::time::Duration;

    use crate::domain::PublishedReference;

    async fn publish_directly(store: &InMemoryOutboxStore, id: OutboxId) {
        let mut tx: Box<dyn OutboxTransaction> = store.begin().await.unwrap();
        tx.mark_published(id, &PublishedReference::new("r"), Utc::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn dispatches_every_unpublished_row_in_order() {
        let store = InMemoryOutboxStore::new();
        let ids: Vec<_> = (0..7).map(|i| store.insert("s", vec![i])).collect();
        publish_directly(&store, ids[3]).await;

        let scanner = RecoveryScanner::new(Arc::new(store.clone()), 2);
        let (tx, mut rx) = mpsc::channel(16);
        let report = scanner.sweep(&tx).await.unwrap();
        drop(tx);

        let mut seen = Vec::new();
        while let Some(id) = rx.recv().await {
            seen.push(id);
        }
        let expected: Vec<_> = ids.iter().copied().filter(|id| *id != ids[3]).collect();
        assert_eq!(seen, expected);
        assert_eq!(report.dispatched, 6);
        assert_eq!(report.windows, 3);
        assert_eq!(report.last_id, ids[6]);
    }

    #[tokio::test]
    async fn empty_table_completes_immediately() {
        let scanner = RecoveryScanner::new(Arc::new(InMemoryOutboxStore::new()), 5);
        let (tx, _rx) = mpsc::channel(1);
        let report = scanner.sweep(&tx).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let store = InMemoryOutboxStore::new();
        for i in 0..3 {
            store.insert("s", vec![i]);
        }
        let scanner = RecoveryScanner::new(Arc::new(store), 10);
        let (tx, mut rx) = mpsc::channel(1);

        let sweep = tokio::spawn(async move { scanner.sweep(&tx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // 容量 1 なので、誰も受信しなければ sweep は終わらない
        assert!(!sweep.is_finished());

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        let report = sweep.await.unwrap().unwrap();
        assert_eq!(received, 3);
        assert_eq!(report.dispatched, 3);
    }

    #[tokio::test]
    async fn scan_failure_ends_the_sweep_with_an_error() {
        let store = InMemoryOutboxStore::new();
        store.insert("s", b"p".to_vec());
        store.fail_next_scans(1);
        let scanner = RecoveryScanner::new(Arc::new(store), 5);
        let (tx, _rx) = mpsc::channel(4);

        let err = scanner.sweep(&tx).await.unwrap_err();
        assert!(matches!(err, OutboxError::Scan { .. }));
    }

    #[tokio::test]
    async fn closed_queue_ends_the_sweep() {
        let store = InMemoryOutboxStore::new();
        store.insert("s", b"p".to_vec());
        let scanner = RecoveryScanner::new(Arc::new(store), 5);
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        let err = scanner.sweep(&tx).await.unwrap_err();
        assert!(matches!(err, OutboxError::QueueClosed));
    }
}
