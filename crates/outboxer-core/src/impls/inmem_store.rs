//! InMemoryOutboxStore - 開発・テスト用の outbox テーブル
//!
//! # 実装詳細
//! - 行は `BTreeMap<OutboxId, OutboxEntry>`（id 昇順 = scan 順）
//! - 行ロックは id ごとの `tokio::sync::Mutex<()>`。transaction が OwnedMutexGuard を保持し、
//!   commit / rollback / drop で解放する（`SELECT ... FOR UPDATE` 相当）
//! - update は transaction 内に溜めて commit 時に反映する
//! - 障害注入: lock / commit / scan を次の n 回失敗させられる

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::domain::{OutboxEntry, OutboxId, PublishedReference, Subject};
use crate::ports::{Clock, OutboxStore, OutboxTransaction, StoreError, SystemClock};

#[derive(Default)]
struct Table {
    rows: BTreeMap<OutboxId, OutboxEntry>,
    next_id: u64,
    transitions: u64,
}

#[derive(Debug, Default)]
struct Faults {
    locks: usize,
    commits: usize,
    scans: usize,
}

impl Faults {
    fn take(counter: &mut usize) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

struct Shared {
    table: Mutex<Table>,
    row_locks: Mutex<HashMap<OutboxId, Arc<tokio::sync::Mutex<()>>>>,
    faults: Mutex<Faults>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    // std Mutex は await を跨いで保持しないので poison しても中身はそのまま使える
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: OutboxId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }
}

/// In-memory outbox table with row-level locking.
#[derive(Clone)]
pub struct InMemoryOutboxStore {
    shared: Arc<Shared>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// `created_at` is taken from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(Table::default()),
                row_locks: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                clock,
            }),
        }
    }

    /// Insert an unpublished row, as a producer transaction would.
    pub fn insert(&self, subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> OutboxId {
        let created_at = self.shared.clock.now();
        let mut table = self.shared.table();
        table.next_id += 1;
        let id = OutboxId::new(table.next_id);
        let entry = OutboxEntry::pending(id, Subject::new(subject), payload.into(), created_at);
        table.rows.insert(id, entry);
        id
    }

    pub fn get(&self, id: OutboxId) -> Option<OutboxEntry> {
        self.shared.table().rows.get(&id).cloned()
    }

    /// All rows in id order.
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.shared.table().rows.values().cloned().collect()
    }

    pub fn unpublished_count(&self) -> usize {
        self.shared
            .table()
            .rows
            .values()
            .filter(|e| !e.published)
            .count()
    }

    /// Number of committed `published = false -> true` transitions.
    pub fn transitions(&self) -> u64 {
        self.shared.table().transitions
    }

    pub fn fail_next_locks(&self, n: usize) {
        self.shared.faults().locks += n;
    }

    pub fn fail_next_commits(&self, n: usize) {
        self.shared.faults().commits += n;
    }

    pub fn fail_next_scans(&self, n: usize) {
        self.shared.faults().scans += n;
    }
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            writes: Vec::new(),
        }))
    }

    async fn scan_unpublished(
        &self,
        after: OutboxId,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        if Faults::take(&mut self.shared.faults().scans) {
            return Err(StoreError::other("injected scan failure"));
        }
        let table = self.shared.table();
        Ok(table
            .rows
            .range((Bound::Excluded(after), Bound::Unbounded))
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.published)
            .take(limit)
            .cloned()
            .collect())
    }
}

struct InMemoryTransaction {
    shared: Arc<Shared>,
    held: HashMap<OutboxId, OwnedMutexGuard<()>>,
    writes: Vec<(OutboxId, PublishedReference, DateTime<Utc>)>,
}

impl InMemoryTransaction {
    async fn acquire(&mut self, id: OutboxId) {
        if self.held.contains_key(&id) {
            return;
        }
        let guard = self.shared.row_lock(id).lock_owned().await;
        self.held.insert(id, guard);
    }

    fn written(&self, id: OutboxId) -> bool {
        self.writes.iter().any(|(w, _, _)| *w == id)
    }
}

#[async_trait]
impl OutboxTransaction for InMemoryTransaction {
    async fn lock_unpublished(&mut self, id: OutboxId) -> Result<Option<OutboxEntry>, StoreError> {
        if Faults::take(&mut self.shared.faults().locks) {
            return Err(StoreError::other("injected lock failure"));
        }
        self.acquire(id).await;

        // ロック取得後に条件を評価し直す（待っている間に他の transaction が commit しているかもしれない）
        let entry = self.shared.table().rows.get(&id).cloned();
        Ok(entry.filter(|e| !e.published && !self.written(id)))
    }

    async fn mark_published(
        &mut self,
        id: OutboxId,
        reference: &PublishedReference,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.acquire(id).await;

        let unpublished = self
            .shared
            .table()
            .rows
            .get(&id)
            .is_some_and(|e| !e.published);
        if !unpublished || self.written(id) {
            return Ok(0);
        }
        self.writes.push((id, reference.clone(), at));
        Ok(1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if Faults::take(&mut self.shared.faults().commits) {
            return Err(StoreError::other("injected commit failure"));
        }
        let mut table = self.shared.table();
        for (id, reference, at) in &self.writes {
            if let Some(entry) = table.rows.get_mut(id)
                && entry.mark_published(reference.clone(), *at)
            {
                table.transitions += 1;
            }
        }
        // guard は self と一緒に drop されてロック解放
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
