//! OutboxEntry - outbox テーブルの 1 行
//!
//! # ライフサイクル
//! 1. producer の業務トランザクション内で `published = false` として insert
//! 2. worker が行ロックで claim（変更はしない）
//! 3. bus の ack 成功時に一度だけ `published = true` へ遷移
//!
//! このクレートが行を削除することはありません（retention は外部の責務）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{OutboxId, PublishedReference, Subject};

/// A row of the outbox table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub published: bool,
    pub published_reference: Option<PublishedReference>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub subject: Subject,
    pub payload: Vec<u8>,
}

impl OutboxEntry {
    /// A freshly inserted, unpublished row.
    pub fn pending(
        id: OutboxId,
        subject: Subject,
        payload: Vec<u8>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            published: false,
            published_reference: None,
            created_at,
            published_at: None,
            subject,
            payload,
        }
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// `published` と `published_reference` / `published_at` が揃っているか。
    ///
    /// published=true のときは両方が埋まっていて、false のときは両方とも空。
    pub fn published_fields_consistent(&self) -> bool {
        let has_reference = self
            .published_reference
            .as_ref()
            .is_some_and(|r| !r.is_empty());
        let has_timestamp = self.published_at.is_some();
        if self.published {
            has_reference && has_timestamp
        } else {
            !has_reference && !has_timestamp
        }
    }

    /// Apply the single allowed transition. Returns false if already published.
    pub fn mark_published(&mut self, reference: PublishedReference, at: DateTime<Utc>) -> bool {
        if self.published {
            return false;
        }
        self.published = true;
        self.published_reference = Some(reference);
        self.published_at = Some(at);
        true
    }
}

/// Successful bus acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub reference: PublishedReference,
}

impl PublishReceipt {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: PublishedReference::new(reference),
        }
    }
}

/// Result of one claim/publish/confirm attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Published and confirmed in the same transaction.
    Published(PublishReceipt),
    /// The row was already published or does not exist. Benign no-op.
    AlreadyPublished,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> OutboxEntry {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        OutboxEntry::pending(OutboxId::new(1), Subject::new("s"), b"p".to_vec(), created)
    }

    #[test]
    fn pending_entry_is_consistent() {
        let e = entry();
        assert!(!e.is_published());
        assert!(e.published_fields_consistent());
    }

    #[test]
    fn mark_published_sets_all_fields_once() {
        let mut e = entry();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 1).unwrap();

        assert!(e.mark_published(PublishedReference::new("ref-1"), at));
        assert!(e.is_published());
        assert!(e.published_fields_consistent());

        // 2 回目は no-op
        assert!(!e.mark_published(PublishedReference::new("ref-2"), at));
        assert_eq!(e.published_reference, Some(PublishedReference::new("ref-1")));
    }

    #[test]
    fn half_published_row_is_inconsistent() {
        let mut e = entry();
        e.published = true;
        assert!(!e.published_fields_consistent());
    }
}
