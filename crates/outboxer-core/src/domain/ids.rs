//! Domain identifiers (strongly-typed newtypes).
//!
//! `OutboxId` は store が insert 時に採番する単調増加の ID です。
//! work queue に流すトークンであり、recovery sweep のカーソルでもあります。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an outbox row.
///
/// 順序は scan 順（`id` 昇順）と一致します。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(u64);

impl OutboxId {
    /// Scan cursor の初期値。store が採番するどの ID よりも小さい。
    pub const MIN: OutboxId = OutboxId(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        OutboxId::MIN
    }
}

impl From<u64> for OutboxId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for OutboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outbox-{}", self.0)
    }
}

/// Destination subject on the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque reference assigned by the bus when it acknowledges a publish.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishedReference(String);

impl PublishedReference {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PublishedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_is_below_any_assigned_id() {
        assert!(OutboxId::MIN < OutboxId::new(1));
        assert_eq!(OutboxId::MIN.get(), 0);
    }

    #[test]
    fn display_has_prefix() {
        assert_eq!(OutboxId::new(42).to_string(), "outbox-42");
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&OutboxId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: OutboxId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OutboxId::new(7));
    }
}
