//! Domain model (ids, outbox entries, errors).

pub mod entry;
pub mod errors;
pub mod ids;

pub use self::entry::{ClaimOutcome, OutboxEntry, PublishReceipt};
pub use self::errors::{ErrorKind, OutboxError};
pub use self::ids::{OutboxId, PublishedReference, Subject};
