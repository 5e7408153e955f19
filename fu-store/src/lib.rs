//! Durable follow-up records and the collaborators the dispatcher reads from.
//!
//! The traits here are the storage contract; [`SqliteStore`] implements all of
//! them on one SQLite file. Every status transition is a conditional write whose
//! precondition lives in the `WHERE` clause, so racing writers resolve to a
//! single winner and the loser sees a no-op.

mod error;
mod sqlite;
mod traits;
mod types;

pub use error::{Result, StoreError};
pub use sqlite::{SqliteStore, StoredMessage};
pub use traits::{FollowUpStore, KnowledgeBase, MessageSink, ProfileDirectory};
pub use types::{
    CancelOutcome, ConversationId, FailureOutcome, FollowUpId, FollowUpMetadata, FollowUpRecord,
    FollowUpStats, FollowUpStatus, KnowledgeSnippet, MessageId, NewFollowUp, OutboundMessage,
    ParseEnumError, Profile, SnippetId, Topic, Urgency, UserId,
};

/// Delivery attempts allowed per record before it is marked `failed`.
///
/// The due query, the claim and the failure transition all read this value.
pub const MAX_RETRIES: u32 = 3;
