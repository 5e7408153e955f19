use crate::error::Result;
use crate::types::{
    CancelOutcome, ConversationId, FailureOutcome, FollowUpId, FollowUpRecord, FollowUpStats,
    FollowUpStatus, KnowledgeSnippet, MessageId, NewFollowUp, OutboundMessage, Profile, Topic,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable follow-up records.
///
/// Writes that move a record out of `pending` only take effect while the record is
/// still `pending`; losing that race returns `false`/`None` rather than an error.
#[async_trait]
pub trait FollowUpStore: Send + Sync {
    async fn insert(&self, new: NewFollowUp) -> Result<FollowUpRecord>;

    async fn get(&self, id: &FollowUpId) -> Result<Option<FollowUpRecord>>;

    /// Newest first.
    async fn list(&self, status: Option<FollowUpStatus>, limit: usize)
    -> Result<Vec<FollowUpRecord>>;

    /// Pending, due, under the retry limit and not leased; oldest promise first.
    async fn due_follow_ups(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<FollowUpRecord>>;

    /// Take a delivery lease on a due record. `false` if another pass holds it or it left `pending`.
    async fn claim(
        &self,
        id: &FollowUpId,
        token: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Extend a held lease. `false` once the record left `pending` or another pass took it over.
    async fn renew_claim(
        &self,
        id: &FollowUpId,
        token: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// `pending -> sent`, only for the holder of `token`.
    async fn mark_sent(
        &self,
        id: &FollowUpId,
        token: &str,
        message_id: &MessageId,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Count one failed attempt; flips to `failed` once the retry budget is spent.
    async fn record_failure(
        &self,
        id: &FollowUpId,
        token: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>>;

    async fn cancel(&self, id: &FollowUpId, now: DateTime<Utc>) -> Result<CancelOutcome>;

    async fn stats(&self, now: DateTime<Utc>) -> Result<FollowUpStats>;
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Published, training-enabled snippets relevant to `topic`, highest priority first.
    async fn relevant_snippets(&self, topic: Topic, limit: usize) -> Result<Vec<KnowledgeSnippet>>;
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// The participant's profile, if `user_id` takes part in `conversation_id`.
    async fn recipient(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Profile>>;
}

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Append a system message to the conversation log and return its id.
    async fn deliver(
        &self,
        conversation_id: &ConversationId,
        message: OutboundMessage,
    ) -> Result<MessageId>;
}
