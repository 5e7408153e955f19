//! Turns an auto-reply event into a persisted follow-up promise.

use crate::availability::BusinessHours;
use crate::classifier::FallbackClassifier;
use chrono::{DateTime, Utc};
use fu_store::{
    CancelOutcome, ConversationId, FollowUpId, FollowUpRecord, FollowUpStore, MessageId,
    NewFollowUp, StoreError, UserId,
};
use serde::Deserialize;
use std::sync::Arc;

/// Emitted when the operator's auto-reply went out for a user message.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoReplyEvent {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub original_message_id: MessageId,
    pub auto_reply_message_id: MessageId,
    pub user_message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("user message is empty")]
    EmptyMessage,
    #[error("{0} must not be empty")]
    MissingField(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct FollowUpIntake {
    store: Arc<dyn FollowUpStore>,
    classifier: Arc<FallbackClassifier>,
    hours: BusinessHours,
}

impl FollowUpIntake {
    pub fn new(
        store: Arc<dyn FollowUpStore>,
        classifier: Arc<FallbackClassifier>,
        hours: BusinessHours,
    ) -> Self {
        Self {
            store,
            classifier,
            hours,
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(conversation_id = %event.conversation_id, user_id = %event.user_id)
    )]
    pub async fn register(
        &self,
        event: AutoReplyEvent,
        now: DateTime<Utc>,
    ) -> Result<FollowUpRecord, IntakeError> {
        let message = event.user_message.trim();
        if message.is_empty() {
            return Err(IntakeError::EmptyMessage);
        }
        for (name, value) in [
            ("conversation_id", event.conversation_id.as_str()),
            ("user_id", event.user_id.as_str()),
            ("original_message_id", event.original_message_id.as_str()),
            ("auto_reply_message_id", event.auto_reply_message_id.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(IntakeError::MissingField(name));
            }
        }

        let classification = self.classifier.classify(message).await;
        let availability = self.hours.is_available(now);
        let promised = self.hours.next_return_time(now, availability.status);

        let record = self
            .store
            .insert(NewFollowUp {
                conversation_id: event.conversation_id,
                user_id: event.user_id,
                original_message_id: event.original_message_id,
                auto_reply_message_id: event.auto_reply_message_id,
                user_question_summary: classification.summary,
                detected_topic: classification.topic,
                urgency_level: classification.urgency,
                promised_return_time: promised,
                created_at: now,
            })
            .await?;

        tracing::info!(
            follow_up_id = %record.id,
            topic = %record.detected_topic,
            urgency = %record.urgency_level,
            operator_status = ?availability.status,
            promised_return_time = %record.promised_return_time,
            "follow-up registered"
        );
        Ok(record)
    }

    #[tracing::instrument(level = "info", skip(self), fields(follow_up_id = %id))]
    pub async fn cancel(
        &self,
        id: &FollowUpId,
        now: DateTime<Utc>,
    ) -> Result<CancelOutcome, IntakeError> {
        let outcome = self.store.cancel(id, now).await?;
        tracing::info!(?outcome, "follow-up cancel requested");
        Ok(outcome)
    }
}
