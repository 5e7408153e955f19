use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(FollowUpId);
id_newtype!(ConversationId);
id_newtype!(UserId);
id_newtype!(MessageId);
id_newtype!(SnippetId);

impl FollowUpId {
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Declares a closed string enum with `as_str`, `FromStr` and `Display`.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Coarse bucket for what the user asked about.
    Topic, "topic" {
        Kyc => "kyc",
        Technical => "technical",
        TaskRejection => "task_rejection",
        Payment => "payment",
        TaskHelp => "task_help",
        General => "general",
    }
);

string_enum!(
    Urgency, "urgency" {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
);

string_enum!(
    FollowUpStatus, "status" {
        Pending => "pending",
        Sent => "sent",
        Failed => "failed",
        Cancelled => "cancelled",
    }
);

impl Urgency {
    pub fn is_escalated(self) -> bool {
        matches!(self, Urgency::High | Urgency::Urgent)
    }
}

/// A promise to come back to a user once an operator is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRecord {
    pub id: FollowUpId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub original_message_id: MessageId,
    pub auto_reply_message_id: MessageId,
    pub user_question_summary: String,
    pub detected_topic: Topic,
    pub urgency_level: Urgency,
    pub promised_return_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub status: FollowUpStatus,
    pub follow_up_sent_at: Option<DateTime<Utc>>,
    pub follow_up_message_id: Option<MessageId>,
    pub actual_return_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFollowUp {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub original_message_id: MessageId,
    pub auto_reply_message_id: MessageId,
    pub user_question_summary: String,
    pub detected_topic: Topic,
    pub urgency_level: Urgency,
    pub promised_return_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub id: SnippetId,
    pub title: String,
    pub summary: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context_priority: f64,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub ai_training_enabled: bool,
}

impl KnowledgeSnippet {
    /// Tag membership or a case-insensitive substring hit on title/content.
    pub fn matches_topic(&self, topic: Topic) -> bool {
        let needle = topic.as_str();
        if self.tags.iter().any(|t| t.trim().eq_ignore_ascii_case(needle)) {
            return true;
        }
        self.title.to_lowercase().contains(needle) || self.content.to_lowercase().contains(needle)
    }

    pub fn is_retrievable(&self) -> bool {
        self.is_published && self.ai_training_enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub first_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Profile {
    /// Name used in the greeting line: first name, else the display name's first word.
    pub fn greeting_name(&self) -> Option<&str> {
        let first = self.first_name.trim();
        if !first.is_empty() {
            return Some(first);
        }
        self.display_name
            .as_deref()
            .and_then(|d| d.split_whitespace().next())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpMetadata {
    pub sender_type: String,
    pub is_follow_up: bool,
    pub follow_up_id: FollowUpId,
    pub original_topic: Topic,
}

impl FollowUpMetadata {
    pub fn for_record(record: &FollowUpRecord) -> Self {
        Self {
            sender_type: "ai_assistant".to_string(),
            is_follow_up: true,
            follow_up_id: record.id.clone(),
            original_topic: record.detected_topic,
        }
    }
}

/// A text message appended to a conversation by the system (no human sender).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: String,
    pub metadata: FollowUpMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal { status: FollowUpStatus },
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureOutcome {
    pub retry_count: u32,
    pub status: FollowUpStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FollowUpStats {
    pub pending: u64,
    pub due: u64,
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Mean of `actual_return_time - promised_return_time` over sent records.
    pub average_delay_seconds: Option<f64>,
}
