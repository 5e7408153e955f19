use crate::MAX_RETRIES;
use crate::error::{Result, StoreError};
use crate::traits::{FollowUpStore, KnowledgeBase, MessageSink, ProfileDirectory};
use crate::types::{
    CancelOutcome, ConversationId, FailureOutcome, FollowUpId, FollowUpRecord, FollowUpStats,
    FollowUpStatus, KnowledgeSnippet, MessageId, NewFollowUp, OutboundMessage, Profile, SnippetId,
    Topic, Urgency, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS follow_ups (
    id                    TEXT PRIMARY KEY,
    conversation_id       TEXT NOT NULL,
    user_id               TEXT NOT NULL,
    original_message_id   TEXT NOT NULL,
    auto_reply_message_id TEXT NOT NULL,
    user_question_summary TEXT NOT NULL,
    detected_topic        TEXT NOT NULL,
    urgency_level         TEXT NOT NULL,
    promised_return_time  INTEGER NOT NULL,
    created_at            INTEGER NOT NULL,
    status                TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'sent', 'failed', 'cancelled')),
    follow_up_sent_at     INTEGER,
    follow_up_message_id  TEXT,
    actual_return_time    INTEGER,
    retry_count           INTEGER NOT NULL DEFAULT 0,
    error_message         TEXT,
    claim_token           TEXT,
    claim_expires_at      INTEGER,
    updated_at            INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_follow_ups_due
    ON follow_ups (status, promised_return_time);
CREATE INDEX IF NOT EXISTS idx_follow_ups_conversation
    ON follow_ups (conversation_id);

CREATE TABLE IF NOT EXISTS knowledge_snippets (
    id                  TEXT PRIMARY KEY,
    title               TEXT NOT NULL,
    summary             TEXT NOT NULL DEFAULT '',
    content             TEXT NOT NULL DEFAULT '',
    tags                TEXT NOT NULL DEFAULT '[]',
    context_priority    REAL NOT NULL DEFAULT 0,
    is_published        INTEGER NOT NULL DEFAULT 0,
    ai_training_enabled INTEGER NOT NULL DEFAULT 0,
    updated_at          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    user_id      TEXT PRIMARY KEY,
    first_name   TEXT NOT NULL DEFAULT '',
    display_name TEXT
);

CREATE TABLE IF NOT EXISTS conversation_participants (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    PRIMARY KEY (conversation_id, user_id)
);

CREATE TABLE IF NOT EXISTS conversation_messages (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sender_id       TEXT,
    message_type    TEXT NOT NULL,
    content         TEXT NOT NULL,
    metadata        TEXT NOT NULL,
    created_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversation_messages_conversation
    ON conversation_messages (conversation_id, created_at);
"#;

const RECORD_COLUMNS: &str = "id, conversation_id, user_id, original_message_id, \
     auto_reply_message_id, user_question_summary, detected_topic, urgency_level, \
     promised_return_time, created_at, status, follow_up_sent_at, follow_up_message_id, \
     actual_return_time, retry_count, error_message";

/// Eligibility predicate shared by the due query, the due count and the claim.
/// Parameters: `?1` = now (ms), `?2` = retry limit.
const DUE_PREDICATE: &str = "status = 'pending' \
     AND promised_return_time <= ?1 \
     AND retry_count < ?2 \
     AND (claim_expires_at IS NULL OR claim_expires_at <= ?1)";

/// A row from the conversation message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: Option<String>,
    pub message_type: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed implementation of every storage collaborator.
///
/// One connection behind a mutex; calls run on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    #[tracing::instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        tracing::debug!(journal_mode = %mode, "sqlite store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut guard)
        })
        .await?
    }

    pub async fn upsert_snippet(&self, snippet: KnowledgeSnippet) -> Result<()> {
        let tags = serde_json::to_string(&snippet.tags)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO knowledge_snippets \
                 (id, title, summary, content, tags, context_priority, is_published, \
                  ai_training_enabled, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(id) DO UPDATE SET \
                   title = excluded.title, summary = excluded.summary, \
                   content = excluded.content, tags = excluded.tags, \
                   context_priority = excluded.context_priority, \
                   is_published = excluded.is_published, \
                   ai_training_enabled = excluded.ai_training_enabled, \
                   updated_at = excluded.updated_at",
                params![
                    snippet.id.as_str(),
                    snippet.title,
                    snippet.summary,
                    snippet.content,
                    tags,
                    snippet.context_priority,
                    snippet.is_published,
                    snippet.ai_training_enabled,
                    Utc::now().timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_profile(&self, profile: Profile) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, first_name, display_name) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(user_id) DO UPDATE SET \
                   first_name = excluded.first_name, display_name = excluded.display_name",
                params![profile.user_id.as_str(), profile.first_name, profile.display_name],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn add_participant(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<()> {
        let conversation_id = conversation_id.clone();
        let user_id = user_id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) \
                 VALUES (?1, ?2)",
                params![conversation_id.as_str(), user_id.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    /// Conversation log in delivery order.
    pub async fn conversation_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<StoredMessage>> {
        let conversation_id = conversation_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, conversation_id, sender_id, message_type, content, metadata, created_at \
                 FROM conversation_messages WHERE conversation_id = ?1 \
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt
                .query_map(params![conversation_id.as_str()], |row| {
                    let metadata: String = row.get(5)?;
                    Ok((
                        StoredMessage {
                            id: MessageId::new(row.get::<_, String>(0)?),
                            conversation_id: ConversationId::new(row.get::<_, String>(1)?),
                            sender_id: row.get(2)?,
                            message_type: row.get(3)?,
                            content: row.get(4)?,
                            metadata: serde_json::Value::Null,
                            created_at: ts(row, 6)?,
                        },
                        metadata,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(mut msg, raw)| -> Result<StoredMessage> {
                    msg.metadata = serde_json::from_str(&raw)?;
                    Ok(msg)
                })
                .collect()
        })
        .await
    }
}

#[async_trait]
impl FollowUpStore for SqliteStore {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn insert(&self, new: NewFollowUp) -> Result<FollowUpRecord> {
        let id = FollowUpId::generate();
        let record = FollowUpRecord {
            id,
            conversation_id: new.conversation_id,
            user_id: new.user_id,
            original_message_id: new.original_message_id,
            auto_reply_message_id: new.auto_reply_message_id,
            user_question_summary: new.user_question_summary,
            detected_topic: new.detected_topic,
            urgency_level: new.urgency_level,
            promised_return_time: new.promised_return_time,
            created_at: new.created_at,
            status: FollowUpStatus::Pending,
            follow_up_sent_at: None,
            follow_up_message_id: None,
            actual_return_time: None,
            retry_count: 0,
            error_message: None,
        };
        let row = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO follow_ups \
                 (id, conversation_id, user_id, original_message_id, auto_reply_message_id, \
                  user_question_summary, detected_topic, urgency_level, promised_return_time, \
                  created_at, status, retry_count, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', 0, ?10)",
                params![
                    row.id.as_str(),
                    row.conversation_id.as_str(),
                    row.user_id.as_str(),
                    row.original_message_id.as_str(),
                    row.auto_reply_message_id.as_str(),
                    row.user_question_summary,
                    row.detected_topic,
                    row.urgency_level,
                    row.promised_return_time.timestamp_millis(),
                    row.created_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await?;
        tracing::debug!(follow_up_id = %record.id, "follow-up inserted");
        Ok(record)
    }

    async fn get(&self, id: &FollowUpId) -> Result<Option<FollowUpRecord>> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {RECORD_COLUMNS} FROM follow_ups WHERE id = ?1");
            let record = conn
                .query_row(&sql, params![id.as_str()], record_from_row)
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn list(
        &self,
        status: Option<FollowUpStatus>,
        limit: usize,
    ) -> Result<Vec<FollowUpRecord>> {
        let limit = sql_limit(limit);
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM follow_ups \
                 WHERE (?1 IS NULL OR status = ?1) \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params![status, limit], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn due_follow_ups(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FollowUpRecord>> {
        let limit = sql_limit(limit);
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM follow_ups WHERE {DUE_PREDICATE} \
                 ORDER BY promised_return_time ASC, created_at ASC, rowid ASC LIMIT ?3"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(
                    params![now.timestamp_millis(), MAX_RETRIES, limit],
                    record_from_row,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn claim(
        &self,
        id: &FollowUpId,
        token: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.clone();
        let token = token.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "UPDATE follow_ups SET claim_token = ?3, claim_expires_at = ?4, updated_at = ?1 \
                 WHERE id = ?5 AND {DUE_PREDICATE}"
            );
            let changed = conn.execute(
                &sql,
                params![
                    now.timestamp_millis(),
                    MAX_RETRIES,
                    token,
                    lease_until.timestamp_millis(),
                    id.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn renew_claim(
        &self,
        id: &FollowUpId,
        token: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.clone();
        let token = token.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE follow_ups SET claim_expires_at = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND status = 'pending' AND claim_token = ?4",
                params![
                    lease_until.timestamp_millis(),
                    now.timestamp_millis(),
                    id.as_str(),
                    token
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn mark_sent(
        &self,
        id: &FollowUpId,
        token: &str,
        message_id: &MessageId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.clone();
        let token = token.to_string();
        let message_id = message_id.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE follow_ups SET status = 'sent', follow_up_sent_at = ?1, \
                   follow_up_message_id = ?2, actual_return_time = ?1, error_message = NULL, \
                   claim_token = NULL, claim_expires_at = NULL, updated_at = ?1 \
                 WHERE id = ?3 AND status = 'pending' AND claim_token = ?4",
                params![
                    now.timestamp_millis(),
                    message_id.as_str(),
                    id.as_str(),
                    token
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn record_failure(
        &self,
        id: &FollowUpId,
        token: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<FailureOutcome>> {
        let id = id.clone();
        let token = token.to_string();
        let error = error.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE follow_ups SET retry_count = retry_count + 1, error_message = ?1, \
                   status = CASE WHEN retry_count + 1 >= ?2 THEN 'failed' ELSE 'pending' END, \
                   claim_token = NULL, claim_expires_at = NULL, updated_at = ?3 \
                 WHERE id = ?4 AND status = 'pending' AND claim_token = ?5",
                params![error, MAX_RETRIES, now.timestamp_millis(), id.as_str(), token],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let outcome = tx.query_row(
                "SELECT retry_count, status FROM follow_ups WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(FailureOutcome {
                        retry_count: row.get(0)?,
                        status: row.get(1)?,
                    })
                },
            )?;
            tx.commit()?;
            Ok(Some(outcome))
        })
        .await
    }

    #[tracing::instrument(level = "debug", skip_all, fields(follow_up_id = %id))]
    async fn cancel(&self, id: &FollowUpId, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE follow_ups SET status = 'cancelled', claim_token = NULL, \
                   claim_expires_at = NULL, updated_at = ?1 \
                 WHERE id = ?2 AND status = 'pending'",
                params![now.timestamp_millis(), id.as_str()],
            )?;
            let outcome = if changed == 1 {
                CancelOutcome::Cancelled
            } else {
                let status: Option<FollowUpStatus> = tx
                    .query_row(
                        "SELECT status FROM follow_ups WHERE id = ?1",
                        params![id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?;
                match status {
                    Some(status) => CancelOutcome::AlreadyTerminal { status },
                    None => CancelOutcome::NotFound,
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn stats(&self, now: DateTime<Utc>) -> Result<FollowUpStats> {
        self.with_conn(move |conn| {
            let mut stats = FollowUpStats::default();
            {
                let mut stmt =
                    conn.prepare_cached("SELECT status, COUNT(*) FROM follow_ups GROUP BY status")?;
                let counts = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, FollowUpStatus>(0)?, row.get::<_, u64>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for (status, count) in counts {
                    match status {
                        FollowUpStatus::Pending => stats.pending = count,
                        FollowUpStatus::Sent => stats.sent = count,
                        FollowUpStatus::Failed => stats.failed = count,
                        FollowUpStatus::Cancelled => stats.cancelled = count,
                    }
                }
            }
            let due_sql = format!("SELECT COUNT(*) FROM follow_ups WHERE {DUE_PREDICATE}");
            stats.due = conn.query_row(
                &due_sql,
                params![now.timestamp_millis(), MAX_RETRIES],
                |row| row.get(0),
            )?;
            let avg_ms: Option<f64> = conn.query_row(
                "SELECT AVG(actual_return_time - promised_return_time) FROM follow_ups \
                 WHERE status = 'sent' AND actual_return_time IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
            stats.average_delay_seconds = avg_ms.map(|ms| ms / 1000.0);
            Ok(stats)
        })
        .await
    }
}

#[async_trait]
impl KnowledgeBase for SqliteStore {
    async fn relevant_snippets(&self, topic: Topic, limit: usize) -> Result<Vec<KnowledgeSnippet>> {
        let eligible = self
            .with_conn(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, title, summary, content, tags, context_priority, is_published, \
                       ai_training_enabled \
                     FROM knowledge_snippets \
                     WHERE is_published = 1 AND ai_training_enabled = 1 \
                     ORDER BY context_priority DESC, id ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            KnowledgeSnippet {
                                id: SnippetId::new(row.get::<_, String>(0)?),
                                title: row.get(1)?,
                                summary: row.get(2)?,
                                content: row.get(3)?,
                                tags: Vec::new(),
                                context_priority: row.get(5)?,
                                is_published: row.get(6)?,
                                ai_training_enabled: row.get(7)?,
                            },
                            row.get::<_, String>(4)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut out = Vec::with_capacity(limit);
        for (mut snippet, raw_tags) in eligible {
            snippet.tags = serde_json::from_str(&raw_tags).unwrap_or_else(|e| {
                tracing::warn!(snippet_id = %snippet.id, %e, "ignoring malformed snippet tags");
                Vec::new()
            });
            if out.len() >= limit {
                break;
            }
            if snippet.matches_topic(topic) {
                out.push(snippet);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ProfileDirectory for SqliteStore {
    async fn recipient(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<Option<Profile>> {
        let conversation_id = conversation_id.clone();
        let user_id = user_id.clone();
        self.with_conn(move |conn| {
            let profile = conn
                .query_row(
                    "SELECT p.user_id, p.first_name, p.display_name \
                     FROM conversation_participants cp \
                     JOIN profiles p ON p.user_id = cp.user_id \
                     WHERE cp.conversation_id = ?1 AND cp.user_id = ?2",
                    params![conversation_id.as_str(), user_id.as_str()],
                    |row| {
                        Ok(Profile {
                            user_id: UserId::new(row.get::<_, String>(0)?),
                            first_name: row.get(1)?,
                            display_name: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(profile)
        })
        .await
    }
}

#[async_trait]
impl MessageSink for SqliteStore {
    #[tracing::instrument(level = "debug", skip_all, fields(conversation_id = %conversation_id))]
    async fn deliver(
        &self,
        conversation_id: &ConversationId,
        message: OutboundMessage,
    ) -> Result<MessageId> {
        if message.content.trim().is_empty() {
            return Err(StoreError::InvalidValue(
                "refusing to deliver an empty message".into(),
            ));
        }
        let id = MessageId::new(uuid::Uuid::new_v4().to_string());
        let metadata = serde_json::to_string(&message.metadata)?;
        let conversation_id = conversation_id.clone();
        let row_id = id.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversation_messages \
                 (id, conversation_id, sender_id, message_type, content, metadata, created_at) \
                 VALUES (?1, ?2, NULL, 'text', ?3, ?4, ?5)",
                params![
                    row_id.as_str(),
                    conversation_id.as_str(),
                    message.content,
                    metadata,
                    Utc::now().timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await?;
        Ok(id)
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FollowUpRecord> {
    Ok(FollowUpRecord {
        id: FollowUpId::new(row.get::<_, String>(0)?),
        conversation_id: ConversationId::new(row.get::<_, String>(1)?),
        user_id: UserId::new(row.get::<_, String>(2)?),
        original_message_id: MessageId::new(row.get::<_, String>(3)?),
        auto_reply_message_id: MessageId::new(row.get::<_, String>(4)?),
        user_question_summary: row.get(5)?,
        detected_topic: row.get(6)?,
        urgency_level: row.get(7)?,
        promised_return_time: ts(row, 8)?,
        created_at: ts(row, 9)?,
        status: row.get(10)?,
        follow_up_sent_at: opt_ts(row, 11)?,
        follow_up_message_id: row.get::<_, Option<String>>(12)?.map(MessageId::new),
        actual_return_time: opt_ts(row, 13)?,
        retry_count: row.get(14)?,
        error_message: row.get(15)?,
    })
}

macro_rules! sql_text_enum {
    ($($name:ty),+) => {$(
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    )+};
}

sql_text_enum!(Topic, Urgency, FollowUpStatus);
