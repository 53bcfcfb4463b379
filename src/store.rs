//! Conversation store: append-only message logs per (email, session) plus
//! the per-email index the admin listing reads.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::kv::{KvError, KvStore};
use crate::types::{ChatMessage, ConversationIndexEntry, Role};

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_RANGE_COUNT: usize = 200;
pub const INDEX_SCAN_LIMIT: usize = 200;
const MIN_SESSION_ID_CHARS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("email must contain @")]
    InvalidEmail,
    #[error("session id must be at least 8 characters")]
    InvalidSessionId,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Wire-level reason string for failure responses.
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::InvalidEmail => "email_invalid",
            StoreError::InvalidSessionId => "session_id_invalid",
            StoreError::EmptyMessage => "message_empty",
            StoreError::Unavailable(_) => "store_unavailable",
        }
    }
}

impl From<KvError> for StoreError {
    fn from(err: KvError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn normalize_email(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

fn convo_key(email: &str, session_id: &str) -> String {
    format!("support:convo:{email}:{session_id}")
}

fn index_key(email: &str) -> String {
    format!("support:index:{email}")
}

/// Validates the conversation coordinates and returns the normalized email.
/// No store access happens before this passes.
fn validate(email: &str, session_id: &str) -> Result<String, StoreError> {
    let email = normalize_email(email);
    if !email.contains('@') {
        return Err(StoreError::InvalidEmail);
    }
    if session_id.chars().count() < MIN_SESSION_ID_CHARS {
        return Err(StoreError::InvalidSessionId);
    }
    Ok(email)
}

#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KvStore>,
}

impl ConversationStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Appends one message to the conversation log, then overwrites the
    /// per-email index entry. The two writes are separate calls: the index
    /// is last-write-wins and may briefly trail the log.
    pub async fn append(
        &self,
        email: &str,
        session_id: &str,
        from: Role,
        message: &str,
    ) -> Result<ChatMessage, StoreError> {
        let email = validate(email, session_id)?;
        let body = message.trim();
        if body.is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        let body = truncate_chars(body, MAX_MESSAGE_CHARS);

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            from,
            email: email.clone(),
            session_id: session_id.to_string(),
            message: body.to_string(),
            created_at: now_iso(),
        };

        let payload = serde_json::to_string(&message)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        self.kv.rpush(&convo_key(&email, session_id), &payload).await?;

        let entry = ConversationIndexEntry {
            email: email.clone(),
            session_id: session_id.to_string(),
            updated_at: message.created_at.clone(),
        };
        let entry_payload = serde_json::to_string(&entry)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        self.kv.set(&index_key(&email), &entry_payload).await?;

        tracing::debug!(%email, session_id, from = %message.from, "appended support message");
        Ok(message)
    }

    /// Reads messages in append order. Unknown conversations read as empty,
    /// and stored values that no longer parse are skipped.
    pub async fn range(
        &self,
        email: &str,
        session_id: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let email = validate(email, session_id)?;
        let count = count.min(MAX_RANGE_COUNT);
        if count == 0 {
            return Ok(vec![]);
        }
        let stop = (start + count - 1) as isize;
        let raw = self
            .kv
            .lrange(&convo_key(&email, session_id), start as isize, stop)
            .await?;

        let mut messages = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str::<ChatMessage>(&item) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    tracing::warn!(%email, session_id, %err, "skipping malformed stored message");
                }
            }
        }
        Ok(messages)
    }

    /// Scans the index namespace (one scan page, bounded by `limit`) and
    /// returns entries newest-first. Malformed entries are skipped so one
    /// corrupt record cannot break the whole listing.
    pub async fn list_index(&self, limit: usize) -> Result<Vec<ConversationIndexEntry>, StoreError> {
        let keys = self.kv.scan("support:index:*", limit).await?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys.iter().take(limit) {
            let Some(raw) = self.kv.get(key).await? else {
                continue;
            };
            match serde_json::from_str::<ConversationIndexEntry>(&raw) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::warn!(key = %key, %err, "skipping malformed index entry"),
            }
        }
        // RFC 3339 timestamps in the same format compare correctly as strings.
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }
}
