//! Session Management
//!
//! Chat sessions are append-only message logs owned by one user. Stores
//! assign each appended message a sequence number and timestamp while
//! holding the session's lock from [`SessionLocks`], so concurrent appends to
//! one session land as whole, contiguous batches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};

/// Unique session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted message with its position in the session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// 1-based, contiguous within a session
    pub seq: u64,

    #[serde(flatten)]
    pub message: Message,
}

/// A complete chat session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,

    pub owner_user_id: String,

    /// Messages in sequence order
    pub messages: Vec<StoredMessage>,

    pub created_at: DateTime<Utc>,

    /// Timestamp of the newest message
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(id: SessionId, owner_user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_user_id: owner_user_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Title generated from the first user message
    pub fn title(&self) -> String {
        let first_user = self
            .messages
            .iter()
            .find(|m| m.message.role == Role::User)
            .map(|m| m.message.content.as_str());
        session_title(&self.id, first_user)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_user_id == user_id
    }

    /// Messages without sequence numbers, for feeding back to the agent
    pub fn history(&self) -> Vec<Message> {
        self.messages.iter().map(|m| m.message.clone()).collect()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title(),
            message_count: self.message_count(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Session title: a preview of the first user message, else a short id
pub fn session_title(id: &SessionId, first_user_message: Option<&str>) -> String {
    first_user_message.map_or_else(
        || {
            let short: String = id.as_str().chars().take(8).collect();
            format!("Session {short}")
        },
        |content| {
            let preview: String = content.chars().take(50).collect();
            if content.chars().count() > 50 {
                format!("{preview}...")
            } else {
                preview
            }
        },
    )
}

/// Listing entry for a user's sessions
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent chat history
#[async_trait]
pub trait ChatSessionStore: Send + Sync {
    /// Append a batch to the end of a session, creating it for `owner` if absent.
    ///
    /// System messages are skipped. Fails with
    /// [`AgentError::SessionOwnership`] when another user owns the session.
    async fn append(&self, id: &SessionId, owner: &str, messages: Vec<Message>) -> Result<Vec<StoredMessage>>;

    /// Load a session with all its messages
    async fn history(&self, id: &SessionId) -> Result<Option<ChatSession>>;

    /// Delete a session and its messages; returns whether it existed
    async fn clear(&self, id: &SessionId) -> Result<bool>;

    /// A user's sessions, most recently updated first
    async fn list(&self, owner: &str, limit: usize) -> Result<Vec<SessionSummary>>;
}

/// Per-session async locks serializing appends
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one session
    pub async fn acquire(&self, id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop the lock entry of a cleared session if nobody is waiting on it
    pub fn forget(&self, id: &SessionId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }
}

/// Assign sequence numbers and non-decreasing timestamps to a batch.
///
/// `last_seq` and `last_timestamp` describe the session's newest stored
/// message; system messages are dropped.
pub fn stamp_batch(
    messages: Vec<Message>,
    last_seq: u64,
    last_timestamp: Option<DateTime<Utc>>,
) -> Vec<StoredMessage> {
    let mut seq = last_seq;
    let mut floor = last_timestamp;

    messages
        .into_iter()
        .filter(|m| m.role != Role::System)
        .map(|mut message| {
            let now = Utc::now();
            let stamped = floor.map_or(now, |prev| prev.max(now));
            floor = Some(stamped);
            seq += 1;
            message.timestamp = stamped;
            StoredMessage { seq, message }
        })
        .collect()
}

/// In-memory session store (for development/testing)
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, ChatSession>>,
    locks: SessionLocks,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatSessionStore for MemorySessionStore {
    async fn append(&self, id: &SessionId, owner: &str, messages: Vec<Message>) -> Result<Vec<StoredMessage>> {
        let _guard = self.locks.acquire(id).await;

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = sessions.get(id) {
            if !existing.is_owned_by(owner) {
                return Err(AgentError::SessionOwnership(id.to_string()));
            }
        }

        let last = sessions.get(id).and_then(|s| s.messages.last());
        let stamped = stamp_batch(messages, last.map_or(0, |m| m.seq), last.map(|m| m.message.timestamp));
        let Some(newest) = stamped.last() else {
            return Ok(stamped);
        };
        let newest_ts = newest.message.timestamp;
        let first_ts = stamped[0].message.timestamp;

        let session = sessions.entry(id.clone()).or_insert_with(|| ChatSession {
            created_at: first_ts,
            ..ChatSession::new(id.clone(), owner)
        });
        session.updated_at = newest_ts;
        session.messages.extend(stamped.iter().cloned());

        tracing::debug!(session = %id, appended = stamped.len(), "Appended chat messages");
        Ok(stamped)
    }

    async fn history(&self, id: &SessionId) -> Result<Option<ChatSession>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(id).cloned())
    }

    async fn clear(&self, id: &SessionId) -> Result<bool> {
        let removed = {
            let _guard = self.locks.acquire(id).await;
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            sessions.remove(id).is_some()
        };
        self.locks.forget(id);
        Ok(removed)
    }

    async fn list(&self, owner: &str, limit: usize) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<_> = sessions
            .values()
            .filter(|s| s.is_owned_by(owner))
            .map(ChatSession::summary)
            .collect();

        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result.truncate(limit);

        Ok(result)
    }
}
