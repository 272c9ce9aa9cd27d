//! SQLite Chat Session Store
//!
//! [`ChatSessionStore`] on top of [`sqlx`] with the `sqlite` feature. Tables
//! are created on connect. Queries use the runtime-checked `sqlx::query` form
//! so no database is needed at compile time.
//!
//! Appends take the session's lock from [`SessionLocks`] and then run in one
//! transaction: ownership check, read of the newest `(seq, created_at)`,
//! inserts, commit. Timestamps are stored as fixed-width RFC 3339 strings so
//! text order matches time order.

use std::str::FromStr;

use agent_core::error::{AgentError, Result};
use agent_core::message::{Message, MessageMetadata, Role};
use agent_core::session::{
    ChatSession, ChatSessionStore, SessionId, SessionLocks, SessionSummary, StoredMessage, session_title,
    stamp_batch,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

fn db_err(e: sqlx::Error) -> AgentError {
    AgentError::Persistence(e.to_string())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| AgentError::Persistence(format!("bad timestamp {raw:?}: {e}")))
}

fn to_seq(raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| AgentError::Persistence(format!("bad sequence number {raw}")))
}

type MessageRow = (i64, String, String, String, Option<String>);

/// SQLite-backed chat history
pub struct SqliteSessionStore {
    pool: SqlitePool,
    locks: SessionLocks,
}

impl SqliteSessionStore {
    /// Open (or create) the database at `url` and create missing tables.
    ///
    /// `url` is a sqlx SQLite URL such as `sqlite://chat.db` or
    /// `sqlite::memory:`. In-memory databases use a single pooled
    /// connection that is never recycled, so every query sees the same data.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await.map_err(db_err)?;

        let store = Self {
            pool,
            locks: SessionLocks::new(),
        };
        store.migrate().await?;
        tracing::info!(url, "Chat session store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                owner_user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chat_messages (
                session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                metadata_json TEXT,
                PRIMARY KEY (session_id, seq)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_sessions_owner ON chat_sessions(owner_user_id, updated_at)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    fn decode_message(row: MessageRow) -> Result<StoredMessage> {
        let (seq, role, content, created_at, metadata_json) = row;
        let role = Role::parse(&role).ok_or_else(|| AgentError::Persistence(format!("unknown role {role:?}")))?;
        let metadata = metadata_json
            .map(|raw| serde_json::from_str::<MessageMetadata>(&raw))
            .transpose()?;

        Ok(StoredMessage {
            seq: to_seq(seq)?,
            message: Message {
                role,
                content,
                timestamp: parse_ts(&created_at)?,
                metadata,
            },
        })
    }
}

#[async_trait]
impl ChatSessionStore for SqliteSessionStore {
    async fn append(&self, id: &SessionId, owner: &str, messages: Vec<Message>) -> Result<Vec<StoredMessage>> {
        let _guard = self.locks.acquire(id).await;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let existing_owner: Option<(String,)> =
            sqlx::query_as("SELECT owner_user_id FROM chat_sessions WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        if let Some((existing,)) = &existing_owner {
            if existing != owner {
                return Err(AgentError::SessionOwnership(id.to_string()));
            }
        }

        let last: Option<(i64, String)> = sqlx::query_as(
            "SELECT seq, created_at FROM chat_messages WHERE session_id = ?1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let (last_seq, last_ts) = match last {
            Some((seq, ts)) => (to_seq(seq)?, Some(parse_ts(&ts)?)),
            None => (0, None),
        };

        let stamped = stamp_batch(messages, last_seq, last_ts);
        let Some(newest) = stamped.last() else {
            return Ok(stamped);
        };
        let updated_at = format_ts(newest.message.timestamp);

        if existing_owner.is_none() {
            sqlx::query(
                "INSERT INTO chat_sessions (id, owner_user_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            )
            .bind(id.as_str())
            .bind(owner)
            .bind(format_ts(stamped[0].message.timestamp))
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        for stored in &stamped {
            let metadata_json = stored
                .message
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                "INSERT INTO chat_messages (session_id, seq, role, content, created_at, metadata_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(id.as_str())
            .bind(i64::try_from(stored.seq).map_err(|_| AgentError::Persistence("sequence overflow".into()))?)
            .bind(stored.message.role.as_str())
            .bind(&stored.message.content)
            .bind(format_ts(stored.message.timestamp))
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        sqlx::query("UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2")
            .bind(&updated_at)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(session = %id, appended = stamped.len(), "Appended chat messages");
        Ok(stamped)
    }

    async fn history(&self, id: &SessionId) -> Result<Option<ChatSession>> {
        let session: Option<(String, String, String)> =
            sqlx::query_as("SELECT owner_user_id, created_at, updated_at FROM chat_sessions WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let Some((owner_user_id, created_at, updated_at)) = session else {
            return Ok(None);
        };

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT seq, role, content, created_at, metadata_json FROM chat_messages \
             WHERE session_id = ?1 ORDER BY seq",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let messages = rows
            .into_iter()
            .map(Self::decode_message)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ChatSession {
            id: id.clone(),
            owner_user_id,
            messages,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        }))
    }

    async fn clear(&self, id: &SessionId) -> Result<bool> {
        let removed = {
            let _guard = self.locks.acquire(id).await;
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            sqlx::query("DELETE FROM chat_messages WHERE session_id = ?1")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            let deleted = sqlx::query("DELETE FROM chat_sessions WHERE id = ?1")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            deleted.rows_affected() > 0
        };
        self.locks.forget(id);
        Ok(removed)
    }

    async fn list(&self, owner: &str, limit: usize) -> Result<Vec<SessionSummary>> {
        let rows: Vec<(String, String, String, i64, Option<String>)> = sqlx::query_as(
            r"
            SELECT s.id, s.created_at, s.updated_at,
                   (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.id),
                   (SELECT content FROM chat_messages m
                     WHERE m.session_id = s.id AND m.role = 'user' ORDER BY m.seq LIMIT 1)
            FROM chat_sessions s
            WHERE s.owner_user_id = ?1
            ORDER BY s.updated_at DESC
            LIMIT ?2
            ",
        )
        .bind(owner)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(id, created_at, updated_at, count, first_user)| {
                let id = SessionId::from_string(id);
                Ok(SessionSummary {
                    title: session_title(&id, first_user.as_deref()),
                    id,
                    message_count: usize::try_from(count).unwrap_or_default(),
                    created_at: parse_ts(&created_at)?,
                    updated_at: parse_ts(&updated_at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::{ToolCallRecord, ToolKind};
    use std::sync::Arc;

    async fn store() -> SqliteSessionStore {
        SqliteSessionStore::connect("sqlite::memory:").await.unwrap()
    }

    fn exchange(n: usize) -> Vec<Message> {
        vec![Message::user(format!("question {n}")), Message::assistant(format!("answer {n}"))]
    }

    #[tokio::test]
    async fn test_append_and_history() {
        let store = store().await;
        let id = SessionId::new();

        store.append(&id, "alice", exchange(1)).await.unwrap();
        let second = store.append(&id, "alice", exchange(2)).await.unwrap();
        assert_eq!(second[0].seq, 3);

        let session = store.history(&id).await.unwrap().unwrap();
        assert_eq!(session.owner_user_id, "alice");
        let seqs: Vec<u64> = session.messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(session.messages[2].message.content, "question 2");
        assert_eq!(session.updated_at, session.messages[3].message.timestamp);
    }

    #[tokio::test]
    async fn test_tool_record_survives_round_trip() {
        let store = store().await;
        let id = SessionId::new();
        let record = ToolCallRecord {
            tool: ToolKind::PhCalculator,
            id: Some("call-1".into()),
            arguments: [("current_ph".to_string(), serde_json::json!(5.5))].into_iter().collect(),
            result: "Add 2.6 kg lime".into(),
            success: true,
        };
        let batch = vec![
            Message::user("pH 5.5"),
            Message::tool("[Tool 'ph_calculator' returned]\nAdd 2.6 kg lime", Some("call-1".into()))
                .with_tool_call(record.clone()),
            Message::assistant("Add lime."),
        ];

        store.append(&id, "alice", batch).await.unwrap();
        let session = store.history(&id).await.unwrap().unwrap();
        assert_eq!(session.messages[1].message.role, Role::Tool);
        assert_eq!(session.messages[1].message.tool_call(), Some(&record));
    }

    #[tokio::test]
    async fn test_append_rejects_other_owner() {
        let store = store().await;
        let id = SessionId::new();
        store.append(&id, "alice", exchange(1)).await.unwrap();

        let err = store.append(&id, "mallory", exchange(2)).await.unwrap_err();
        assert!(matches!(err, AgentError::SessionOwnership(_)));
        assert_eq!(store.history(&id).await.unwrap().unwrap().message_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_contiguous() {
        let store = Arc::new(store().await);
        let id = SessionId::new();

        let handles: Vec<_> = (0..20)
            .map(|n| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move { store.append(&id, "alice", exchange(n)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let session = store.history(&id).await.unwrap().unwrap();
        let seqs: Vec<u64> = session.messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, (1..=40).collect::<Vec<_>>());
        for pair in session.messages.chunks(2) {
            let n = pair[0].message.content.trim_start_matches("question ");
            assert_eq!(pair[1].message.content, format!("answer {n}"));
        }
        for window in session.messages.windows(2) {
            assert!(window[0].message.timestamp <= window[1].message.timestamp);
        }
    }

    #[tokio::test]
    async fn test_clear_and_list() {
        let store = store().await;
        let a = SessionId::new();
        let b = SessionId::new();
        store.append(&a, "alice", exchange(1)).await.unwrap();
        store.append(&b, "alice", exchange(2)).await.unwrap();
        store.append(&SessionId::new(), "bob", exchange(3)).await.unwrap();

        let listed = store.list("alice", 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b);
        assert_eq!(listed[0].title, "question 2");
        assert_eq!(listed[0].message_count, 2);

        assert!(store.clear(&a).await.unwrap());
        assert!(!store.clear(&a).await.unwrap());
        assert!(store.history(&a).await.unwrap().is_none());

        // A cleared id can be reused
        let fresh = store.append(&a, "alice", exchange(4)).await.unwrap();
        assert_eq!(fresh[0].seq, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_creates_nothing() {
        let store = store().await;
        let id = SessionId::new();
        let stored = store.append(&id, "alice", vec![Message::system("prompt")]).await.unwrap();
        assert!(stored.is_empty());
        assert!(store.history(&id).await.unwrap().is_none());
    }
}
