//! Storage traits and errors for conversations and memories.
//!
//! The pipeline only talks to these traits; [`SqliteStore`](super::sqlite::SqliteStore)
//! is the production backend. Calls are synchronous and short: each takes a
//! single connection lock and runs one or two statements.

use super::types::{
    Conversation, ConversationLogEntry, ConversationMetadata, MemoryHit, MemoryKind, MemoryScope,
    NewConversation, NewLogEntry,
};

/// Errors from a conversation or memory store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    /// Another writer already created a conversation for this session id.
    #[error("session {0} already has a conversation")]
    DuplicateSession(String),

    /// An optimistic metadata update lost the race.
    #[error("conversation {id} metadata changed (expected version {expected})")]
    Conflict { id: i64, expected: i64 },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the store itself is unreachable, as opposed to a bad write.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Lock(_) | Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Conversation and turn-log persistence.
pub trait ConversationStore: Send + Sync {
    /// Look up the conversation for a session id.
    fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>, StoreError>;

    /// The newest conversation whose session id starts with `prefix`.
    fn latest_with_prefix(&self, prefix: &str) -> Result<Option<Conversation>, StoreError>;

    /// Look up a conversation by row id.
    fn get(&self, id: i64) -> Result<Option<Conversation>, StoreError>;

    /// Create a new active conversation.
    ///
    /// Fails with [`StoreError::DuplicateSession`] if a conversation with the
    /// same session id already exists.
    fn create(&self, new: &NewConversation) -> Result<Conversation, StoreError>;

    /// Mark a conversation ended. Returns `false` if it was already ended.
    fn end(&self, id: i64, reason: &str) -> Result<bool, StoreError>;

    /// Assign a persona.
    fn set_persona(&self, id: i64, persona: &str) -> Result<(), StoreError>;

    /// Replace metadata if the row is still at `expected_version`.
    ///
    /// Returns the new version, or [`StoreError::Conflict`] if another writer
    /// got there first.
    fn update_metadata(
        &self,
        id: i64,
        expected_version: i64,
        metadata: &ConversationMetadata,
    ) -> Result<i64, StoreError>;

    /// Append a turn and bump the conversation's message count.
    fn append_log(&self, entry: &NewLogEntry) -> Result<ConversationLogEntry, StoreError>;

    /// Timestamp of the most recent turn for a session.
    fn last_log_at(&self, session_id: &str) -> Result<Option<u64>, StoreError>;

    /// The most recent `limit` turns, oldest first.
    fn recent_logs(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationLogEntry>, StoreError>;
}

/// Long-term memories and conversation summaries.
///
/// The turn pipeline only reads these, through the `search_memories` tool.
/// Rows are written by the installation's offline jobs (end-of-night
/// conversation summarizer, event and people curation) against the same
/// database file.
pub trait MemoryStore: Send + Sync {
    /// Store a memory. Returns its row id.
    fn insert_memory(
        &self,
        kind: MemoryKind,
        content: &str,
        tags: &[String],
    ) -> Result<i64, StoreError>;

    /// Store a conversation summary. Returns its row id.
    ///
    /// Producer: the offline summarizer, once a conversation has ended.
    fn insert_summary(&self, session_id: &str, summary: &str) -> Result<i64, StoreError>;

    /// Scored text search, best hits first.
    fn search_memories(
        &self,
        query: &str,
        scope: MemoryScope,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, StoreError>;
}

/// Reload, apply `merge`, and write metadata; retry once on conflict.
///
/// `merge` must only touch the caller's own keys so that a reload after a
/// conflict keeps the other writer's changes.
pub fn merge_metadata<S, F>(store: &S, id: i64, mut merge: F) -> Result<Conversation, StoreError>
where
    S: ConversationStore + ?Sized,
    F: FnMut(&mut ConversationMetadata),
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let mut conversation = store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
        merge(&mut conversation.metadata);
        match store.update_metadata(id, conversation.metadata_version, &conversation.metadata) {
            Ok(version) => {
                conversation.metadata_version = version;
                return Ok(conversation);
            }
            Err(StoreError::Conflict { .. }) if attempts < 2 => {
                tracing::debug!(conversation_id = id, "metadata conflict, retrying merge");
            }
            Err(e) => return Err(e),
        }
    }
}
