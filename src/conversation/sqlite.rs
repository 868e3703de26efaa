//! SQLite-backed conversation and memory store.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{apply_schema, read_schema_version};
use super::store::{ConversationStore, MemoryStore, StoreError};
use super::types::{
    Conversation, ConversationLogEntry, ConversationMetadata, MemoryHit, MemoryKind, MemoryRecord,
    MemoryScope, NewConversation, NewLogEntry, SCORE_SUMMARY_BONUS, SummaryRecord, now_epoch_secs,
    score_text, tokenize, truncate_turn_text,
};

const CONVERSATION_COLUMNS: &str = "id, session_id, persona, started_at, ended_at, end_reason, \
     metadata, metadata_version, message_count";

const LOG_COLUMNS: &str =
    "id, session_id, user_message, ai_response, tool_results, metadata, created_at";

/// SQLite store for conversations, turn logs, memories and summaries.
///
/// Thread-safe via an internal `Mutex<Connection>`; all access is serialized.
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`, creating parent directories.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(db_path)?;
        apply_schema(&conn)?;
        tracing::info!(path = %db_path.display(), "conversation store opened");
        Ok(Self {
            path: Some(db_path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the schema version.
    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Append a turn with an explicit timestamp.
    pub fn append_log_at(
        &self,
        entry: &NewLogEntry,
        created_at: u64,
    ) -> Result<ConversationLogEntry, StoreError> {
        let tool_results = serde_json::to_string(&entry.tool_results)?;
        let metadata = serde_json::to_string(&entry.metadata)?;
        let user_message = truncate_turn_text(&entry.user_message);
        let ai_response = truncate_turn_text(&entry.ai_response);

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO conversation_logs \
             (session_id, user_message, ai_response, tool_results, metadata, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.session_id,
                user_message,
                ai_response,
                tool_results,
                metadata,
                created_at
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE conversations SET message_count = message_count + 1 WHERE session_id = ?1",
            params![entry.session_id],
        )?;
        tx.commit()?;

        Ok(ConversationLogEntry {
            id,
            session_id: entry.session_id.clone(),
            user_message,
            ai_response,
            tool_results: entry.tool_results.clone(),
            metadata: entry.metadata.clone(),
            created_at,
        })
    }

    /// All memories of one kind, newest first.
    pub fn list_memories(&self, kind: MemoryKind) -> Result<Vec<MemoryRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, content, tags, created_at FROM memories \
             WHERE kind = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![kind.as_str()], row_to_memory)?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }

    /// All summaries, newest first.
    pub fn list_summaries(&self) -> Result<Vec<SummaryRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, summary, created_at FROM summaries \
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], row_to_summary)?;

        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn select_conversation(
        conn: &Connection,
        clause: &str,
        param: &dyn rusqlite::ToSql,
    ) -> Result<Option<Conversation>, StoreError> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE {clause}");
        Ok(conn
            .query_row(&sql, &[param], row_to_conversation)
            .optional()?)
    }
}

impl ConversationStore for SqliteStore {
    fn find_by_session(&self, session_id: &str) -> Result<Option<Conversation>, StoreError> {
        let conn = self.lock()?;
        Self::select_conversation(&conn, "session_id = ?1", &session_id)
    }

    fn latest_with_prefix(&self, prefix: &str) -> Result<Option<Conversation>, StoreError> {
        // substr rather than LIKE: session ids contain `_`.
        let conn = self.lock()?;
        Self::select_conversation(
            &conn,
            "substr(session_id, 1, length(?1)) = ?1 ORDER BY id DESC LIMIT 1",
            &prefix,
        )
    }

    fn get(&self, id: i64) -> Result<Option<Conversation>, StoreError> {
        let conn = self.lock()?;
        Self::select_conversation(&conn, "id = ?1", &id)
    }

    fn create(&self, new: &NewConversation) -> Result<Conversation, StoreError> {
        let metadata = serde_json::to_string(&new.metadata)?;
        let now = now_epoch_secs();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conversations (session_id, persona, started_at, metadata) \
             VALUES (?1, ?2, ?3, ?4)",
            params![new.session_id, new.persona, now, metadata],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::DuplicateSession(new.session_id.clone())
            }
            other => StoreError::from(other),
        })?;
        let id = conn.last_insert_rowid();
        Self::select_conversation(&conn, "id = ?1", &id)?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))
    }

    fn end(&self, id: i64, reason: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE conversations SET ended_at = ?1, end_reason = ?2 \
             WHERE id = ?3 AND ended_at IS NULL",
            params![now_epoch_secs(), reason, id],
        )?;
        if rows == 0 {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT id FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
        }
        Ok(rows > 0)
    }

    fn set_persona(&self, id: i64, persona: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE conversations SET persona = ?1 WHERE id = ?2",
            params![persona, id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("conversation {id}")));
        }
        Ok(())
    }

    fn update_metadata(
        &self,
        id: i64,
        expected_version: i64,
        metadata: &ConversationMetadata,
    ) -> Result<i64, StoreError> {
        let json = serde_json::to_string(metadata)?;
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE conversations SET metadata = ?1, metadata_version = metadata_version + 1 \
             WHERE id = ?2 AND metadata_version = ?3",
            params![json, id, expected_version],
        )?;
        if rows == 1 {
            return Ok(expected_version + 1);
        }

        let current: Option<i64> = conn
            .query_row(
                "SELECT metadata_version FROM conversations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            Some(_) => Err(StoreError::Conflict {
                id,
                expected: expected_version,
            }),
            None => Err(StoreError::NotFound(format!("conversation {id}"))),
        }
    }

    fn append_log(&self, entry: &NewLogEntry) -> Result<ConversationLogEntry, StoreError> {
        self.append_log_at(entry, now_epoch_secs())
    }

    fn last_log_at(&self, session_id: &str) -> Result<Option<u64>, StoreError> {
        let conn = self.lock()?;
        let latest: Option<u64> = conn.query_row(
            "SELECT MAX(created_at) FROM conversation_logs WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(latest)
    }

    fn recent_logs(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationLogEntry>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM conversation_logs WHERE session_id = ?1 \
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![session_id, limit], row_to_log)?;

        let mut entries = Vec::new();
        for r in rows {
            entries.push(r?);
        }
        entries.reverse();
        Ok(entries)
    }
}

impl MemoryStore for SqliteStore {
    fn insert_memory(
        &self,
        kind: MemoryKind,
        content: &str,
        tags: &[String],
    ) -> Result<i64, StoreError> {
        let tags_json = serde_json::to_string(tags)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO memories (kind, content, tags, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), content, tags_json, now_epoch_secs()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn insert_summary(&self, session_id: &str, summary: &str) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO summaries (session_id, summary, created_at) VALUES (?1, ?2, ?3)",
            params![session_id, summary, now_epoch_secs()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn search_memories(
        &self,
        query: &str,
        scope: MemoryScope,
        limit: usize,
    ) -> Result<Vec<MemoryHit>, StoreError> {
        let query_tokens = tokenize(query);
        let mut hits = Vec::new();

        for kind in scope.memory_kinds() {
            for record in self.list_memories(*kind)? {
                let searchable = format!("{} {}", record.content, record.tags.join(" "));
                let score = score_text(&searchable, record.created_at, &query_tokens);
                if score > 0.0 {
                    hits.push(MemoryHit {
                        source: kind.as_str().to_owned(),
                        text: record.content,
                        score,
                        created_at: record.created_at,
                    });
                }
            }
        }

        if scope.includes_summaries() {
            for summary in self.list_summaries()? {
                let score = score_text(&summary.summary, summary.created_at, &query_tokens);
                if score > 0.0 {
                    hits.push(MemoryHit {
                        source: "summary".to_owned(),
                        text: summary.summary,
                        score: score + SCORE_SUMMARY_BONUS,
                        created_at: summary.created_at,
                    });
                }
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let metadata_json: String = row.get(6)?;
    let metadata = serde_json::from_str(&metadata_json).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "unreadable conversation metadata, using empty");
        ConversationMetadata::default()
    });
    Ok(Conversation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        persona: row.get(2)?,
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        end_reason: row.get(5)?,
        metadata,
        metadata_version: row.get(7)?,
        message_count: row.get(8)?,
    })
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationLogEntry> {
    let tool_results: String = row.get(4)?;
    let metadata: String = row.get(5)?;
    Ok(ConversationLogEntry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_message: row.get(2)?,
        ai_response: row.get(3)?,
        tool_results: serde_json::from_str(&tool_results)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new())),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get(6)?,
    })
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let kind: String = row.get(1)?;
    let tags: String = row.get(3)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        kind: MemoryKind::parse(&kind).unwrap_or(MemoryKind::Fact),
        content: row.get(2)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        created_at: row.get(4)?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<SummaryRecord> {
    Ok(SummaryRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        summary: row.get(2)?,
        created_at: row.get(3)?,
    })
}
