//! Data model for conversations, turn logs, and memories.
//!
//! Everything in this module is backend-agnostic. Timestamps are stored as
//! Unix epoch seconds; metadata blobs are serialized JSON that must stay
//! readable when older rows lack newer keys, so every optional field carries
//! `#[serde(default)]`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Schema / limits
// ---------------------------------------------------------------------------

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Version stamp written into [`PendingQueryResults`].
pub const PENDING_QUERY_RESULTS_VERSION: u32 = 1;

/// Maximum stored length (in bytes) of a single utterance or response.
pub(crate) const MAX_TURN_TEXT_LEN: usize = 16_384;
pub(crate) const TRUNCATION_SUFFIX: &str = " [truncated]";

// Search scoring weights.
pub(crate) const SCORE_FRESHNESS_WEIGHT: f32 = 0.10;
pub(crate) const SCORE_SUMMARY_BONUS: f32 = 0.02;
pub(crate) const SECS_PER_DAY: f32 = 86_400.0;

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// One logical dialogue session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Row id.
    pub id: i64,
    /// Client-supplied session key. Unique across the table.
    pub session_id: String,
    /// Persona the conversation is spoken in.
    pub persona: Option<String>,
    pub started_at: u64,
    /// `None` while active.
    pub ended_at: Option<u64>,
    pub end_reason: Option<String>,
    pub metadata: ConversationMetadata,
    /// Bumped on every metadata write; used for optimistic updates.
    pub metadata_version: i64,
    /// Number of logged turns.
    pub message_count: u32,
}

impl Conversation {
    /// Whether turns may still be appended.
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Typed view over the conversation metadata blob.
///
/// Each known key has a single producer: the session resolver owns
/// `agent_id`, `device_id` and `source`; the response synthesizer owns
/// `pending_query_results`. Unknown keys written by other producers are
/// preserved through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Query results computed in one turn and surfaced in the next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_query_results: Option<PendingQueryResults>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Deferred query results awaiting the next turn's system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQueryResults {
    #[serde(default = "pending_version")]
    pub version: u32,
    /// One line per tool: `"<tool>: <message-or-data-or-error>"`.
    pub results_summary: String,
    pub tool_count: usize,
    /// RFC 3339 timestamp.
    pub stored_at: String,
}

fn pending_version() -> u32 {
    PENDING_QUERY_RESULTS_VERSION
}

/// Parameters for creating a conversation.
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub session_id: String,
    pub persona: Option<String>,
    pub metadata: ConversationMetadata,
}

// ---------------------------------------------------------------------------
// Turn log
// ---------------------------------------------------------------------------

/// A natural-language request for an environmental effect, executed out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolIntention {
    /// Target tool name.
    pub tool: String,
    /// What the model wants the tool to achieve.
    pub intent: String,
}

/// Narrative and bookkeeping fields stored with each turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetadata {
    #[serde(default)]
    pub continue_conversation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_thoughts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressing_questions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_progress: Option<String>,
    #[serde(default)]
    pub sync_tools: Vec<String>,
    #[serde(default)]
    pub async_tools: Vec<String>,
    #[serde(default)]
    pub query_tools: Vec<String>,
    #[serde(default)]
    pub action_tools: Vec<String>,
    #[serde(default)]
    pub tool_intents: Vec<ToolIntention>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One persisted turn. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationLogEntry {
    pub id: i64,
    pub session_id: String,
    pub user_message: String,
    pub ai_response: String,
    /// Serialized `sync_results` map.
    pub tool_results: serde_json::Value,
    pub metadata: TurnMetadata,
    pub created_at: u64,
}

/// Parameters for appending a turn.
#[derive(Debug, Clone, Default)]
pub struct NewLogEntry {
    pub session_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub tool_results: serde_json::Value,
    pub metadata: TurnMetadata,
}

// ---------------------------------------------------------------------------
// Memories
// ---------------------------------------------------------------------------

/// Category of a stored memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Something that happened at or near the installation.
    Event,
    /// Someone the cube has met.
    Person,
    /// A general fact worth remembering.
    Fact,
}

impl MemoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Person => "person",
            Self::Fact => "fact",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "event" => Some(Self::Event),
            "person" => Some(Self::Person),
            "fact" => Some(Self::Fact),
            _ => None,
        }
    }
}

/// A stored memory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub kind: MemoryKind,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: u64,
}

/// A stored conversation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: i64,
    pub session_id: String,
    pub summary: String,
    pub created_at: u64,
}

/// Which memories a search covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    #[default]
    All,
    Summaries,
    Events,
    People,
}

impl MemoryScope {
    /// Parse the wire name, defaulting unknown values to `All`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "summaries" => Self::Summaries,
            "events" => Self::Events,
            "people" => Self::People,
            _ => Self::All,
        }
    }

    pub(crate) fn includes_summaries(self) -> bool {
        matches!(self, Self::All | Self::Summaries)
    }

    pub(crate) fn memory_kinds(self) -> &'static [MemoryKind] {
        match self {
            Self::All => &[MemoryKind::Event, MemoryKind::Person, MemoryKind::Fact],
            Self::Summaries => &[],
            Self::Events => &[MemoryKind::Event],
            Self::People => &[MemoryKind::Person],
        }
    }
}

/// A scored search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    /// `"summary"` or the memory kind.
    pub source: String,
    pub text: String,
    pub score: f32,
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub(crate) fn truncate_turn_text(text: &str) -> String {
    if text.len() <= MAX_TURN_TEXT_LEN {
        return text.to_owned();
    }
    let mut end = MAX_TURN_TEXT_LEN;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATION_SUFFIX}", &text[..end])
}

/// Lowercase alphanumeric tokens longer than one character.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '\'' || ch == '-' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            if current.chars().count() > 1 {
                tokens.push(current.clone());
            }
            current.clear();
        }
    }
    if current.chars().count() > 1 {
        tokens.push(current);
    }

    tokens
}

/// Token-overlap score with a small freshness bonus. Zero means no match.
pub(crate) fn score_text(text: &str, created_at: u64, query_tokens: &[String]) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let text_tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let overlap = query_tokens
        .iter()
        .filter(|t| text_tokens.contains(*t))
        .count();
    if overlap == 0 {
        return 0.0;
    }

    let mut score = overlap as f32 / query_tokens.len() as f32;
    let now = now_epoch_secs();
    if created_at > 0 && created_at <= now {
        let age_days = (now - created_at) as f32 / SECS_PER_DAY;
        score += SCORE_FRESHNESS_WEIGHT / (1.0 + age_days);
    }
    score
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn metadata_reads_rows_without_newer_keys() {
        let meta: ConversationMetadata = serde_json::from_str(r#"{"device_id":"cube-1"}"#).unwrap();
        assert_eq!(meta.device_id.as_deref(), Some("cube-1"));
        assert!(meta.pending_query_results.is_none());
        assert!(meta.extra.is_empty());
    }

    #[test]
    fn metadata_preserves_unknown_keys() {
        let raw = r#"{"source":"hass","goal":{"id":"g1"}}"#;
        let meta: ConversationMetadata = serde_json::from_str(raw).unwrap();
        assert_eq!(meta.source.as_deref(), Some("hass"));
        assert!(meta.extra.contains_key("goal"));

        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["goal"]["id"], "g1");
        assert!(back.get("agent_id").is_none());
    }

    #[test]
    fn pending_results_default_version() {
        let raw = r#"{"results_summary":"x: y","tool_count":1,"stored_at":"2025-01-01T00:00:00Z"}"#;
        let pending: PendingQueryResults = serde_json::from_str(raw).unwrap();
        assert_eq!(pending.version, PENDING_QUERY_RESULTS_VERSION);
    }

    #[test]
    fn turn_metadata_tolerates_empty_object() {
        let meta: TurnMetadata = serde_json::from_str("{}").unwrap();
        assert!(!meta.continue_conversation);
        assert!(meta.sync_tools.is_empty());
    }

    #[test]
    fn scope_parsing_is_lenient() {
        assert_eq!(MemoryScope::parse_lenient("People"), MemoryScope::People);
        assert_eq!(MemoryScope::parse_lenient("events"), MemoryScope::Events);
        assert_eq!(MemoryScope::parse_lenient("whatever"), MemoryScope::All);
        assert!(MemoryScope::Summaries.memory_kinds().is_empty());
        assert!(!MemoryScope::People.includes_summaries());
    }

    #[test]
    fn tokenize_drops_single_chars_and_punctuation() {
        assert_eq!(
            tokenize("I saw a Fire-Dancer, twice!"),
            vec!["saw", "fire-dancer", "twice"]
        );
    }

    #[test]
    fn score_is_zero_without_overlap() {
        let tokens = tokenize("unicorn");
        assert_eq!(score_text("the man burned", now_epoch_secs(), &tokens), 0.0);
        assert!(score_text("a unicorn walked by", now_epoch_secs(), &tokens) > 0.9);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_TURN_TEXT_LEN);
        let out = truncate_turn_text(&long);
        assert!(out.ends_with(TRUNCATION_SUFFIX));
        assert!(out.len() <= MAX_TURN_TEXT_LEN + TRUNCATION_SUFFIX.len());
    }
}
