//! Conversation persistence.
//!
//! Sub-modules:
//! - `types`: data model (conversations, turn logs, memories) and helpers.
//! - `schema`: SQLite DDL.
//! - `store`: [`ConversationStore`] / [`MemoryStore`] traits and [`StoreError`].
//! - `sqlite`: [`SqliteStore`], the production backend.
//! - `history`: [`PromptBuilder`], system prompt and turn history for the model.

pub mod history;
pub(crate) mod schema;
pub mod sqlite;
pub mod store;
pub mod types;

pub use history::{PromptBuilder, PromptData};
pub use sqlite::SqliteStore;
pub use store::{ConversationStore, MemoryStore, StoreError, merge_metadata};
pub use types::{
    Conversation, ConversationLogEntry, ConversationMetadata, MemoryKind, MemoryScope,
    NewConversation, NewLogEntry, PendingQueryResults, ToolIntention, TurnMetadata,
};
