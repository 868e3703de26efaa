//! Tools the model can call.
//!
//! - `types`: [`Tool`] trait, [`ToolIntent`], [`ToolCallResult`].
//! - `registry`: [`ToolRegistry`] lookup, classification and bounded invoke.
//! - `memory_search`: the `search_memories` query tool.
//!
//! Home Assistant service tools live in [`crate::hass::tools`].

pub mod memory_search;
pub mod registry;
pub mod types;

pub use memory_search::{MEMORY_SEARCH_TOOL, MemorySearchTool};
pub use registry::ToolRegistry;
pub use types::{DirectToolCall, Tool, ToolCallResult, ToolError, ToolIntent, ToolOutput};
