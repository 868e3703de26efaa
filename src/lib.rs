//! GlitchCube: conversation backend for an interactive art installation.
//!
//! A voice front-end (Home Assistant) posts each utterance; the service
//! answers with what the cube should say and queues any physical effects.
//!
//! # Architecture
//!
//! Each turn runs through a fixed sequence of stages:
//! - **Setup**: find or create the conversation, resolving staleness
//! - **Intention**: one structured LLM call decides speech and tools
//! - **Actions**: direct tool calls and memory searches run now; tool
//!   intentions go to a background worker
//! - **Synthesis**: speech text, with query results deferred to the next turn
//! - **Finalize**: log the turn and format the voice-assistant response

pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod hass;
pub mod llm;
pub mod logging;
pub mod persona;
pub mod pipeline;
pub mod server;
pub mod tools;

pub use config::CubeConfig;
pub use error::{CubeError, Result};
pub use pipeline::{PipelineDeps, TurnOutcome, TurnPipeline, TurnRequest};
pub use server::CubeServer;
