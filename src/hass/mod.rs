//! Home Assistant integration: REST client and service tools.

pub mod client;
pub mod tools;

pub use client::{HassClient, HassError};
pub use tools::{GET_STATE_TOOL, HassServiceTool, HassStateTool, register_hass_tools};
