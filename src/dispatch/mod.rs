//! Out-of-band execution of tool intentions.
//!
//! - `queue`: [`ToolIntentDispatch`] command, [`IntentDispatcher`] trait and
//!   the bounded [`ChannelDispatcher`].
//! - `worker`: [`IntentWorker`], the queue consumer.

pub mod queue;
pub mod worker;

pub use queue::{
    ChannelDispatcher, DispatchError, IntentDispatcher, ToolIntentDispatch, build_instruction,
    channel,
};
pub use worker::IntentWorker;
