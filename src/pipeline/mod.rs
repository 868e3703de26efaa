//! The conversation turn pipeline.
//!
//! Stages, in order:
//! - `setup`: [`SessionResolver`] finds or creates the conversation.
//! - `intention`: [`IntentionRequester`] asks the model what to say and do.
//! - `actions`: [`ActionExecutor`] runs direct calls and memory searches,
//!   and delegates tool intentions.
//! - `synthesis`: [`ResponseSynthesizer`] builds the speech and defers query results.
//! - `finalizer`: [`Finalizer`] logs the turn and formats the response.
//!
//! [`TurnPipeline`] in `orchestrator` drives them.

pub mod actions;
pub mod error;
pub mod finalizer;
pub mod intention;
pub mod orchestrator;
pub mod setup;
pub mod synthesis;
pub mod types;

pub use actions::ActionExecutor;
pub use error::{PipelineError, Stage};
pub use finalizer::{FinalizeInput, Finalizer};
pub use intention::IntentionRequester;
pub use orchestrator::{PipelineDeps, TurnOutcome, TurnPipeline};
pub use setup::SessionResolver;
pub use synthesis::ResponseSynthesizer;
pub use types::{
    ActionResults, HassResponse, IntentionResponse, ResponseType, SessionContext,
    SynthesizedResponse, TurnRequest,
};
