//! Error types for the GlitchCube service.

/// Top-level error type for service startup and wiring.
///
/// Per-turn failures never surface here; the conversation pipeline uses
/// [`PipelineError`](crate::pipeline::error::PipelineError) and always
/// produces a spoken response.
#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Conversation store could not be opened or migrated.
    #[error("store error: {0}")]
    Store(String),

    /// Language model client setup error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Home Assistant client setup error.
    #[error("home assistant error: {0}")]
    HomeAssistant(String),

    /// HTTP server error (bind, serve).
    #[error("server error: {0}")]
    Server(String),

    /// Logging setup error.
    #[error("logging error: {0}")]
    Logging(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CubeError>;
