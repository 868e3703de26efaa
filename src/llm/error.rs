//! Error types for the LLM client.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`LlmError::code()`].

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Authentication failed (invalid/missing API key).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// Request to the LLM provider failed in transport.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// Request timed out.
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";

    /// Provider returned a non-success status.
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";

    /// Provider answered but with no usable content.
    pub const EMPTY_RESPONSE: &str = "EMPTY_RESPONSE";

    /// Content could not be parsed as the requested structure.
    pub const INVALID_OUTPUT: &str = "INVALID_OUTPUT";
}

/// Errors produced by the LLM client.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    ConfigError(String),

    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    AuthError(String),

    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    RequestError(String),

    #[error("[{}] {}", error_codes::TIMEOUT_ERROR, .0)]
    TimeoutError(String),

    #[error("[{}] {}", error_codes::PROVIDER_ERROR, .0)]
    ProviderError(String),

    #[error("[{}] {}", error_codes::EMPTY_RESPONSE, .0)]
    EmptyResponse(String),

    #[error("[{}] {}", error_codes::INVALID_OUTPUT, .0)]
    InvalidOutput(String),
}

impl LlmError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => error_codes::CONFIG_INVALID,
            Self::AuthError(_) => error_codes::AUTH_FAILED,
            Self::RequestError(_) => error_codes::REQUEST_FAILED,
            Self::TimeoutError(_) => error_codes::TIMEOUT_ERROR,
            Self::ProviderError(_) => error_codes::PROVIDER_ERROR,
            Self::EmptyResponse(_) => error_codes::EMPTY_RESPONSE,
            Self::InvalidOutput(_) => error_codes::INVALID_OUTPUT,
        }
    }

    /// Whether a caller-side retry could succeed.
    ///
    /// The turn pipeline never retries. The intention worker retries a
    /// failed plan once when this holds.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConfigError(_) | Self::AuthError(_) => false,
            Self::RequestError(_) | Self::TimeoutError(_) | Self::ProviderError(_) => true,
            // Models are nondeterministic, a second sample may be usable.
            Self::EmptyResponse(_) | Self::InvalidOutput(_) => true,
        }
    }
}

/// Convenience alias for LLM results.
pub type Result<T> = std::result::Result<T, LlmError>;
