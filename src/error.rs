//! Typed errors for the fetch, generation, and chat boundaries.
//!
//! Orchestration and CLI layers use `anyhow`; these enums exist where the
//! failure class matters to a caller: upstream fetch failures carry the
//! HTTP status, generation failures abort only the in-flight turn, and
//! validation failures are rejected before any side effect.

use thiserror::Error;

/// Failure talking to the source hosting API.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The remote answered with a non-2xx status.
    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },

    /// Transport-level failure (DNS, TLS, timeout, connection reset).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Failure from the generation service.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generation API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered 2xx but produced no usable text.
    #[error("generation returned an empty response")]
    Empty,
}

/// Failure producing a chat response.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("message exceeds {limit} characters")]
    MessageTooLong { limit: usize },

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ChatError {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage
                | ChatError::MessageTooLong { .. }
                | ChatError::ConversationNotFound(_)
        )
    }
}
