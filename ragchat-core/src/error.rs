//! Error types for the RAG chat core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering configuration, backend I/O, and chat session state.

use std::path::PathBuf;

/// Top-level error type for the ragchat core library.
#[derive(Debug, thiserror::Error)]
pub enum RagChatError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the configuration system. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from talking to the RAG backend.
///
/// None of these are fatal: model listing degrades to an empty selector and
/// completion failures are attached to the assistant turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Backend connection failed: {message}")]
    Connection { message: String },

    #[error("Backend returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Malformed backend response: {message}")]
    MalformedResponse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Backend request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl BackendError {
    /// Map a reqwest failure, distinguishing timeouts from other transport errors.
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_secs: Option<u64>) -> Self {
        if err.is_timeout() {
            return BackendError::Timeout {
                timeout_secs: timeout_secs.unwrap_or_default(),
            };
        }
        if err.is_decode() || err.is_body() {
            return BackendError::Streaming {
                message: err.to_string(),
            };
        }
        BackendError::Connection {
            message: err.to_string(),
        }
    }
}

/// Errors from the chat session state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("A submission is already in progress")]
    Busy,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// A type alias for results using the top-level `RagChatError`.
pub type Result<T> = std::result::Result<T, RagChatError>;
