//! # RagChat Core
//!
//! Streaming chat front end for an external RAG backend.
//! Provides the backend client, chat session state, query dispatcher,
//! configuration, and the WebSocket gateway that serves the chat page.

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod session;
pub mod types;

// Re-export commonly used types at the crate root.
pub use backend::{fetch_model_listing, HttpBackend, MockBackend, ModelListing, RagBackend};
pub use config::{BackendConfig, RagChatConfig, ServerConfig};
pub use dispatcher::{dispatch, DispatchCallback, DispatchOutcome, NoOpCallback};
pub use error::{BackendError, ConfigError, RagChatError, Result, SessionError};
pub use session::{ChatSession, SubmissionState};
pub use types::{CompletionRequest, ModelCatalog, Role, Turn, TurnStatus};
