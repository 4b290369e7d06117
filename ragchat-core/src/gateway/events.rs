//! Gateway message protocol between the chat page and the server.

use crate::backend::ModelListing;
use crate::dispatcher::DispatchOutcome;
use crate::session::SubmissionState;
use crate::types::{ModelOption, Turn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages sent from the browser to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Send a question with the selected model.
    Submit {
        #[serde(default)]
        model: Option<String>,
        message: String,
    },
    /// Abandon the in-flight answer.
    Cancel,
    /// Clear the transcript.
    Reset,
    /// Fetch the model list again.
    RefreshModels,
    /// Keep-alive ping.
    Ping { timestamp: DateTime<Utc> },
}

/// Messages sent from the gateway to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Models to offer in the selector.
    Models {
        options: Vec<ModelOption>,
        selected: Option<String>,
    },
    /// The model list could not be loaded.
    ModelsUnavailable { reason: String },
    /// Full transcript, sent after a reset.
    Transcript { turns: Vec<Turn> },
    /// The user's message was appended.
    UserTurn { text: String },
    /// The submission changed state; the page disables input unless idle.
    State { state: SubmissionState },
    /// The assistant turn was opened.
    AssistantStarted,
    /// A fragment arrived; `text` is the assistant turn so far.
    AssistantDelta { delta: String, text: String },
    AssistantCompleted { text: String },
    AssistantFailed { text: String, error: String },
    AssistantCancelled { text: String },
    /// A request could not be handled.
    Error { code: String, message: String },
    /// Response to a ping.
    Pong { timestamp: DateTime<Utc> },
}

impl From<&ModelListing> for ServerMessage {
    fn from(listing: &ModelListing) -> Self {
        match listing {
            ModelListing::Available(_) => ServerMessage::Models {
                options: listing.options(),
                selected: listing.default_model().map(str::to_string),
            },
            ModelListing::Unavailable { reason } => ServerMessage::ModelsUnavailable {
                reason: reason.clone(),
            },
        }
    }
}

impl From<&DispatchOutcome> for ServerMessage {
    fn from(outcome: &DispatchOutcome) -> Self {
        match outcome.clone() {
            DispatchOutcome::Completed { text } => ServerMessage::AssistantCompleted { text },
            DispatchOutcome::Failed { text, error } => {
                ServerMessage::AssistantFailed { text, error }
            }
            DispatchOutcome::Cancelled { text } => ServerMessage::AssistantCancelled { text },
        }
    }
}

impl ServerMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
