//! Core data types: chat turns, model descriptors, and the completion payload.

use crate::config::PayloadFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Lifecycle of a single turn. Failure and cancellation are markers on the
/// turn and never part of its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnStatus {
    Complete,
    Streaming,
    Failed { error: String },
    Cancelled,
}

/// One message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(flatten)]
    pub status: TurnStatus,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            status: TurnStatus::Complete,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            status: TurnStatus::Complete,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TurnStatus::Failed { .. })
    }
}

/// A turn as sent to the backend in the request history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub text: String,
}

/// The payload of one submission: selected model, new message, and prior turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub message: String,
    pub history: Vec<HistoryTurn>,
}

impl CompletionRequest {
    /// Serialise into the JSON body expected by the backend.
    pub fn to_payload(&self, format: PayloadFormat) -> Value {
        let mut body = match format {
            PayloadFormat::Structured => json!({
                "message": self.message,
                "history": self.history,
            }),
            PayloadFormat::Flat => json!({
                "question": self.message,
                "history": self.history.iter().map(|t| t.text.as_str()).collect::<Vec<_>>(),
            }),
        };
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }
        body
    }
}

/// A model offered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
}

impl ModelDescriptor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_type: None,
        }
    }

    /// Label shown in the selector: `type:name` when the source is known.
    pub fn label(&self) -> String {
        match &self.model_type {
            Some(kind) => format!("{kind}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// The models available from the backend, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<ModelDescriptor>,
    /// Name of the preselected model.
    pub default_model: Option<String>,
}

impl ModelCatalog {
    /// Build a catalog from plain names; the first one is the default.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let models: Vec<ModelDescriptor> = names.into_iter().map(ModelDescriptor::named).collect();
        let default_model = models.first().map(|m| m.name.clone());
        Self {
            models,
            default_model,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.iter().any(|m| m.name == name)
    }

    /// Selector options in catalog order.
    pub fn options(&self) -> Vec<ModelOption> {
        self.models
            .iter()
            .map(|m| ModelOption {
                value: m.name.clone(),
                label: m.label(),
            })
            .collect()
    }
}

/// One entry of the model selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    pub value: String,
    pub label: String,
}
