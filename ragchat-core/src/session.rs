//! In-memory chat session: the transcript of one browser connection and the
//! state machine of its current submission.
//!
//! A session is a plain value owned by whoever drives it. Every mutation goes
//! through a method that checks the current [`SubmissionState`], so a session
//! can be replayed and tested without any I/O.

use crate::error::SessionError;
use crate::types::{CompletionRequest, HistoryTurn, Role, Turn, TurnStatus};
use serde::{Deserialize, Serialize};

/// Where the current submission is in its lifecycle.
///
/// `Completed`, `Failed` and `Cancelled` are terminal outcomes reported by
/// [`ChatSession::complete`], [`ChatSession::fail`] and [`ChatSession::cancel`];
/// the session itself drops straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionState {
    Idle,
    Sending,
    Streaming,
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionState::Idle => write!(f, "idle"),
            SubmissionState::Sending => write!(f, "sending"),
            SubmissionState::Streaming => write!(f, "streaming"),
        }
    }
}

/// Ordered transcript plus submission state.
#[derive(Debug, Clone)]
pub struct ChatSession {
    turns: Vec<Turn>,
    state: SubmissionState,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            state: SubmissionState::Idle,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    /// True while a submission is sending or streaming.
    pub fn is_busy(&self) -> bool {
        self.state != SubmissionState::Idle
    }

    /// Prior turns as sent to the backend. Empty texts are left out.
    pub fn history(&self) -> Vec<HistoryTurn> {
        self.turns
            .iter()
            .filter(|t| !t.text.is_empty())
            .map(|t| HistoryTurn {
                role: t.role,
                text: t.text.clone(),
            })
            .collect()
    }

    /// Start a submission: snapshot the history, append the user turn, and
    /// move to `Sending`.
    pub fn begin_submission(
        &mut self,
        model: Option<String>,
        message: &str,
    ) -> Result<CompletionRequest, SessionError> {
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        if message.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let history = self.history();
        self.turns.push(Turn::user(message));
        self.state = SubmissionState::Sending;

        Ok(CompletionRequest {
            model: model.filter(|m| !m.trim().is_empty()),
            message: message.to_string(),
            history,
        })
    }

    /// The backend accepted the request: open an empty assistant turn.
    pub fn start_streaming(&mut self) -> Result<(), SessionError> {
        self.transition(SubmissionState::Sending, SubmissionState::Streaming)?;
        self.turns.push(Turn {
            role: Role::Assistant,
            text: String::new(),
            status: TurnStatus::Streaming,
        });
        Ok(())
    }

    /// Extend the streaming assistant turn. Returns the accumulated text.
    pub fn append_fragment(&mut self, fragment: &str) -> Result<&str, SessionError> {
        if self.state != SubmissionState::Streaming {
            return Err(self.invalid("streaming"));
        }
        let turn = self.streaming_turn_mut()?;
        turn.text.push_str(fragment);
        Ok(&turn.text)
    }

    /// Finish the assistant turn successfully. Returns its final text.
    pub fn complete(&mut self) -> Result<String, SessionError> {
        self.transition(SubmissionState::Streaming, SubmissionState::Idle)?;
        let turn = self.streaming_turn_mut()?;
        turn.status = TurnStatus::Complete;
        Ok(turn.text.clone())
    }

    /// Finish the submission with an error. Partial text is kept; if the
    /// stream never opened an empty assistant turn carries the marker.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<String, SessionError> {
        self.finish_with(TurnStatus::Failed {
            error: error.into(),
        })
    }

    /// Abandon the submission. Partial text is kept and marked cancelled.
    pub fn cancel(&mut self) -> Result<String, SessionError> {
        self.finish_with(TurnStatus::Cancelled)
    }

    /// Drop the transcript. Only allowed while idle.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        self.turns.clear();
        Ok(())
    }

    fn finish_with(&mut self, status: TurnStatus) -> Result<String, SessionError> {
        match self.state {
            SubmissionState::Idle => Err(self.invalid("idle")),
            SubmissionState::Sending => {
                self.turns.push(Turn {
                    role: Role::Assistant,
                    text: String::new(),
                    status,
                });
                self.state = SubmissionState::Idle;
                Ok(String::new())
            }
            SubmissionState::Streaming => {
                self.state = SubmissionState::Idle;
                let turn = self.streaming_turn_mut()?;
                turn.status = status;
                Ok(turn.text.clone())
            }
        }
    }

    fn transition(
        &mut self,
        from: SubmissionState,
        to: SubmissionState,
    ) -> Result<(), SessionError> {
        if self.state != from {
            return Err(SessionError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    fn invalid(&self, to: &str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    fn streaming_turn_mut(&mut self) -> Result<&mut Turn, SessionError> {
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => Ok(turn),
            _ => Err(SessionError::InvalidTransition {
                from: "no assistant turn".to_string(),
                to: "streaming".to_string(),
            }),
        }
    }
}
