//! Query dispatcher: runs one submission from user turn to final assistant
//! turn.
//!
//! The dispatcher drives `idle → sending → streaming → {completed | failed |
//! cancelled} → idle` on a [`ChatSession`], reporting every step to a
//! [`DispatchCallback`]. The stream read is the only suspension point and
//! is abandoned as soon as the cancellation token fires.

use crate::backend::RagBackend;
use crate::error::SessionError;
use crate::session::{ChatSession, SubmissionState};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a submission ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed { text: String },
    Failed { text: String, error: String },
    Cancelled { text: String },
}

impl DispatchOutcome {
    /// Assistant text at the end of the submission.
    pub fn text(&self) -> &str {
        match self {
            DispatchOutcome::Completed { text }
            | DispatchOutcome::Failed { text, .. }
            | DispatchOutcome::Cancelled { text } => text,
        }
    }
}

/// Receives the progress of a submission, in order.
#[async_trait::async_trait]
pub trait DispatchCallback: Send + Sync {
    /// The user turn was appended to the transcript.
    async fn on_user_turn(&self, text: &str);

    /// The submission moved to a new state.
    async fn on_state_change(&self, state: SubmissionState);

    /// The backend accepted the request and the assistant turn was opened.
    async fn on_assistant_started(&self) {}

    /// A fragment arrived; `text` is the assistant turn so far.
    async fn on_fragment(&self, delta: &str, text: &str);

    /// The submission ended.
    async fn on_finished(&self, outcome: &DispatchOutcome);
}

/// A callback that ignores everything.
pub struct NoOpCallback;

#[async_trait::async_trait]
impl DispatchCallback for NoOpCallback {
    async fn on_user_turn(&self, _text: &str) {}
    async fn on_state_change(&self, _state: SubmissionState) {}
    async fn on_fragment(&self, _delta: &str, _text: &str) {}
    async fn on_finished(&self, _outcome: &DispatchOutcome) {}
}

/// Run one submission against `backend`.
///
/// Returns `Err` only when the submission could not start (busy session or
/// empty message); backend failures are reported as
/// [`DispatchOutcome::Failed`] and leave the session idle and usable.
pub async fn dispatch(
    session: &mut ChatSession,
    backend: &dyn RagBackend,
    model: Option<String>,
    message: &str,
    cancel: &CancellationToken,
    callback: &dyn DispatchCallback,
) -> Result<DispatchOutcome, SessionError> {
    let request = session.begin_submission(model, message)?;
    info!(
        model = request.model.as_deref().unwrap_or("<backend default>"),
        history = request.history.len(),
        "Dispatching query"
    );
    callback.on_user_turn(&request.message).await;
    callback.on_state_change(SubmissionState::Sending).await;

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = backend.stream_completion(request) => Some(result),
    };

    let outcome = match opened {
        None => DispatchOutcome::Cancelled {
            text: session.cancel()?,
        },
        Some(Err(e)) => {
            warn!(error = %e, "Backend rejected completion request");
            let error = e.to_string();
            DispatchOutcome::Failed {
                text: session.fail(error.clone())?,
                error,
            }
        }
        Some(Ok(mut stream)) => {
            session.start_streaming()?;
            callback.on_assistant_started().await;
            callback.on_state_change(SubmissionState::Streaming).await;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break DispatchOutcome::Cancelled {
                        text: session.cancel()?,
                    },
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(fragment)) => {
                        let text = session.append_fragment(&fragment)?.to_string();
                        callback.on_fragment(&fragment, &text).await;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Completion stream failed");
                        let error = e.to_string();
                        break DispatchOutcome::Failed {
                            text: session.fail(error.clone())?,
                            error,
                        };
                    }
                    None => {
                        break DispatchOutcome::Completed {
                            text: session.complete()?,
                        };
                    }
                }
            }
        }
    };

    debug!(outcome = ?outcome, "Submission finished");
    callback.on_finished(&outcome).await;
    callback.on_state_change(session.state()).await;
    Ok(outcome)
}
