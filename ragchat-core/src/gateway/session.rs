//! Per-connection session loop.
//!
//! Each browser connection owns exactly one [`ChatSession`]. The loop reads
//! client messages from an inbox, runs submissions through the dispatcher,
//! and writes progress to an outbox. While a submission streams it keeps
//! listening, so cancel, resubmit, reset and disconnect take effect
//! immediately.

use super::events::{ClientMessage, ServerMessage};
use crate::backend::{fetch_model_listing, RagBackend};
use crate::dispatcher::{dispatch, DispatchCallback, DispatchOutcome};
use crate::error::SessionError;
use crate::session::{ChatSession, SubmissionState};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Forwards dispatcher progress to the connection's outbox.
///
/// Send failures mean the page is gone; the session loop notices that on
/// its inbox, so they are ignored here.
pub struct ChannelCallback {
    tx: mpsc::Sender<ServerMessage>,
}

impl ChannelCallback {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }

    async fn send(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg).await;
    }
}

#[async_trait::async_trait]
impl DispatchCallback for ChannelCallback {
    async fn on_user_turn(&self, text: &str) {
        self.send(ServerMessage::UserTurn {
            text: text.to_string(),
        })
        .await;
    }

    async fn on_state_change(&self, state: SubmissionState) {
        self.send(ServerMessage::State { state }).await;
    }

    async fn on_assistant_started(&self) {
        self.send(ServerMessage::AssistantStarted).await;
    }

    async fn on_fragment(&self, delta: &str, text: &str) {
        self.send(ServerMessage::AssistantDelta {
            delta: delta.to_string(),
            text: text.to_string(),
        })
        .await;
    }

    async fn on_finished(&self, outcome: &DispatchOutcome) {
        self.send(ServerMessage::from(outcome)).await;
    }
}

fn session_error_message(err: &SessionError) -> ServerMessage {
    let code = match err {
        SessionError::Busy => "BUSY",
        SessionError::EmptyMessage => "EMPTY_MESSAGE",
        SessionError::InvalidTransition { .. } => "INVALID_STATE",
    };
    ServerMessage::error(code, err.to_string())
}

async fn send_models(backend: &dyn RagBackend, outbox: &mpsc::Sender<ServerMessage>) {
    let listing = fetch_model_listing(backend).await;
    let _ = outbox.send(ServerMessage::from(&listing)).await;
}

/// Drive one connection until its inbox closes. Returns the final session.
pub async fn run_session(
    backend: Arc<dyn RagBackend>,
    mut inbox: mpsc::Receiver<ClientMessage>,
    outbox: mpsc::Sender<ServerMessage>,
) -> ChatSession {
    let mut session = ChatSession::new();
    let callback = ChannelCallback::new(outbox.clone());
    let mut queued: VecDeque<ClientMessage> = VecDeque::new();
    let mut closed = false;

    send_models(backend.as_ref(), &outbox).await;
    let _ = outbox
        .send(ServerMessage::State {
            state: session.state(),
        })
        .await;

    loop {
        let msg = match queued.pop_front() {
            Some(msg) => msg,
            None if closed => break,
            None => match inbox.recv().await {
                Some(msg) => msg,
                None => break,
            },
        };

        match msg {
            ClientMessage::Submit { model, message } => {
                let cancel = CancellationToken::new();
                let result = {
                    let run = dispatch(
                        &mut session,
                        backend.as_ref(),
                        model,
                        &message,
                        &cancel,
                        &callback,
                    );
                    tokio::pin!(run);
                    loop {
                        tokio::select! {
                            result = &mut run => break result,
                            incoming = inbox.recv(), if !closed => match incoming {
                                None => {
                                    debug!("Connection closed mid-stream; abandoning read");
                                    closed = true;
                                    cancel.cancel();
                                }
                                Some(ClientMessage::Cancel) => cancel.cancel(),
                                Some(ClientMessage::Ping { timestamp }) => {
                                    let _ = outbox.send(ServerMessage::Pong { timestamp }).await;
                                }
                                Some(other) => {
                                    if matches!(
                                        other,
                                        ClientMessage::Submit { .. } | ClientMessage::Reset
                                    ) {
                                        cancel.cancel();
                                    }
                                    queued.push_back(other);
                                }
                            },
                        }
                    }
                };
                if let Err(e) = result {
                    let _ = outbox.send(session_error_message(&e)).await;
                }
            }
            ClientMessage::Cancel => {
                debug!("Cancel received while idle");
            }
            ClientMessage::Reset => match session.reset() {
                Ok(()) => {
                    info!("Session reset");
                    let _ = outbox
                        .send(ServerMessage::Transcript {
                            turns: session.turns().to_vec(),
                        })
                        .await;
                }
                Err(e) => {
                    let _ = outbox.send(session_error_message(&e)).await;
                }
            },
            ClientMessage::RefreshModels => send_models(backend.as_ref(), &outbox).await,
            ClientMessage::Ping { timestamp } => {
                let _ = outbox.send(ServerMessage::Pong { timestamp }).await;
            }
        }
    }

    debug!(turns = session.turns().len(), "Session ended");
    session
}
