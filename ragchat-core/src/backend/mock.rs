//! Scripted in-memory backend for tests and offline runs.

use super::stream::{from_fragments, FragmentStream};
use super::RagBackend;
use crate::error::BackendError;
use crate::types::{CompletionRequest, ModelCatalog};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted completion reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Emit the fragments, then complete.
    Fragments(Vec<String>),
    /// Emit the fragments, then fail mid-stream.
    FailAfter {
        fragments: Vec<String>,
        error: BackendError,
    },
    /// Refuse the request before any stream opens.
    Reject(BackendError),
    /// Emit the fragments, then never finish.
    Stall(Vec<String>),
}

impl MockReply {
    pub fn text<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockReply::Fragments(fragments.into_iter().map(Into::into).collect())
    }
}

/// A [`RagBackend`] that replays queued replies and records every request.
///
/// When the reply queue is empty each completion echoes the message back.
pub struct MockBackend {
    models: Mutex<Result<ModelCatalog, BackendError>>,
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            models: Mutex::new(Ok(ModelCatalog::from_names(["mock-model"]))),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A mock offering the given model names.
    pub fn with_models<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        backend.set_models(Ok(ModelCatalog::from_names(names)));
        backend
    }

    /// Make `list_models` fail.
    pub fn with_model_error(self, error: BackendError) -> Self {
        self.set_models(Err(error));
        self
    }

    pub fn set_models(&self, models: Result<ModelCatalog, BackendError>) {
        *self.models.lock().unwrap() = models;
    }

    /// Queue a reply for the next completion.
    pub fn queue_reply(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RagBackend for MockBackend {
    async fn list_models(&self) -> Result<ModelCatalog, BackendError> {
        self.models.lock().unwrap().clone()
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<FragmentStream, BackendError> {
        let echo = request.message.clone();
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockReply::Fragments(vec![echo]));

        match reply {
            MockReply::Fragments(fragments) => {
                let items: Vec<_> = fragments
                    .into_iter()
                    .map(Ok::<String, BackendError>)
                    .collect();
                Ok(from_fragments(items))
            }
            MockReply::FailAfter { fragments, error } => {
                let items: Vec<_> = fragments
                    .into_iter()
                    .map(Ok::<String, BackendError>)
                    .chain(std::iter::once(Err(error)))
                    .collect();
                Ok(from_fragments(items))
            }
            MockReply::Reject(error) => Err(error),
            MockReply::Stall(fragments) => {
                let head = stream::iter(fragments.into_iter().map(Ok::<String, BackendError>));
                Ok(head.chain(stream::pending()).boxed())
            }
        }
    }

    fn describe(&self) -> String {
        "mock://backend".to_string()
    }
}
