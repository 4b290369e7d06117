//! # RAG Backend Client
//!
//! The external backend owns retrieval and inference; this module only lists
//! its models and streams its answers. [`RagBackend`] is the seam: the HTTP
//! implementation talks to a real server, [`MockBackend`] replays scripted
//! replies for tests and local development.

mod http;
mod mock;
pub mod models;
pub mod stream;

pub use http::HttpBackend;
pub use mock::{MockBackend, MockReply};
pub use models::{parse_model_list, ModelListing};
pub use stream::FragmentStream;

use crate::error::BackendError;
use crate::types::{CompletionRequest, ModelCatalog};
use async_trait::async_trait;
use tracing::{info, warn};

/// A backend that can list models and stream completions.
#[async_trait]
pub trait RagBackend: Send + Sync {
    /// Fetch the models the backend offers.
    async fn list_models(&self) -> Result<ModelCatalog, BackendError>;

    /// Open a streamed completion.
    ///
    /// An `Err` means the request never produced a stream (connection
    /// refused, non-2xx status). Errors after that arrive as the final item
    /// of the returned stream.
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<FragmentStream, BackendError>;

    /// Human-readable backend location for logs and health output.
    fn describe(&self) -> String;
}

/// List models, degrading every failure to [`ModelListing::Unavailable`].
pub async fn fetch_model_listing(backend: &dyn RagBackend) -> ModelListing {
    match backend.list_models().await {
        Ok(catalog) if catalog.is_empty() => {
            warn!(backend = %backend.describe(), "Backend reported no models");
            ModelListing::Unavailable {
                reason: "The backend reported no models".to_string(),
            }
        }
        Ok(catalog) => {
            info!(
                backend = %backend.describe(),
                count = catalog.models.len(),
                default = catalog.default_model.as_deref().unwrap_or(""),
                "Fetched model list"
            );
            ModelListing::Available(catalog)
        }
        Err(e) => {
            warn!(backend = %backend.describe(), error = %e, "Could not fetch model list");
            ModelListing::Unavailable {
                reason: format!("Could not load models: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_available() {
        let backend = MockBackend::with_models(["a", "b"]);
        match fetch_model_listing(&backend).await {
            ModelListing::Available(catalog) => assert_eq!(catalog.names(), vec!["a", "b"]),
            other => panic!("Expected Available, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listing_failure_is_soft() {
        let backend = MockBackend::new().with_model_error(BackendError::Connection {
            message: "connection refused".into(),
        });
        match fetch_model_listing(&backend).await {
            ModelListing::Unavailable { reason } => {
                assert!(reason.contains("connection refused"));
            }
            other => panic!("Expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listing_empty_is_unavailable() {
        let backend = MockBackend::with_models(Vec::<String>::new());
        assert!(matches!(
            fetch_model_listing(&backend).await,
            ModelListing::Unavailable { .. }
        ));
    }
}
