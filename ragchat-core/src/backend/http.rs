//! HTTP implementation of [`RagBackend`] on top of `reqwest`.

use super::models::parse_model_list;
use super::stream::{decode_stream, FragmentStream};
use super::RagBackend;
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::types::{CompletionRequest, ModelCatalog};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Client for a RAG backend reachable over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Build a client from validated backend configuration.
    ///
    /// Only a connect timeout is set on the client: completion streams may
    /// legitimately run for a long time.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| BackendError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn map_http_error(status: StatusCode, body: &str) -> BackendError {
        let mut body = body.trim().to_string();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
            body.push('…');
        }
        BackendError::HttpStatus {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl RagBackend for HttpBackend {
    async fn list_models(&self) -> Result<ModelCatalog, BackendError> {
        let url = self.config.models_url();
        let timeout_secs = self.config.models_timeout_secs;
        debug!(url = %url, "Fetching model list");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, Some(timeout_secs)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::from_reqwest(e, Some(timeout_secs)))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }
        parse_model_list(&body)
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<FragmentStream, BackendError> {
        let url = self.config.completion_url();
        let body = request.to_payload(self.config.payload);
        debug!(
            url = %url,
            model = request.model.as_deref().unwrap_or("<backend default>"),
            history = request.history.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, None))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }

        let bytes = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| BackendError::Streaming {
                message: format!("Failed to read streaming chunk: {}", e),
            })
        });
        Ok(decode_stream(bytes, self.config.transport))
    }

    fn describe(&self) -> String {
        self.config.url.clone()
    }
}
