//! Configuration system for ragchat.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! The backend base URL is required and comes from `RAG_API_URL`; every other
//! setting has a default and can be overridden with `RAGCHAT_*` variables
//! (`RAGCHAT_SERVER__PORT=8080`) or a TOML file.

use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable carrying the backend base URL.
pub const BACKEND_URL_ENV: &str = "RAG_API_URL";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagChatConfig {
    pub backend: BackendConfig,
    pub server: ServerConfig,
}

/// How the backend delivers a streamed completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTransport {
    /// Server-sent events: `data: {...}` lines terminated by `data: [DONE]`.
    #[default]
    Sse,
    /// Raw chunked transfer: every body chunk is a text fragment.
    Chunked,
}

/// Shape of the JSON body posted to the completion endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// `{"model", "message", "history": [{"role", "text"}]}`
    #[default]
    Structured,
    /// `{"question", "history": ["..."], "model"}`
    Flat,
}

/// Where and how to reach the RAG backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL, without trailing slash once validated.
    pub url: String,
    /// Path of the model listing endpoint.
    pub models_path: String,
    /// Path of the streaming completion endpoint.
    pub completion_path: String,
    pub transport: StreamTransport,
    pub payload: PayloadFormat,
    /// Timeout for `GET /models`.
    pub models_timeout_secs: u64,
    /// TCP connect timeout for all backend requests.
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            models_path: "/models".to_string(),
            completion_path: "/rag-query/stream".to_string(),
            transport: StreamTransport::default(),
            payload: PayloadFormat::default(),
            models_timeout_secs: 10,
            connect_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    /// Full URL of the model listing endpoint.
    pub fn models_url(&self) -> String {
        format!("{}{}", self.url, self.models_path)
    }

    /// Full URL of the completion endpoint.
    pub fn completion_url(&self) -> String {
        format!("{}{}", self.url, self.completion_path)
    }
}

/// The local HTTP server hosting the chat page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Page title.
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7860,
            title: "RAG Chat".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Path of the user-level config file (`~/.config/ragchat/config.toml` on Linux).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "ragchat", "ragchat")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Build the layered figment.
///
/// Priority (highest to lowest):
/// 1. `RAG_API_URL` (backend URL only)
/// 2. Environment variables prefixed with `RAGCHAT_`
/// 3. Explicit config file
/// 4. User config file
/// 5. Built-in defaults
pub fn figment(config_file: Option<&Path>) -> Result<Figment, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(RagChatConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(user_config));
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment
        .merge(Env::prefixed("RAGCHAT_").split("__"))
        .merge(
            Env::raw()
                .only(&[BACKEND_URL_ENV])
                .map(|_| "backend.url".into()),
        );

    Ok(figment)
}

/// Load and validate configuration from all layers.
pub fn load_config(config_file: Option<&Path>) -> Result<RagChatConfig, ConfigError> {
    from_figment(figment(config_file)?)
}

/// Extract and validate configuration from an already-built figment.
pub fn from_figment(figment: Figment) -> Result<RagChatConfig, ConfigError> {
    let config: RagChatConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validated()
}

impl RagChatConfig {
    /// Validate required fields and normalise URLs and paths.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        let raw = self.backend.url.trim();
        if raw.is_empty() {
            return Err(ConfigError::EnvVarMissing {
                var: BACKEND_URL_ENV.to_string(),
            });
        }

        let parsed = url::Url::parse(raw).map_err(|e| ConfigError::Invalid {
            message: format!("{BACKEND_URL_ENV} '{raw}' is not a valid URL: {e}"),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                message: format!(
                    "{BACKEND_URL_ENV} must use http or https, got '{}'",
                    parsed.scheme()
                ),
            });
        }
        self.backend.url = raw.trim_end_matches('/').to_string();
        self.backend.models_path = normalize_path(&self.backend.models_path);
        self.backend.completion_path = normalize_path(&self.backend.completion_path);

        Ok(self)
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
