// Text-generation client for a Gemini-style `generateContent` endpoint.
//
// `TextGenerator` is the seam the orchestrator depends on; `GeminiClient` is
// the HTTP implementation and `LlmClient` wraps it with a disabled state for
// deployments without a credential.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use valuecast_core::config::Config;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("AI transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("AI client not configured")]
    Disabled,
}

impl AiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            AiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server overload: 500 or 503.
    pub fn is_overload(&self) -> bool {
        matches!(self.status(), Some(500 | 503))
    }

    /// Worth retrying: 429, 500, 503, or a transport failure.
    pub fn is_transient(&self) -> bool {
        match self {
            AiError::Status { status, .. } => matches!(status, 429 | 500 | 503),
            AiError::Transport(_) => true,
            AiError::Disabled => false,
        }
    }
}

// ---------------------------------------------------------------------------
// TextGenerator
// ---------------------------------------------------------------------------

/// Sends one prompt to one model and returns the raw response body.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, AiError>;
}

// ---------------------------------------------------------------------------
// GeminiClient
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    /// `timeout` bounds each HTTP round-trip so the retry loop cannot hang.
    pub fn new(api_key: String, endpoint: String, timeout: Duration) -> Result<Self, AiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, AiError> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.2 }
        });

        let response = self
            .http
            .post(self.url(model))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(model, status = status.as_u16(), bytes = text.len(), "AI response received");

        if !status.is_success() {
            return Err(AiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// Either a configured generator or disabled (no credential).
#[derive(Clone)]
pub enum LlmClient {
    Active(Arc<dyn TextGenerator>),
    Disabled,
}

impl LlmClient {
    /// Build from config: `Active` when an API key is present, otherwise
    /// `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        let Some(key) = config.api_key() else {
            return LlmClient::Disabled;
        };
        let timeout = Duration::from_secs(config.ai.request_timeout_secs);
        match GeminiClient::new(key.to_string(), config.ai.endpoint.clone(), timeout) {
            Ok(client) => LlmClient::Active(Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "failed to build AI client, running heuristic-only");
                LlmClient::Disabled
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }

    pub async fn generate(&self, model: &str, prompt: &str) -> Result<String, AiError> {
        match self {
            LlmClient::Active(generator) => generator.generate(model, prompt).await,
            LlmClient::Disabled => Err(AiError::Disabled),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
