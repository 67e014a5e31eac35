//! Ollama `/api/generate` client.
//!
//! See: <https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-completion>

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::traits::{ByteStream, GenerateBackend, GenerateRequest};
use crate::{MuninnError, Result};

/// Default Ollama endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434";

/// Streaming client for a single Ollama endpoint.
#[derive(Clone)]
pub struct OllamaBackend {
    http: Client,
    endpoint: String,
}

impl OllamaBackend {
    /// Create a client for the given endpoint (e.g. `http://127.0.0.1:11434`).
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MuninnError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let endpoint = endpoint.into();
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Endpoint this client posts to, without trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerateBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn open(&self, request: &GenerateRequest) -> Result<ByteStream> {
        let url = format!("{}/api/generate", self.endpoint);
        debug!(%url, model = %request.model, "opening generation stream");

        let mut builder = self.http.post(&url).json(&OllamaGenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            raw: true,
            stream: true,
            options: OllamaOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
            },
        });
        if let Some(token) = request.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| MuninnError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %message, "backend rejected generation request");
            return Err(MuninnError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(MuninnError::from));
        Ok(Box::pin(body))
    }
}

#[derive(Serialize)]
struct OllamaGenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    raw: bool,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
    temperature: f32,
}
