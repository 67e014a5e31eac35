//! Backend trait and request type.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Raw response body of a streaming generation call, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Everything the backend needs to start one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Fully templated prompt text.
    pub prompt: String,
    /// Backend model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Bearer token sent in the `Authorization` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

/// A streaming text-generation endpoint.
///
/// `open` returns once response headers are in; the body is consumed lazily
/// through the returned [`ByteStream`]. Connection failures and non-success
/// statuses are reported from `open` itself.
#[async_trait]
pub trait GenerateBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Start a generation and return its response body.
    async fn open(&self, request: &GenerateRequest) -> Result<ByteStream>;
}
