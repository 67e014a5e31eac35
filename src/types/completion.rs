//! Completion request type.

use serde::{Deserialize, Serialize};

use crate::backend::GenerateRequest;

/// Default sampling temperature for inline completions.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// A request for an inline completion, as built by the prompt layer.
///
/// `prompt`, `model` and `temperature` identify the request for caching;
/// `max_tokens` and `bearer_token` only shape the backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Fully templated prompt text.
    pub prompt: String,

    /// Backend model identifier.
    pub model: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Upper bound on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Bearer token for authenticated endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl CompletionRequest {
    /// Create a request with the default temperature.
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            bearer_token: None,
        }
    }

    /// Set temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set max tokens.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the bearer token.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub(crate) fn to_generate_request(&self) -> GenerateRequest {
        GenerateRequest {
            prompt: self.prompt.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            bearer_token: self.bearer_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let request = CompletionRequest::new("fn main", "codellama")
            .temperature(0.7)
            .max_tokens(64)
            .bearer_token("secret");
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.max_tokens, Some(64));

        let generate = request.to_generate_request();
        assert_eq!(generate.prompt, "fn main");
        assert_eq!(generate.bearer_token.as_deref(), Some("secret"));
    }

    #[test]
    fn optional_fields_are_skipped() {
        let json = serde_json::to_value(CompletionRequest::new("p", "m")).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("bearer_token").is_none());
    }
}
