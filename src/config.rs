//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (CLI flag)
//! 2. `~/.muninn/config.toml` (user)
//! 3. `/etc/muninn/config.toml` (system)
//!
//! Every value has a default, so an empty file is a valid configuration.
//! Out-of-range values are clamped rather than rejected, matching what the
//! editor settings UI allows.
//!
//! ```toml
//! [inference]
//! endpoint = "http://127.0.0.1:11434"
//! model = "codellama:7b-code-q4_K_M"
//! temperature = 0.2
//! max_tokens = 256
//! max_lines = 16
//! delay_ms = 250
//!
//! [cache]
//! max_entries = 1000
//! ttl_secs = 3600
//! sweep_interval_secs = 300
//!
//! [rate_limit]
//! max_requests_per_minute = 60
//! max_burst_requests = 20
//! cooldown_ms = 30000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::backend::ollama::DEFAULT_ENDPOINT;
use crate::cache::CacheConfig;
use crate::limit::RateLimitConfig;
use crate::pipeline::CompletionLimits;
use crate::types::CompletionRequest;
use crate::{MuninnError, Result};

/// Environment variable consulted when no bearer token is configured.
pub const BEARER_TOKEN_ENV: &str = "MUNINN_BEARER_TOKEN";

/// Longest bearer token accepted; anything longer is treated as a paste error.
const MAX_BEARER_TOKEN_LEN: usize = 512;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Backend endpoint and generation parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Backend base URL (default: http://127.0.0.1:11434).
    pub endpoint: String,
    /// Bearer token for authenticated endpoints.
    pub bearer_token: Option<String>,
    /// Model identifier passed to the backend.
    pub model: String,
    /// Sampling temperature, 0.0–1.0 (default: 0.2).
    pub temperature: f32,
    /// Generated token cap, 10–1000 (default: 256).
    pub max_tokens: usize,
    /// Completion line cap, 1–100 (default: 16).
    pub max_lines: usize,
    /// Debounce delay in milliseconds, 0–5000 (default: 250).
    pub delay_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            bearer_token: None,
            model: "codellama:7b-code-q4_K_M".to_string(),
            temperature: 0.2,
            max_tokens: 256,
            max_lines: 16,
            delay_ms: 250,
        }
    }
}

impl InferenceConfig {
    /// Clamp ranges and repair invalid values in place.
    pub fn normalize(&mut self) {
        let endpoint = self.endpoint.trim().trim_end_matches('/').trim();
        self.endpoint = if endpoint.is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else if url::Url::parse(endpoint).is_err() {
            warn!(endpoint, "invalid endpoint URL, using default");
            DEFAULT_ENDPOINT.to_string()
        } else {
            endpoint.to_string()
        };

        self.bearer_token = self
            .bearer_token
            .take()
            .or_else(|| std::env::var(BEARER_TOKEN_ENV).ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .filter(|t| {
                let ok = t.len() <= MAX_BEARER_TOKEN_LEN;
                if !ok {
                    warn!(len = t.len(), "bearer token too long, ignoring it");
                }
                ok
            });

        let model = self.model.trim();
        if model.is_empty() {
            self.model = Self::default().model;
        } else if model.len() != self.model.len() {
            self.model = model.to_string();
        }

        self.temperature = if self.temperature.is_finite() {
            self.temperature.clamp(0.0, 1.0)
        } else {
            Self::default().temperature
        };
        self.max_tokens = self.max_tokens.clamp(10, 1000);
        self.max_lines = self.max_lines.clamp(1, 100);
        self.delay_ms = self.delay_ms.min(5000);
    }

    /// Debounce delay as a [`Duration`].
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Limits the coordinator applies to each completion.
    pub fn limits(&self) -> CompletionLimits {
        CompletionLimits::new()
            .max_lines(self.max_lines)
            .delay(self.delay())
    }

    /// Build a request for `prompt` from the configured generation parameters.
    pub fn completion_request(&self, prompt: impl Into<String>) -> CompletionRequest {
        let request = CompletionRequest::new(prompt, &self.model)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens);
        match &self.bearer_token {
            Some(token) => request.bearer_token(token),
            None => request,
        }
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.muninn/config.toml`
    /// 3. `/etc/muninn/config.toml`
    ///
    /// Falls back to defaults when no file exists and no path was given.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => {
                let mut config = Config::default();
                config.normalize();
                Ok(config)
            }
        }
    }

    /// Load and normalize a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MuninnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content).map_err(|e| match e {
            MuninnError::Configuration(msg) => {
                MuninnError::Configuration(format!("Failed to parse config file {path:?}: {msg}"))
            }
            other => other,
        })
    }

    /// Parse and normalize TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| MuninnError::Configuration(e.to_string()))?;
        config.normalize();
        Ok(config)
    }

    /// Clamp every section to values the pipeline can run with.
    pub fn normalize(&mut self) {
        self.inference.normalize();
        self.cache.normalize();
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MuninnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".muninn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/muninn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }
}
