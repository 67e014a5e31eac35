//! The completion entry point used by the editor layer.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::lock::RequestLock;
use crate::backend::{GenerateBackend, OllamaBackend};
use crate::cache::{CacheStats, CompletionCache};
use crate::config::Config;
use crate::limit::{RateLimitStats, RateLimiter};
use crate::stream::{CancelSignal, decode};
use crate::telemetry;
use crate::types::CompletionRequest;
use crate::{MuninnError, Result};

/// Per-request shaping applied by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionLimits {
    /// Stop reading once the completion spans more than this many lines.
    /// `None` reads until the backend says it is done.
    pub max_lines: Option<usize>,
    /// Debounce delay used by [`CompletionCoordinator::complete_debounced`].
    pub delay: Duration,
}

impl Default for CompletionLimits {
    fn default() -> Self {
        Self {
            max_lines: None,
            delay: Duration::ZERO,
        }
    }
}

impl CompletionLimits {
    /// Create limits that do not truncate or delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncate completions to at most `n` lines (minimum 1).
    pub fn max_lines(mut self, n: usize) -> Self {
        self.max_lines = Some(n.max(1));
        self
    }

    /// Set the debounce delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Orchestrates cache, admission control, the request lock and stream
/// decoding for each completion.
///
/// ```text
/// Idle → CacheCheck ─ hit ──────────────────────────────────────→ Idle
///                   └ miss → Admission ─ rejected ──────────────→ Idle
///                                      └ admitted → Locked → Streaming
///                                          Streaming ─ cancelled → Idle
///                                                    └ done → CachePopulate → Idle
/// ```
///
/// All collaborators are passed in at construction; several coordinators
/// may share one cache or limiter through their `Arc`s, but each owns its
/// own [`RequestLock`], so one coordinator per backend is the intended shape.
pub struct CompletionCoordinator {
    backend: Arc<dyn GenerateBackend>,
    cache: Arc<CompletionCache>,
    limiter: Arc<RateLimiter>,
    lock: RequestLock,
    limits: CompletionLimits,
}

impl CompletionCoordinator {
    /// Create a coordinator over the given collaborators with no limits.
    pub fn new(
        backend: Arc<dyn GenerateBackend>,
        cache: Arc<CompletionCache>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            backend,
            cache,
            limiter,
            lock: RequestLock::new(),
            limits: CompletionLimits::default(),
        }
    }

    /// Build a coordinator talking to the configured Ollama endpoint.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = OllamaBackend::new(&config.inference.endpoint)?;
        Ok(Self::new(
            Arc::new(backend),
            Arc::new(CompletionCache::new(config.cache.clone())),
            Arc::new(RateLimiter::new(config.rate_limit.clone())),
        )
        .with_limits(config.inference.limits()))
    }

    /// Replace the completion limits.
    pub fn with_limits(mut self, limits: CompletionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Produce a completion for `request`.
    ///
    /// Cache hits return immediately, bypassing admission and the lock.
    /// Misses must pass the rate limiter, then stream from the backend under
    /// the request lock. Only completions that reached the backend's `done`
    /// marker (or the line limit) are cached.
    ///
    /// # Errors
    ///
    /// - [`MuninnError::RateLimited`] when admission is refused
    /// - [`MuninnError::Cancelled`] when `cancel` fires before the stream completes
    /// - [`MuninnError::Http`] / [`MuninnError::Api`] on transport failures
    /// - [`MuninnError::Decode`] when the stream closes without a `done` event
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelSignal,
    ) -> Result<String> {
        if let Some(hit) = self
            .cache
            .get(&request.prompt, &request.model, request.temperature)
        {
            record_outcome("cache_hit");
            return Ok(hit);
        }

        if !self.limiter.allow() {
            record_outcome("rate_limited");
            return Err(MuninnError::RateLimited {
                in_cooldown: self.limiter.in_cooldown(),
            });
        }
        debug!(model = %request.model, "admitted, waiting for request lock");

        let started = Instant::now();
        let result = self
            .lock
            .run_exclusive(|| self.stream_completion(request, cancel))
            .await;
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(completion) => {
                self.cache.set(
                    &request.prompt,
                    &request.model,
                    request.temperature,
                    completion.clone(),
                );
                record_outcome("ok");
                Ok(completion)
            }
            Err(e) => {
                let kind = e.kind();
                if matches!(e, MuninnError::Cancelled) {
                    debug!("completion cancelled");
                } else {
                    warn!(
                        backend = self.backend.name(),
                        model = %request.model,
                        kind = %kind,
                        error = %e,
                        "completion failed"
                    );
                }
                record_outcome(kind.as_str());
                Err(e)
            }
        }
    }

    /// Wait for the debounce delay, then [`complete`](Self::complete).
    ///
    /// Cancelling during the delay returns [`MuninnError::Cancelled`] without
    /// consulting the cache, the limiter or the backend.
    pub async fn complete_debounced(
        &self,
        request: &CompletionRequest,
        cancel: &CancelSignal,
    ) -> Result<String> {
        if !self.limits.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.limits.delay) => {}
                _ = cancel.cancelled() => {
                    record_outcome("cancelled");
                    return Err(MuninnError::Cancelled);
                }
            }
        }
        self.complete(request, cancel).await
    }

    /// The completion cache.
    pub fn cache(&self) -> &Arc<CompletionCache> {
        &self.cache
    }

    /// The admission limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The limits applied to each completion.
    pub fn limits(&self) -> &CompletionLimits {
        &self.limits
    }

    /// Whether a generation is streaming right now.
    pub fn is_busy(&self) -> bool {
        self.lock.is_locked()
    }

    /// Cache diagnostics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Rate limiter diagnostics.
    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.limiter.usage_statistics()
    }

    /// Body of the locked section: open the transport and fold its events.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        cancel: &CancelSignal,
    ) -> Result<String> {
        // Cancelled while queued on the lock.
        if cancel.is_cancelled() {
            return Err(MuninnError::Cancelled);
        }

        let transport = self.backend.open(&request.to_generate_request()).await?;
        let mut tokens = decode(transport, cancel);
        let mut completion = String::new();
        let mut finished = false;

        while let Some(event) = tokens.next().await {
            let event = event?;
            completion.push_str(&event.response);
            // The final event may carry text too, so the limit applies first.
            if let Some(max_lines) = self.limits.max_lines {
                if truncate_lines(&mut completion, max_lines) {
                    debug!(max_lines, "line limit reached, closing stream");
                    finished = true;
                    break;
                }
            }
            if event.done {
                finished = true;
                break;
            }
        }

        if !finished {
            if cancel.is_cancelled() {
                return Err(MuninnError::Cancelled);
            }
            return Err(MuninnError::Decode(
                "stream closed before completion marker".to_string(),
            ));
        }

        debug!(
            chars = completion.len(),
            skipped_lines = tokens.skipped_lines(),
            "completion assembled"
        );
        Ok(completion)
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!(telemetry::REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Cut `text` down to its first `max_lines` lines if it has more.
///
/// Returns whether anything was cut. A line counts as soon as the newline
/// that starts it has arrived.
fn truncate_lines(text: &mut String, max_lines: usize) -> bool {
    match text.match_indices('\n').nth(max_lines.saturating_sub(1)) {
        Some((idx, _)) => {
            text.truncate(idx);
            true
        }
        None => false,
    }
}
