//! Tests for [`CompletionCoordinator`] with the cache, admission, lock and stream
//! decoding working together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use muninn::{
    ByteStream, CacheConfig, CompletionCache, CompletionCoordinator, CompletionLimits,
    CompletionRequest, FailureKind, GenerateBackend, GenerateRequest, MuninnError,
    RateLimitConfig, RateLimiter, Result, cancel_pair,
};

// ============================================================================
// Mock backends
// ============================================================================

fn line(response: &str, done: bool) -> String {
    format!("{{\"model\":\"codellama\",\"response\":{response:?},\"done\":{done}}}\n")
}

/// Replays the same NDJSON body on every call.
struct ScriptedBackend {
    body: Vec<String>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    open_delay: Duration,
}

impl ScriptedBackend {
    fn new(body: Vec<String>) -> Self {
        Self {
            body,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            open_delay: Duration::ZERO,
        }
    }

    fn completing(fragments: &[&str]) -> Self {
        let mut body: Vec<String> = fragments.iter().map(|f| line(f, false)).collect();
        body.push(line("", true));
        Self::new(body)
    }

    fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerateBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, _request: &GenerateRequest) -> Result<ByteStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let chunks: Vec<Result<Vec<u8>>> =
            self.body.iter().map(|l| Ok(l.clone().into_bytes())).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Hands out a channel-fed transport so tests control chunk timing.
struct ChannelBackend {
    rx: Mutex<Option<mpsc::Receiver<Result<Vec<u8>>>>>,
}

#[async_trait]
impl GenerateBackend for ChannelBackend {
    fn name(&self) -> &str {
        "channel"
    }

    async fn open(&self, _request: &GenerateRequest) -> Result<ByteStream> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| MuninnError::Http("transport already used".into()))?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Fails every call with the given status.
struct FailingBackend(u16);

#[async_trait]
impl GenerateBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn open(&self, _request: &GenerateRequest) -> Result<ByteStream> {
        Err(MuninnError::Api {
            status: self.0,
            message: "model not loaded".into(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn build(backend: Arc<dyn GenerateBackend>) -> (CompletionCoordinator, Arc<CompletionCache>) {
    let cache = Arc::new(CompletionCache::new(CacheConfig::default()));
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
    (
        CompletionCoordinator::new(backend, cache.clone(), limiter),
        cache,
    )
}

fn request() -> CompletionRequest {
    CompletionRequest::new("fn add(a: i32, b: i32) -> i32 {", "codellama").temperature(0.2)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn concatenates_fragments_in_order() {
    let backend = Arc::new(ScriptedBackend::completing(&["\n    a", " + b", "\n}"]));
    let (coordinator, _) = build(backend);
    let (_handle, cancel) = cancel_pair();

    let completion = coordinator.complete(&request(), &cancel).await.unwrap();
    assert_eq!(completion, "\n    a + b\n}");
    assert!(!coordinator.is_busy());
}

#[tokio::test]
async fn identical_requests_hit_the_backend_once() {
    let backend = Arc::new(ScriptedBackend::completing(&["ab", "cd"]));
    let (coordinator, cache) = build(backend.clone());
    let (_handle, cancel) = cancel_pair();

    let first = coordinator.complete(&request(), &cancel).await.unwrap();
    let second = coordinator.complete(&request(), &cancel).await.unwrap();

    assert_eq!(first, "abcd");
    assert_eq!(first, second);
    assert_eq!(backend.calls(), 1);
    assert_eq!(cache.stats().total_hits, 1);
}

#[tokio::test]
async fn different_temperature_is_a_different_request() {
    let backend = Arc::new(ScriptedBackend::completing(&["x"]));
    let (coordinator, _) = build(backend.clone());
    let (_handle, cancel) = cancel_pair();

    coordinator.complete(&request(), &cancel).await.unwrap();
    coordinator
        .complete(&request().temperature(0.9), &cancel)
        .await
        .unwrap();
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn cache_hit_skips_admission() {
    let backend = Arc::new(ScriptedBackend::completing(&["x"]));
    let cache = Arc::new(CompletionCache::default());
    let limiter = Arc::new(RateLimiter::new(
        RateLimitConfig::new().max_requests_per_minute(1),
    ));
    let coordinator = CompletionCoordinator::new(backend.clone(), cache, limiter.clone());
    let (_handle, cancel) = cancel_pair();

    coordinator.complete(&request(), &cancel).await.unwrap();
    for _ in 0..5 {
        assert_eq!(coordinator.complete(&request(), &cancel).await.unwrap(), "x");
    }
    assert_eq!(limiter.usage_statistics().total_requests, 1);
    assert!(!limiter.in_cooldown());
}

#[tokio::test]
async fn rejected_admission_fails_fast() {
    let backend = Arc::new(ScriptedBackend::completing(&["x"]));
    let cache = Arc::new(CompletionCache::default());
    let limiter = Arc::new(RateLimiter::new(
        RateLimitConfig::new().max_burst_requests(1),
    ));
    let coordinator = CompletionCoordinator::new(backend.clone(), cache, limiter);
    let (_handle, cancel) = cancel_pair();

    coordinator.complete(&request(), &cancel).await.unwrap();
    let err = coordinator
        .complete(&request().temperature(0.5), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, MuninnError::RateLimited { in_cooldown: true }));
    assert_eq!(err.kind(), FailureKind::RateLimited);
    assert_eq!(backend.calls(), 1);
    assert!(!coordinator.is_busy());
}

#[tokio::test]
async fn cancelling_mid_stream_leaves_no_cache_entry() {
    let (tx, rx) = mpsc::channel(8);
    let backend = Arc::new(ChannelBackend {
        rx: Mutex::new(Some(rx)),
    });
    let (coordinator, cache) = build(backend);
    let coordinator = Arc::new(coordinator);
    let (handle, cancel) = cancel_pair();

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.complete(&request(), &cancel).await })
    };

    tx.send(Ok(line("partial", false).into_bytes())).await.unwrap();
    tokio::task::yield_now().await;
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancelled completion should return")
        .unwrap();
    assert!(matches!(result, Err(MuninnError::Cancelled)));
    assert!(cache.is_empty());
    assert!(!coordinator.is_busy());

    // The transport was never closed; the pipeline just stopped reading it.
    drop(tx);
}

#[tokio::test]
async fn cancel_after_done_keeps_completion() {
    let backend = Arc::new(ScriptedBackend::completing(&["done"]));
    let (coordinator, cache) = build(backend);
    let (handle, cancel) = cancel_pair();

    let completion = coordinator.complete(&request(), &cancel).await.unwrap();
    handle.cancel();
    assert_eq!(completion, "done");
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn cancelled_before_lock_never_opens_transport() {
    let backend = Arc::new(ScriptedBackend::completing(&["x"]));
    let (coordinator, _) = build(backend.clone());
    let (handle, cancel) = cancel_pair();
    handle.cancel();

    let err = coordinator.complete(&request(), &cancel).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Cancelled);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn backend_failure_is_reported_and_not_cached() {
    let (coordinator, cache) = build(Arc::new(FailingBackend(500)));
    let (_handle, cancel) = cancel_pair();

    let err = coordinator.complete(&request(), &cancel).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::BackendError);
    assert!(err.is_transient());
    assert!(cache.is_empty());
    assert!(!coordinator.is_busy());
}

#[tokio::test]
async fn stream_without_done_is_a_decode_error() {
    let backend = Arc::new(ScriptedBackend::new(vec![line("half", false)]));
    let (coordinator, cache) = build(backend);
    let (_handle, cancel) = cancel_pair();

    let err = coordinator.complete(&request(), &cancel).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::DecodeError);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn malformed_lines_do_not_abort_completion() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        line("ab", false),
        "\n".to_string(),
        "{\"resp".to_string(),
        "onse\": oops}\n".to_string(),
        line("cd", false),
        line("", true),
    ]));
    let (coordinator, _) = build(backend);
    let (_handle, cancel) = cancel_pair();

    assert_eq!(coordinator.complete(&request(), &cancel).await.unwrap(), "abcd");
}

#[tokio::test]
async fn line_limit_truncates_and_caches() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        line("one\ntwo", false),
        line("\nthree\n", false),
        line("four", false),
        line("", true),
    ]));
    let (coordinator, cache) = build(backend);
    let coordinator = coordinator.with_limits(CompletionLimits::new().max_lines(2));
    let (_handle, cancel) = cancel_pair();

    let completion = coordinator.complete(&request(), &cancel).await.unwrap();
    assert_eq!(completion, "one\ntwo");
    assert_eq!(
        cache.get(&request().prompt, "codellama", 0.2).as_deref(),
        Some("one\ntwo")
    );
}

#[tokio::test]
async fn line_limit_applies_to_text_on_the_final_event() {
    let backend = Arc::new(ScriptedBackend::new(vec![line("one\ntwo\nthree\nfour", true)]));
    let (coordinator, cache) = build(backend);
    let coordinator = coordinator.with_limits(CompletionLimits::new().max_lines(2));
    let (_handle, cancel) = cancel_pair();

    let completion = coordinator.complete(&request(), &cancel).await.unwrap();
    assert_eq!(completion, "one\ntwo");
    assert_eq!(
        cache.get(&request().prompt, "codellama", 0.2).as_deref(),
        Some("one\ntwo")
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_stream_one_at_a_time() {
    let backend = Arc::new(
        ScriptedBackend::completing(&["x"]).with_open_delay(Duration::from_millis(20)),
    );
    let (coordinator, _) = build(backend.clone());
    let coordinator = Arc::new(coordinator);

    let mut tasks = Vec::new();
    for i in 0..6 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            let (_handle, cancel) = cancel_pair();
            let request = CompletionRequest::new(format!("prompt {i}"), "codellama");
            coordinator.complete(&request, &cancel).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), "x");
    }

    assert_eq!(backend.calls(), 6);
    assert_eq!(backend.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn debounced_request_waits_before_streaming() {
    let backend = Arc::new(ScriptedBackend::completing(&["x"]));
    let (coordinator, _) = build(backend.clone());
    let coordinator =
        coordinator.with_limits(CompletionLimits::new().delay(Duration::from_millis(250)));
    let (_handle, cancel) = cancel_pair();

    let started = tokio::time::Instant::now();
    coordinator.complete_debounced(&request(), &cancel).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_debounce_never_reaches_backend() {
    let backend = Arc::new(ScriptedBackend::completing(&["x"]));
    let (coordinator, cache) = build(backend.clone());
    let coordinator = Arc::new(
        coordinator.with_limits(CompletionLimits::new().delay(Duration::from_millis(250))),
    );
    let (handle, cancel) = cancel_pair();

    let task = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.complete_debounced(&request(), &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(MuninnError::Cancelled)));
    assert_eq!(backend.calls(), 0);
    assert!(cache.is_empty());
    assert_eq!(coordinator.rate_limit_stats().total_requests, 0);
}
