//! Telemetry metric name constants.
//!
//! Centralised metric names for the completion pipeline. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muninn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).

/// Completion requests handled by the coordinator.
///
/// Labels: `outcome` ("ok" | "cache_hit" | "rate_limited" | "cancelled" |
/// "backend_error" | "decode_error").
pub const REQUESTS_TOTAL: &str = "muninn_requests_total";

/// End-to-end duration of requests that reached the backend, in seconds.
pub const REQUEST_DURATION_SECONDS: &str = "muninn_request_duration_seconds";

/// Completion cache hits.
pub const CACHE_HITS_TOTAL: &str = "muninn_cache_hits_total";

/// Completion cache misses (including expired entries).
pub const CACHE_MISSES_TOTAL: &str = "muninn_cache_misses_total";

/// Entries removed from the completion cache.
///
/// Labels: `reason` ("expired" | "evicted").
pub const CACHE_REMOVALS_TOTAL: &str = "muninn_cache_removals_total";

/// Requests turned away by the rate limiter.
///
/// Labels: `reason` ("cooldown" | "per_minute" | "burst").
pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "muninn_rate_limit_rejections_total";

/// Time spent waiting for the request lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "muninn_lock_wait_seconds";

/// Stream lines that could not be decoded and were skipped.
pub const DECODE_SKIPPED_LINES_TOTAL: &str = "muninn_decode_skipped_lines_total";
