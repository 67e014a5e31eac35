//! Sliding-window rate limiter with burst detection and cooldown.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::telemetry;

/// Length of the per-minute window.
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Length of the burst window.
const BURST_WINDOW: Duration = Duration::from_secs(10);

/// Thresholds for [`RateLimiter`].
///
/// ```rust
/// # use muninn::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .max_requests_per_minute(30)
///     .cooldown(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Admissions allowed in any trailing 60 seconds. Default: 60.
    pub max_requests_per_minute: usize,
    /// Admissions allowed in any trailing 10 seconds. Default: 20.
    pub max_burst_requests: usize,
    /// How long every request is rejected after a limit trips. Default: 30s.
    #[serde(rename = "cooldown_ms", with = "duration_ms")]
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            max_burst_requests: 20,
            cooldown: Duration::from_millis(30_000),
        }
    }
}

impl RateLimitConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-minute ceiling.
    pub fn max_requests_per_minute(mut self, n: usize) -> Self {
        self.max_requests_per_minute = n;
        self
    }

    /// Set the ten-second burst ceiling.
    pub fn max_burst_requests(mut self, n: usize) -> Self {
        self.max_burst_requests = n;
        self
    }

    /// Set the cooldown period.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Snapshot of limiter usage for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStats {
    /// Admissions since the limiter was created.
    pub total_requests: u64,
    /// Admissions within the trailing 60 seconds.
    pub requests_last_minute: usize,
    /// Admissions within the trailing 10 seconds.
    pub requests_last_10_seconds: usize,
    /// Whether the cooldown is currently active.
    pub in_cooldown: bool,
    /// Time left until the cooldown ends (zero when inactive).
    pub cooldown_remaining: Duration,
}

#[derive(Debug, Default)]
struct RateWindow {
    /// Admission times, oldest first.
    timestamps: VecDeque<Instant>,
    /// Deadline of the active cooldown.
    cooldown_until: Option<Instant>,
    total_requests: u64,
}

impl RateWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) < MINUTE_WINDOW {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.timestamps
            .iter()
            .rev()
            .take_while(|&&ts| now.duration_since(ts) < window)
            .count()
    }

    /// Whether the cooldown is active at `now`. Clears an elapsed cooldown.
    fn cooldown_active(&mut self, now: Instant) -> bool {
        match self.cooldown_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.cooldown_until = None;
                info!("rate limit cooldown ended");
                false
            }
            None => false,
        }
    }
}

/// Admission gate in front of the generation backend.
///
/// [`allow()`](Self::allow) never blocks: it either records the request and
/// returns `true`, or returns `false`. Tripping either the per-minute or the
/// burst ceiling puts the limiter into cooldown, during which every call is
/// rejected without looking at the window.
///
/// Time is read from [`tokio::time::Instant`], so paused-clock tests can
/// drive the windows deterministically.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<RateWindow>,
}

impl RateLimiter {
    /// Create a limiter with the given thresholds.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(RateWindow::default()),
        }
    }

    /// The thresholds this limiter enforces.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a request may proceed, recording it if so.
    pub fn allow(&self) -> bool {
        let now = Instant::now();
        let mut window = self.lock_window();
        window.prune(now);

        if window.cooldown_active(now) {
            reject("cooldown");
            return false;
        }

        if window.timestamps.len() >= self.config.max_requests_per_minute {
            reject("per_minute");
            self.enter_cooldown(&mut window, now);
            return false;
        }

        if window.count_within(now, BURST_WINDOW) >= self.config.max_burst_requests {
            reject("burst");
            self.enter_cooldown(&mut window, now);
            return false;
        }

        window.timestamps.push_back(now);
        window.total_requests += 1;
        true
    }

    /// Whether the cooldown is active right now.
    pub fn in_cooldown(&self) -> bool {
        self.lock_window().cooldown_active(Instant::now())
    }

    /// Forget all recorded requests and cancel any cooldown.
    pub fn reset(&self) {
        let mut window = self.lock_window();
        window.timestamps.clear();
        window.cooldown_until = None;
        info!("rate limiter counters reset");
    }

    /// Current usage, for status displays. Does not record a request.
    pub fn usage_statistics(&self) -> RateLimitStats {
        let now = Instant::now();
        let mut window = self.lock_window();
        window.prune(now);
        let in_cooldown = window.cooldown_active(now);
        RateLimitStats {
            total_requests: window.total_requests,
            requests_last_minute: window.timestamps.len(),
            requests_last_10_seconds: window.count_within(now, BURST_WINDOW),
            in_cooldown,
            cooldown_remaining: window
                .cooldown_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or_default(),
        }
    }

    fn enter_cooldown(&self, window: &mut RateWindow, now: Instant) {
        window.cooldown_until = Some(now + self.config.cooldown);
        info!(
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            "entering rate limit cooldown"
        );
    }

    fn lock_window(&self) -> MutexGuard<'_, RateWindow> {
        // The window holds plain counters; a panic mid-update leaves it usable.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

fn reject(reason: &'static str) {
    warn!(reason, "request rejected by rate limiter");
    metrics::counter!(telemetry::RATE_LIMIT_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
