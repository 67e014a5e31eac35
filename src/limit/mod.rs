//! Admission control for backend requests.
//!
//! [`RateLimiter`] decides, before any expensive work happens, whether a
//! completion request may reach the backend. It combines a trailing
//! one-minute window, a ten-second burst window and a cooldown state that
//! blocks everything for a fixed period after either limit trips.
//!
//! The limiter is owned by the coordinator and shared through an `Arc`; there
//! is no process-global instance.

pub mod rate;

pub use rate::{RateLimitConfig, RateLimitStats, RateLimiter};
