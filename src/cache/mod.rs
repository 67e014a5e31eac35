//! Caching subsystem.
//!
//! - [`CompletionCache`]: memoized completions keyed on a fingerprint of
//!   (prompt, model, temperature). Owned by the
//!   [`CompletionCoordinator`](crate::CompletionCoordinator) and consulted
//!   before admission control, so a hit never touches the rate limiter, the
//!   request lock or the backend.

pub mod completion;

pub use completion::{CacheConfig, CacheStats, CompletionCache, fingerprint};
