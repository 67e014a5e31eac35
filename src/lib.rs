//! Muninn - streaming completion pipeline for editor inline suggestions
//!
//! Sits between an editor and a streaming text-generation backend (Ollama).
//! Every keystroke may ask for a completion; muninn decides whether that
//! request may reach the backend, answers repeats from a cache, lets only
//! one generation stream at a time, and decodes the backend's
//! newline-delimited JSON into token events that can be abandoned mid-stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use muninn::{CompletionCoordinator, CompletionRequest, Config, cancel_pair};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let config = Config::load(None)?;
//!     let coordinator = CompletionCoordinator::from_config(&config)?;
//!     let _sweeper = coordinator.cache().spawn_sweeper();
//!
//!     let (_handle, cancel) = cancel_pair();
//!     let request = CompletionRequest::new("fn fibonacci(n: u64) -> u64 {", "codellama:7b-code");
//!     let completion = coordinator.complete(&request, &cancel).await?;
//!
//!     println!("{completion}");
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod limit;
pub mod pipeline;
pub mod stream;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use backend::{ByteStream, GenerateBackend, GenerateRequest, OllamaBackend};
pub use cache::{CacheConfig, CacheStats, CompletionCache};
pub use config::{Config, InferenceConfig};
pub use error::{FailureKind, MuninnError, Result};
pub use limit::{RateLimitConfig, RateLimitStats, RateLimiter};
pub use pipeline::{CompletionCoordinator, CompletionLimits, RequestLock};
pub use stream::{CancelHandle, CancelSignal, TokenStream, cancel_pair, decode};
pub use types::{CompletionRequest, TokenEvent};
pub use version::{PKG_VERSION, version_string};
