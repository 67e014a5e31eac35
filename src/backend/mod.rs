//! Generation backend transport.
//!
//! The pipeline talks to exactly one backend endpoint through the
//! [`GenerateBackend`] trait. [`OllamaBackend`] is the HTTP implementation;
//! tests substitute in-memory backends that return canned byte streams.

pub mod ollama;
pub mod traits;

pub use ollama::OllamaBackend;
pub use traits::{ByteStream, GenerateBackend, GenerateRequest};
