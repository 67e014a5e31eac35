//! Decoded units of backend output.

use serde::{Deserialize, Serialize};

/// One line of a streamed generation response.
///
/// Concatenating `response` across a stream, in order, yields the full
/// completion. A well-formed stream ends with exactly one event whose `done`
/// flag is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEvent {
    /// Model that produced the fragment.
    #[serde(default)]
    pub model: String,
    /// Incremental text fragment (may be empty, typically on the final event).
    pub response: String,
    /// Whether this is the final event of the stream.
    pub done: bool,
}

impl TokenEvent {
    /// Create a non-final event.
    pub fn fragment(model: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response: response.into(),
            done: false,
        }
    }

    /// Create the final event of a stream.
    pub fn done(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response: String::new(),
            done: true,
        }
    }
}
