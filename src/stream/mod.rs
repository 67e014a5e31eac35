//! Streaming response decoding.
//!
//! The backend answers a generation request with newline-delimited JSON, one
//! `{ model, response, done }` object per line. [`decode`] turns the raw
//! chunked body into a [`TokenStream`] of [`TokenEvent`](crate::TokenEvent)s,
//! tolerating keep-alive blank lines and partial frames, and stopping early
//! when a [`CancelSignal`] fires.

pub mod cancel;
pub mod decoder;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use decoder::{TokenStream, decode};
