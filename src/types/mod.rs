//! Public data types shared across the pipeline.

mod completion;
mod token;

pub use completion::{CompletionRequest, DEFAULT_TEMPERATURE};
pub use token::TokenEvent;
