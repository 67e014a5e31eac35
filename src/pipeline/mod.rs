//! Request pipeline: the coordinator and the lock that serializes backend
//! access.

pub mod coordinator;
pub mod lock;

pub use coordinator::{CompletionCoordinator, CompletionLimits};
pub use lock::RequestLock;
