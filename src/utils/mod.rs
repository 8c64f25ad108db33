//! Utility functions and helpers

pub mod keyed_lock;
pub mod retry;

pub use keyed_lock::KeyedLock;
pub use retry::{retry, with_timeout, RetryPolicy};
