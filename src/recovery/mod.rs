//! Bounded retry for outbound calls.
//!
//! Only errors that report themselves transient are retried; see
//! [`crate::error::ManglerError::is_transient`].

mod retry;

pub use retry::{ExponentialBackoff, RetryConfig, RetryPolicy, retry_async_with_policy};
