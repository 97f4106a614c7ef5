//! Retry policies for flaky connections

pub mod retry;

pub use retry::{retry_with, DelayStrategy, RetryConfig, RetryPolicy};
