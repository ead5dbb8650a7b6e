//! Utility modules for hhl-backfill

pub mod retry;

pub use retry::{retry_transient, RetryPolicy, Retryable};
