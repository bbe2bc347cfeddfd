//! Throttled HTTP transport with retry logic and error handling.

mod client;
mod retry;

pub use client::{FeedResponse, RequestOptions, ThrottledClient, ThrottledResponse};
pub use retry::{
    MAX_RETRIES, NonRetryableError, RETRY_DELAY_MS, check_retryable, classify_error,
    is_retryable_error,
};
