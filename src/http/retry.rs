//! Retry classification for feed requests.

use reqwest::StatusCode;

/// Default number of attempts for a feed request.
pub const MAX_RETRIES: usize = 3;

/// Default delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Errors that should not be retried.
#[derive(Debug)]
pub enum NonRetryableError {
    /// Rate limit exceeded (HTTP 429)
    RateLimitExceeded(String),
    /// Authentication failed (HTTP 401)
    AuthenticationFailed(String),
    /// Resource not found (HTTP 404)
    NotFound(String),
    /// Forbidden access (HTTP 403)
    Forbidden(String),
    /// Other client errors that won't succeed on retry
    ClientError(String),
}

impl std::fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NonRetryableError::RateLimitExceeded(msg) => {
                write!(f, "Rate limit exceeded: {}. Try again later.", msg)
            }
            NonRetryableError::AuthenticationFailed(msg) => {
                write!(
                    f,
                    "Authentication failed: {}. Only anonymous feeds are supported.",
                    msg
                )
            }
            NonRetryableError::NotFound(msg) => {
                write!(f, "Not found: {}", msg)
            }
            NonRetryableError::Forbidden(msg) => {
                write!(f, "Access forbidden: {}", msg)
            }
            NonRetryableError::ClientError(msg) => {
                write!(f, "Request error: {}", msg)
            }
        }
    }
}

impl std::error::Error for NonRetryableError {}

/// Classifies a response status as retryable or not.
/// Returns Ok(()) for retryable statuses (5xx and anything unclassified).
pub fn classify_status(status: StatusCode, url: &str) -> Result<(), NonRetryableError> {
    match status {
        StatusCode::UNAUTHORIZED => Err(NonRetryableError::AuthenticationFailed(format!(
            "{} requires credentials",
            url
        ))),
        StatusCode::FORBIDDEN => Err(NonRetryableError::Forbidden(url.to_string())),
        StatusCode::TOO_MANY_REQUESTS => Err(NonRetryableError::RateLimitExceeded(format!(
            "{} throttled the request",
            url
        ))),
        StatusCode::NOT_FOUND => Err(NonRetryableError::NotFound(url.to_string())),
        // Other 4xx client errors are generally not retryable
        s if s.is_client_error() => Err(NonRetryableError::ClientError(format!(
            "HTTP {} from {}",
            s.as_u16(),
            url
        ))),
        // 5xx server errors are retryable
        _ => Ok(()),
    }
}

/// Classifies an error from `error_for_status()`.
pub fn classify_error(error: &reqwest::Error) -> Result<(), NonRetryableError> {
    match error.status() {
        Some(status) => {
            let url = error.url().map(|u| u.as_str()).unwrap_or("<unknown>");
            classify_status(status, url)
        }
        // Connection errors, timeouts, etc. are retryable
        None => Ok(()),
    }
}

/// Wraps an error from `error_for_status()` so that non-retryable ones can be
/// recognised with `downcast_ref::<NonRetryableError>()`.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Ok(()) => anyhow::Error::from(error),
        Err(non_retryable) => anyhow::Error::from(non_retryable),
    }
}

/// Whether an attempt that failed with `e` may be retried.
pub fn is_retryable_error(e: &anyhow::Error) -> bool {
    if e.downcast_ref::<NonRetryableError>().is_some() {
        return false;
    }
    if e.downcast_ref::<crate::error::Cancelled>().is_some() {
        return false;
    }
    true
}
