//! Throttled HTTP client with built-in retry logic.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::retry::{MAX_RETRIES, RETRY_DELAY_MS, check_retryable, is_retryable_error};
use crate::error::Cancelled;

const USER_AGENT: &str = concat!("nuload/", env!("NULOAD_VERSION"));

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Budget for one attempt to receive response headers.
    pub request_timeout: Duration,
    /// Budget for reading the whole response body.
    pub download_timeout: Duration,
    /// Maximum number of attempts.
    pub max_tries: usize,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Report HTTP 404 as [`FeedResponse::NotFound`] instead of an error.
    pub ignore_not_found: bool,
    /// The caller is retrying an earlier request; wait before the first attempt.
    pub is_retry: bool,
    /// The caller will not retry again; make a single attempt.
    pub is_last_attempt: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(100),
            download_timeout: Duration::from_secs(300),
            max_tries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            ignore_not_found: false,
            is_retry: false,
            is_last_attempt: false,
        }
    }
}

impl RequestOptions {
    pub fn ignore_not_found(mut self, ignore: bool) -> Self {
        self.ignore_not_found = ignore;
        self
    }
}

/// Outcome of a throttled request.
#[derive(Debug)]
pub enum FeedResponse {
    /// Successful response; the throttle permit is held until it is dropped.
    Found(ThrottledResponse),
    /// HTTP 404 with `ignore_not_found` set.
    NotFound,
    /// HTTP 204.
    NoContent,
}

impl FeedResponse {
    /// The successful response, if any.
    pub fn found(self) -> Option<ThrottledResponse> {
        match self {
            FeedResponse::Found(response) => Some(response),
            FeedResponse::NotFound | FeedResponse::NoContent => None,
        }
    }
}

/// A response that owns its throttle permit. Dropping it releases the permit.
#[derive(Debug)]
pub struct ThrottledResponse {
    response: Response,
    download_timeout: Duration,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ThrottledResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Reads the whole body into memory.
    pub async fn bytes(mut self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let timeout = self.download_timeout;
        let response = &mut self.response;

        let read = async move {
            let mut buffer = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .context("Failed to read chunk from download stream")?
            {
                buffer.extend_from_slice(&chunk);
            }
            Ok::<_, anyhow::Error>(buffer)
        };

        let buffer = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            result = tokio::time::timeout(timeout, read) => {
                result.map_err(|_| anyhow!("Download timed out after {:?}", timeout))??
            }
        };

        debug!(
            "Downloaded {:.2} MB",
            buffer.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(buffer)
    }

    /// Reads the body and deserializes it as JSON.
    pub async fn json<T: DeserializeOwned>(self, cancel: &CancellationToken) -> Result<T> {
        let body = self.bytes(cancel).await?;
        serde_json::from_slice(&body).context("Failed to parse JSON response")
    }
}

/// Concurrency-limited HTTP client for one feed.
///
/// The underlying `reqwest::Client` is created on first use; concurrent first
/// use still creates exactly one.
pub struct ThrottledClient {
    client: OnceCell<Client>,
    throttle: Option<Arc<Semaphore>>,
    clients_created: AtomicUsize,
}

impl ThrottledClient {
    /// Create a client allowing at most `max_concurrent` requests in flight
    /// (`None` = unlimited).
    pub fn new(max_concurrent: Option<usize>) -> Self {
        Self {
            client: OnceCell::new(),
            throttle: max_concurrent.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            clients_created: AtomicUsize::new(0),
        }
    }

    /// Free permits, or `None` when unthrottled.
    pub fn available_permits(&self) -> Option<usize> {
        self.throttle.as_ref().map(|s| s.available_permits())
    }

    /// How many underlying clients were created lazily.
    pub fn clients_created(&self) -> usize {
        self.clients_created.load(Ordering::SeqCst)
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                self.clients_created.fetch_add(1, Ordering::SeqCst);
                Client::builder()
                    .user_agent(USER_AGENT)
                    .build()
                    .context("Failed to create HTTP client")
            })
            .await
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(throttle) = &self.throttle else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled.into()),
            permit = throttle.clone().acquire_owned() => {
                permit.map(Some).context("Request throttle was closed")
            }
        }
    }

    /// GET `url`.
    pub async fn get(
        &self,
        url: &str,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<FeedResponse> {
        self.send(|client| client.get(url), options, cancel)
            .await
            .with_context(|| format!("GET {}", url))
    }

    /// GET `url` and deserialize the JSON body. `Ok(None)` when the feed
    /// reports the resource absent and `ignore_not_found` is set.
    #[tracing::instrument(skip(self, options, cancel))]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        debug!("GET JSON from {}...", url);
        match self.get(url, options, cancel).await?.found() {
            Some(response) => response
                .json(cancel)
                .await
                .with_context(|| format!("GET {}", url))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Sends the request built by `request_factory`, retrying transient
    /// failures. One throttle permit is taken before the first attempt and
    /// handed to the returned response; every other exit path releases it.
    pub async fn send<F>(
        &self,
        request_factory: F,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<FeedResponse>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let client = self.client().await?;
        let permit = self.acquire(cancel).await?;

        let tries = if options.is_last_attempt {
            1
        } else {
            options.max_tries.max(1)
        };
        let mut last_error = None;

        for attempt in 1..=tries {
            if attempt > 1 || options.is_retry {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Cancelled.into()),
                    _ = tokio::time::sleep(options.retry_delay) => {}
                }
            }

            let error = match self.send_once(client, &request_factory, options, cancel).await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND && options.ignore_not_found {
                        debug!("{} not found on feed", response.url());
                        return Ok(FeedResponse::NotFound);
                    }
                    if status == StatusCode::NO_CONTENT {
                        return Ok(FeedResponse::NoContent);
                    }
                    match response.error_for_status() {
                        Ok(response) => {
                            return Ok(FeedResponse::Found(ThrottledResponse {
                                response,
                                download_timeout: options.download_timeout,
                                _permit: permit,
                            }));
                        }
                        Err(e) => check_retryable(e),
                    }
                }
                Err(e) => e,
            };

            if !is_retryable_error(&error) {
                debug!("non-retryable error: {}", error);
                return Err(error);
            }

            if attempt < tries {
                warn!(
                    "Attempt {}/{} failed ({}), retrying in {:?}...",
                    attempt, tries, error, options.retry_delay
                );
            }
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after {} attempts", tries)))
    }

    async fn send_once<F>(
        &self,
        client: &Client,
        request_factory: &F,
        options: &RequestOptions,
        cancel: &CancellationToken,
    ) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let request = request_factory(client).send();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled.into()),
            result = tokio::time::timeout(options.request_timeout, request) => match result {
                Ok(response) => response.context("Failed to send request"),
                Err(_) => Err(anyhow!("Request timed out after {:?}", options.request_timeout)),
            }
        }
    }
}
