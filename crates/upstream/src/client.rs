//! HTTP client enforcing a minimum delay between requests and retrying
//! transient failures with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tradesync_core::retry::{RetryClass, RetryPolicy};

use crate::error::{is_retryable_transport_error, Result, UpstreamError};
use crate::types::ApiErrorResponse;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Rate-limited client for the upstream read API.
///
/// Clones share one rate limiter, so every worker of a run draws from the
/// same request budget.
#[derive(Debug, Clone)]
pub struct RateLimitedClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    min_delay: Duration,
    retry: RetryPolicy,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RateLimitedClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the API, without a trailing slash
    /// * `api_key` - Bearer token, if the API requires one
    /// * `min_delay` - Minimum delay between the start of two requests
    /// * `retry` - Backoff policy for retryable failures
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        min_delay: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            min_delay,
            retry,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &self.api_key {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|_| UpstreamError::auth("Invalid API key format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        Ok(headers)
    }

    /// Waits until `min_delay` has passed since the previous request.
    ///
    /// The lock is held while sleeping so concurrent callers queue up.
    async fn throttle(&self) {
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                sleep(self.min_delay - elapsed).await;
            }
        }
        *last_request = Some(Instant::now());
    }

    fn retry_after(headers: &HeaderMap) -> Option<Duration> {
        headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }

    fn api_error(status: reqwest::StatusCode, body: &str) -> UpstreamError {
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(body) {
            let message = if error.code.is_empty() {
                error.message
            } else {
                format!("{}: {}", error.code, error.message)
            };
            return UpstreamError::api(status.as_u16(), message);
        }
        UpstreamError::api(status.as_u16(), format!("Request failed: {}", body))
    }

    /// GET `path` with `query`, decoding a JSON body.
    ///
    /// 429, 5xx and transport failures are retried with backoff, honoring
    /// `Retry-After` when the API sends one. When attempts run out the last
    /// error is returned.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let headers = self.headers()?;
        let mut attempt = 0usize;

        loop {
            attempt = attempt.saturating_add(1);
            self.throttle().await;

            let send_result = self
                .client
                .get(&url)
                .headers(headers.clone())
                .query(query)
                .send()
                .await;

            let (error, retry_after) = match send_result {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = Self::retry_after(response.headers());
                    match response.text().await {
                        Ok(body) => {
                            Self::log_response(status, &body);
                            if status.is_success() {
                                return serde_json::from_str(&body).map_err(|e| {
                                    log::error!(
                                        "Failed to deserialize response from {}: {}",
                                        path,
                                        e
                                    );
                                    UpstreamError::Json(e)
                                });
                            }
                            (Self::api_error(status, &body), retry_after)
                        }
                        Err(err) if is_retryable_transport_error(&err) => {
                            (UpstreamError::Http(err), retry_after)
                        }
                        Err(err) => return Err(UpstreamError::Http(err)),
                    }
                }
                Err(err) if is_retryable_transport_error(&err) => (UpstreamError::Http(err), None),
                Err(err) => return Err(UpstreamError::Http(err)),
            };

            if error.retry_class() != RetryClass::Retryable || attempt >= self.retry.max_attempts
            {
                return Err(error);
            }

            let backoff = match retry_after {
                Some(wait) => wait.min(self.retry.max_delay),
                None => self.retry.backoff_with_jitter(attempt),
            };
            debug!(
                "GET {} retry attempt {}/{} in {:?}: {}",
                path,
                attempt + 1,
                self.retry.max_attempts,
                backoff,
                error
            );
            sleep(backoff).await;
        }
    }
}
