//! Shared HTTP transport: rate limiting and retry.
//!
//! Every outbound client goes through `request_with_retry`, which applies a
//! per-client token-bucket limiter and exponential backoff with jitter for
//! transient failures (timeouts, connection errors, 429/5xx).

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use reqwest::{Client, Method, Response, StatusCode};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RateLimitConfig;

/// HTTP status codes that warrant a retry.
const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }

    /// Transient errors are retried; everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout(_) | TransportError::Connect(_) => true,
            TransportError::Status { status, .. } => {
                RETRYABLE_STATUS_CODES.contains(&status.as_u16())
            }
            TransportError::Other(_) => false,
        }
    }
}

/// Token-bucket rate limiter keyed on a minimum inter-request interval.
///
/// `requests_per_second == 0` disables throttling. The limiter serializes
/// requests for one client; independent clients never wait on each other.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Suspend until the next request is allowed.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let pause = {
            let last = self.last_request.lock();
            match *last {
                Some(t) => self.min_interval.saturating_sub(t.elapsed()),
                None => Duration::ZERO,
            }
        };
        if !pause.is_zero() {
            sleep(pause).await;
        }
        *self.last_request.lock() = Some(Instant::now());
    }
}

/// delay = min(base * 2^attempt + U(0, jitter), max_delay)
pub fn backoff_delay(attempt: u32, config: &RateLimitConfig) -> Duration {
    let base = config.retry_base_delay_seconds * 2f64.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(0.0..=config.retry_jitter_seconds);
    Duration::from_secs_f64((base + jitter).min(config.retry_max_delay_seconds))
}

/// Execute an HTTP request with rate limiting and retry.
///
/// The limiter (if any) is consulted before every attempt. Retryable
/// failures back off per `backoff_delay`; the last error is returned once
/// attempts are exhausted. Non-retryable failures propagate immediately.
pub async fn request_with_retry(
    client: &Client,
    method: Method,
    url: &str,
    headers: Option<reqwest::header::HeaderMap>,
    params: Option<&[(String, String)]>,
    limiter: Option<&RateLimiter>,
    config: &RateLimitConfig,
) -> Result<Response, TransportError> {
    let mut last_err: Option<TransportError> = None;

    for attempt in 0..config.retry_max_attempts {
        if let Some(l) = limiter {
            l.wait().await;
        }

        let mut request = client.request(method.clone(), url);
        if let Some(h) = &headers {
            request = request.headers(h.clone());
        }
        if let Some(p) = params {
            request = request.query(p);
        }

        let err = match request.send().await {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                TransportError::Status {
                    status,
                    url: url.to_string(),
                    body,
                }
            }
            Err(e) => TransportError::from_reqwest(&e),
        };

        if !err.is_retryable() || attempt + 1 >= config.retry_max_attempts {
            return Err(err);
        }

        let delay = backoff_delay(attempt, config);
        warn!(
            "Request to {} failed (attempt {}/{}): {} — retrying in {:.1}s",
            url,
            attempt + 1,
            config.retry_max_attempts,
            err,
            delay.as_secs_f64(),
        );
        last_err = Some(err);
        sleep(delay).await;
    }

    // Only reachable with retry_max_attempts == 0.
    Err(last_err.unwrap_or_else(|| TransportError::Other("no attempts configured".to_string())))
}
