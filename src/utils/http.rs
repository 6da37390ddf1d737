// src/utils/http.rs

//! HTTP client utilities.
//!
//! All portal requests of a run go through one [`HttpFetcher`], which owns
//! the shared client and the rate limiter so concurrent item fetches still
//! respect the configured requests-per-second budget.

use std::fmt;
use std::time::Duration;

use governor::Quota;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};

use crate::error::{AppError, Result};
use crate::models::HttpConfig;

/// Longest `Retry-After` pause honored before giving the item back as transient.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Create a configured asynchronous HTTP client.
pub fn create_client(config: &HttpConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("pl-PL,pl;q=0.9,en;q=0.8"),
    );

    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .default_headers(headers)
        .build()?;
    Ok(client)
}

/// How a response status should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Transient,
    Permanent,
}

/// Classify a response status: timeouts, throttling and server errors are retryable.
pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        StatusClass::Transient
    } else {
        StatusClass::Permanent
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = raw.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Map a transport-level failure to the fetch taxonomy.
pub fn fetch_error(context: &str, error: reqwest::Error) -> AppError {
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        AppError::transient_fetch(context, error)
    } else {
        AppError::Http(error)
    }
}

type DirectRateLimiter = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Request budget shared by every request of a run.
///
/// One request per period, no bursts, so fractional rates such as 0.3 rps
/// work as a plain minimum interval.
pub struct RateLimiter {
    period: Duration,
    limiter: Option<DirectRateLimiter>,
}

impl RateLimiter {
    /// Allow at most `rps` requests per second. Non-positive values disable limiting.
    pub fn per_second(rps: f64) -> Self {
        let period = if rps.is_finite() && rps > 0.0 {
            Duration::from_secs_f64(1.0 / rps)
        } else {
            Duration::ZERO
        };
        Self {
            period,
            limiter: Quota::with_period(period).map(governor::RateLimiter::direct),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.period
    }

    /// Wait until the next request slot is free.
    pub async fn wait(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("period", &self.period)
            .finish()
    }
}

/// Rate-limited page fetcher used by the site extractors.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    limiter: RateLimiter,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
            limiter: RateLimiter::per_second(config.rate_limit_rps),
        })
    }

    /// Fetch a page body as text, classifying failures for the retry logic.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.limiter.wait().await;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| fetch_error(url, e))?;

        let status = response.status();
        match classify_status(status) {
            StatusClass::Success => {}
            StatusClass::Transient => {
                if status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::SERVICE_UNAVAILABLE
                {
                    if let Some(pause) = retry_after(response.headers()) {
                        let pause = pause.min(MAX_RETRY_AFTER);
                        log::warn!("{} returned {}, honoring Retry-After {:?}", url, status, pause);
                        tokio::time::sleep(pause).await;
                    }
                }
                return Err(AppError::transient_fetch(url, format!("HTTP {status}")));
            }
            StatusClass::Permanent => {
                return Err(AppError::parse(url, format!("HTTP {status}")));
            }
        }

        response.text().await.map_err(|e| fetch_error(url, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Success);
        assert_eq!(classify_status(StatusCode::CREATED), StatusClass::Success);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            StatusClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::REQUEST_TIMEOUT),
            StatusClass::Transient
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::Permanent);
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY),
            StatusClass::Permanent
        );
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("4"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(4)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_rate_limiter_interval() {
        assert_eq!(
            RateLimiter::per_second(0.5).min_interval(),
            Duration::from_secs(2)
        );
        assert!(RateLimiter::per_second(0.0).min_interval().is_zero());
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled_does_not_wait() {
        let limiter = RateLimiter::per_second(0.0);
        let started = std::time::Instant::now();
        for _ in 0..10 {
            limiter.wait().await;
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_fractional_rate_holds_second_request() {
        let limiter = RateLimiter::per_second(0.3);
        assert!(limiter.min_interval() > Duration::from_secs(3));

        limiter.wait().await;
        let second = tokio::time::timeout(Duration::from_millis(200), limiter.wait()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::per_second(20.0);
        let started = std::time::Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
