//! Retry and rate-limit governor.
//!
//! Every outbound call, and the console workflow as a whole, runs inside a
//! [`Governor`]. Components report failures as [`ProvisionError`]s; the
//! governor classifies each one (see [`ProvisionError::disposition`]) and
//! either backs off and tries again or gives up. Nothing else in the crate
//! retries on its own.
//!
//! Outcome table for a single HTTP request:
//!
//! | outcome                        | action                              |
//! |--------------------------------|-------------------------------------|
//! | transport error                | retry after `transient_wait`        |
//! | 2xx                            | success                             |
//! | 404                            | [`Fetched::NotFound`], no retry     |
//! | 429                            | retry after `rate_limit_wait`       |
//! | other status                   | retry after `transient_wait`        |
//! | 2xx carrying an error marker   | retry within `embedded_error_budget`|
//!
//! All waits go through [`Governor::pause`], which returns early with
//! [`ProvisionError::Cancelled`] when the governor's cancellation token fires.

use std::future::Future;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::directory::DirectoryApi;
use crate::error::{Disposition, ProvisionError};

/// Provider error code returned inside a 2xx body when the request was
/// actually throttled.
pub const EMBEDDED_RATE_LIMIT_MARKER: &str = "E0000047";

/// Default attempt budget (request and workflow level).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;

/// Header names carrying the directory's rate limit quota.
const RATE_LIMIT_LIMIT_HEADER: &str = "x-rate-limit-limit";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-rate-limit-remaining";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after a transport error or an unexpected status.
    pub transient_wait: Duration,
    /// Wait after a 429.
    pub rate_limit_wait: Duration,
    /// Attempts allowed for a 2xx body carrying an embedded error marker.
    pub embedded_error_budget: u32,
    /// Wait between embedded-error attempts.
    pub embedded_error_wait: Duration,
    /// Remaining-quota percentage below which a workflow cools down first.
    pub throttle_threshold_percent: u32,
    /// Cooldown applied when the quota is under the threshold.
    pub throttle_cooldown: Duration,
}

impl RetryPolicy {
    /// Policy for individual directory requests.
    pub fn request(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            transient_wait: Duration::from_secs(30),
            rate_limit_wait: Duration::from_secs(45),
            embedded_error_budget: 10,
            embedded_error_wait: Duration::from_secs(1),
            throttle_threshold_percent: 50,
            throttle_cooldown: Duration::from_secs(55),
        }
    }

    /// Policy for restarting the whole console workflow.
    pub fn workflow(max_attempts: u32) -> Self {
        Self {
            transient_wait: Duration::from_secs(45),
            ..Self::request(max_attempts)
        }
    }

    /// Millisecond waits for tests.
    pub fn for_testing(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            transient_wait: Duration::from_millis(5),
            rate_limit_wait: Duration::from_millis(10),
            embedded_error_budget: 3,
            embedded_error_wait: Duration::from_millis(1),
            throttle_threshold_percent: 50,
            throttle_cooldown: Duration::from_millis(20),
        }
    }

    fn wait_for(&self, disposition: Disposition) -> Option<Duration> {
        match disposition {
            Disposition::Transient => Some(self.transient_wait),
            Disposition::RateLimited => Some(self.rate_limit_wait),
            Disposition::Fatal => None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::request(DEFAULT_MAX_ATTEMPTS)
    }
}

/// A fully read 2xx response.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// Result of a governed request. 404 is a signal, not an error.
#[derive(Debug, Clone)]
pub enum Fetched {
    Found(Page),
    NotFound,
}

impl Fetched {
    pub fn into_page(self) -> Option<Page> {
        match self {
            Fetched::Found(page) => Some(page),
            Fetched::NotFound => None,
        }
    }
}

/// Directory quota as reported by the rate limit headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitQuota {
    pub limit: u32,
    pub remaining: u32,
}

impl RateLimitQuota {
    /// Returns `None` when either header is absent, unparsable, or the limit is zero.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| -> Option<u32> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        };
        let limit = read(RATE_LIMIT_LIMIT_HEADER)?;
        let remaining = read(RATE_LIMIT_REMAINING_HEADER)?;
        if limit == 0 {
            return None;
        }
        Some(Self { limit, remaining })
    }

    /// Share of the quota left, capped at 100.
    pub fn remaining_percent(&self) -> u32 {
        let remaining = self.remaining.min(self.limit);
        ((u64::from(remaining) * 100) / u64::from(self.limit)) as u32
    }
}

#[derive(Debug, Clone)]
pub struct Governor {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Governor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_cancellation(policy, CancellationToken::new())
    }

    pub fn with_cancellation(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fails with `Cancelled` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), ProvisionError> {
        if self.cancel.is_cancelled() {
            Err(ProvisionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep that wakes early on cancellation.
    pub async fn pause(&self, wait: Duration) -> Result<(), ProvisionError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ProvisionError::Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    /// Run `op` until it succeeds, fails fatally, or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProvisionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProvisionError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.checkpoint()?;

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(wait) = self.policy.wait_for(err.disposition()) else {
                return Err(err);
            };

            if attempt >= max_attempts {
                warn!(
                    label = label,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %err,
                    "Attempt budget exhausted"
                );
                return Err(err.exhausted());
            }

            match err.disposition() {
                Disposition::RateLimited => warn!(
                    label = label,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    backoff_ms = wait.as_millis() as u64,
                    "Rate limited, backing off"
                ),
                _ => debug!(
                    label = label,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    backoff_ms = wait.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                ),
            }

            self.pause(wait).await?;
            attempt += 1;
        }
    }

    /// Send a request built fresh by `build` for every attempt.
    pub async fn send<F>(&self, label: &str, build: F) -> Result<Fetched, ProvisionError>
    where
        F: Fn() -> RequestBuilder,
    {
        self.retry(label, |_| {
            let request = build();
            async move { read_response(request).await }
        })
        .await
    }

    /// Like [`send`](Self::send), but a 2xx body containing `marker` is treated
    /// as a disguised rate limit and retried within the embedded-error budget.
    pub async fn send_watching<F>(
        &self,
        label: &str,
        marker: &str,
        build: F,
    ) -> Result<Fetched, ProvisionError>
    where
        F: Fn() -> RequestBuilder,
    {
        let budget = self.policy.embedded_error_budget.max(1);
        let mut last_url = String::new();

        for round in 1..=budget {
            match self.send(label, &build).await? {
                Fetched::Found(page) if page.body.contains(marker) => {
                    warn!(
                        label = label,
                        url = %page.url,
                        round = round,
                        budget = budget,
                        marker = marker,
                        "Provider error embedded in successful response"
                    );
                    last_url = page.url;
                    if round < budget {
                        self.pause(self.policy.embedded_error_wait).await?;
                    }
                }
                other => return Ok(other),
            }
        }

        Err(ProvisionError::EmbeddedError {
            url: last_url,
            marker: marker.to_string(),
        })
    }

    /// Proactive throttling ahead of a workflow run.
    ///
    /// Reads the directory quota and sleeps the cooldown when less than the
    /// threshold percentage remains. A quota read that fails outright is treated
    /// as a low quota; a successful read without quota headers is not.
    pub async fn throttle(
        &self,
        directory: &dyn DirectoryApi,
        app_id: &str,
    ) -> Result<(), ProvisionError> {
        let threshold = self.policy.throttle_threshold_percent;

        match directory.rate_limit_quota(app_id).await {
            Ok(Some(quota)) => {
                let percent = quota.remaining_percent();
                if percent < threshold {
                    info!(
                        remaining = quota.remaining,
                        limit = quota.limit,
                        percent = percent,
                        cooldown_ms = self.policy.throttle_cooldown.as_millis() as u64,
                        "Rate limit quota low, cooling down before workflow"
                    );
                    self.pause(self.policy.throttle_cooldown).await?;
                } else {
                    debug!(remaining = quota.remaining, limit = quota.limit, "Rate limit quota ok");
                }
            }
            Ok(None) => {
                warn!(app_id = app_id, "Rate limit headers missing, proceeding without cooldown");
            }
            Err(ProvisionError::Cancelled) => return Err(ProvisionError::Cancelled),
            Err(err) => {
                warn!(error = %err, "Rate limit quota read failed, cooling down before workflow");
                self.pause(self.policy.throttle_cooldown).await?;
            }
        }

        Ok(())
    }
}

/// Send once and classify the response. 404 maps to `Fetched::NotFound`.
async fn read_response(request: RequestBuilder) -> Result<Fetched, ProvisionError> {
    let response = request.send().await?;
    let status = response.status();
    let url = response.url().to_string();

    if status == StatusCode::NOT_FOUND {
        debug!(url = %url, "Resource not found");
        return Ok(Fetched::NotFound);
    }

    let headers = response.headers().clone();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ProvisionError::from_status(status, &url, &body));
    }

    Ok(Fetched::Found(Page {
        url,
        status,
        headers,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;

    use futures::future::BoxFuture;
    use reqwest::header::HeaderValue;
    use tokio::time::Instant;

    use super::*;
    use crate::models::Application;

    fn status_error(code: u16) -> ProvisionError {
        ProvisionError::from_status(StatusCode::from_u16(code).unwrap(), "http://console/step", "")
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            transient_wait: Duration::from_secs(30),
            rate_limit_wait: Duration::from_secs(45),
            ..RetryPolicy::request(max_attempts)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_success() {
        let governor = Governor::new(policy(5));
        let mut statuses = VecDeque::from([429u16, 429, 200]);
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let result = governor
            .retry("test", |_| {
                calls.set(calls.get() + 1);
                let status = statuses.pop_front().expect("too many attempts");
                async move {
                    if status == 200 {
                        Ok(status)
                    } else {
                        Err(status_error(status))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 200);
        assert_eq!(calls.get(), 3);
        // Exactly two rate limit backoffs
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(90));
        assert!(elapsed < Duration::from_secs(91));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_budget_exhausted() {
        let governor = Governor::new(policy(4));
        let calls = Cell::new(0u32);

        let result: Result<(), _> = governor
            .retry("test", |_| {
                calls.set(calls.get() + 1);
                async { Err(status_error(429)) }
            })
            .await;

        assert_eq!(calls.get(), 4);
        match result {
            Err(ProvisionError::RateLimitExceeded { url }) => {
                assert_eq!(url, "http://console/step")
            }
            other => panic!("expected RateLimitExceeded, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_use_short_backoff() {
        let governor = Governor::new(policy(3));
        let start = Instant::now();

        let result = governor
            .retry("test", |attempt| async move {
                if attempt < 2 {
                    Err(status_error(502))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let governor = Governor::new(policy(10));
        let calls = Cell::new(0u32);

        let result: Result<(), _> = governor
            .retry("test", |_| {
                calls.set(calls.get() + 1);
                async { Err(ProvisionError::AuthenticationFailure("bad password".into())) }
            })
            .await;

        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(ProvisionError::AuthenticationFailure(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let governor = Governor::with_cancellation(policy(10), cancel.clone());
        let start = Instant::now();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = governor
            .retry("test", |_| async { Err(status_error(429)) })
            .await;

        assert!(matches!(result, Err(ProvisionError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(45));
    }

    #[test]
    fn test_quota_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Rate-Limit-Limit", HeaderValue::from_static("600"));
        headers.insert("X-Rate-Limit-Remaining", HeaderValue::from_static("240"));

        let quota = RateLimitQuota::from_headers(&headers).unwrap();
        assert_eq!(quota, RateLimitQuota { limit: 600, remaining: 240 });
        assert_eq!(quota.remaining_percent(), 40);
    }

    #[test]
    fn test_quota_remaining_above_limit_is_full() {
        let quota = RateLimitQuota {
            limit: 1,
            remaining: 4_000_000_000,
        };
        assert_eq!(quota.remaining_percent(), 100);

        let mut headers = HeaderMap::new();
        headers.insert("X-Rate-Limit-Limit", HeaderValue::from_static("600"));
        headers.insert("X-Rate-Limit-Remaining", HeaderValue::from_static("4294967295"));
        let quota = RateLimitQuota::from_headers(&headers).unwrap();
        assert_eq!(quota.remaining_percent(), 100);
    }

    #[test]
    fn test_quota_missing_or_zero_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(RateLimitQuota::from_headers(&headers), None);

        headers.insert("X-Rate-Limit-Limit", HeaderValue::from_static("0"));
        headers.insert("X-Rate-Limit-Remaining", HeaderValue::from_static("0"));
        assert_eq!(RateLimitQuota::from_headers(&headers), None);

        headers.insert("X-Rate-Limit-Limit", HeaderValue::from_static("abc"));
        assert_eq!(RateLimitQuota::from_headers(&headers), None);
    }

    struct QuotaOnly(Result<Option<RateLimitQuota>, fn() -> ProvisionError>);

    impl DirectoryApi for QuotaOnly {
        fn get_application<'a>(
            &'a self,
            _app_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<Application>, ProvisionError>> {
            Box::pin(async { Ok(None) })
        }

        fn rate_limit_quota<'a>(
            &'a self,
            _app_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<RateLimitQuota>, ProvisionError>> {
            let result = self.0.map_err(|make| make());
            Box::pin(async move { result })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_cools_down_below_threshold() {
        let governor = Governor::new(policy(3));
        let low = QuotaOnly(Ok(Some(RateLimitQuota { limit: 100, remaining: 49 })));
        let start = Instant::now();
        governor.throttle(&low, "0oa1").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(55));

        let healthy = QuotaOnly(Ok(Some(RateLimitQuota { limit: 100, remaining: 50 })));
        let start = Instant::now();
        governor.throttle(&healthy, "0oa1").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_tolerates_missing_quota() {
        let governor = Governor::new(policy(3));

        let unknown = QuotaOnly(Ok(None));
        let start = Instant::now();
        governor.throttle(&unknown, "0oa1").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        let failing = QuotaOnly(Err(|| ProvisionError::RateLimitExceeded {
            url: "http://directory".into(),
        }));
        let start = Instant::now();
        governor.throttle(&failing, "0oa1").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(55));
    }
}
