mod pool;

pub use pool::{ConnectionPool, PoolSnapshot};

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{AnalysisError, Result};

/// A fully-materialized HTTP request, replayable across retry attempts. The
/// body is buffered up front so each attempt can send an identical request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub headers: reqwest::header::HeaderMap,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self { method: reqwest::Method::POST, url: url.into(), headers: reqwest::header::HeaderMap::new(), body }
    }

    pub fn header(mut self, name: &'static str, value: impl AsRef<str>) -> Self {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(value.as_ref()) {
            self.headers.insert(name, value);
        }
        self
    }
}

/// Executes requests through a shared connection pool with retry-with-replay:
/// transport errors, HTTP 429, and 5xx are retried with cancellable
/// exponential backoff; anything else is surfaced immediately.
pub struct RetryingTransport {
    pool: ConnectionPool,
    config: HttpConfig,
}

impl RetryingTransport {
    pub fn new(pool: ConnectionPool, config: HttpConfig) -> Self {
        Self { pool, config }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub async fn execute(&self, ctx: &CancellationToken, request: HttpRequest) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        let mut cumulative_wait = Duration::ZERO;

        loop {
            attempt += 1;
            if ctx.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            let _guard = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(AnalysisError::Cancelled),
                guard = self.pool.guard() => guard,
            };
            let builder = self
                .pool
                .client()
                .request(request.method.clone(), &request.url)
                .headers(request.headers.clone())
                .body(request.body.clone());

            match builder.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt >= self.config.max_attempts {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(AnalysisError::Model { status: status.as_u16(), attempts: attempt, body });
                    }
                    warn!(attempt, status = status.as_u16(), "retrying after non-success response");
                }
                Err(source) => {
                    if attempt >= self.config.max_attempts {
                        return Err(AnalysisError::Transport { attempts: attempt, source });
                    }
                    warn!(attempt, error = %source, "retrying after transport error");
                }
            }

            let wait = backoff_for(attempt, self.config.base_backoff, self.config.max_backoff_per_attempt);
            cumulative_wait += wait;
            if cumulative_wait > self.config.max_total_wait {
                return Err(AnalysisError::RetryBudgetExceeded { attempts: attempt });
            }
            debug!(attempt, wait_ms = wait.as_millis(), "backing off before retry");
            wait_with_cancellation(ctx, wait).await?;
        }
    }
}

fn backoff_for(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let scaled = base.saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
    scaled.min(cap)
}

async fn wait_with_cancellation(ctx: &CancellationToken, dur: Duration) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(dur) => Ok(()),
        _ = ctx.cancelled() => Err(AnalysisError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(1);
        assert_eq!(backoff_for(1, base, cap), Duration::from_millis(100));
        assert_eq!(backoff_for(2, base, cap), Duration::from_millis(200));
        assert_eq!(backoff_for(3, base, cap), Duration::from_millis(400));
        assert_eq!(backoff_for(10, base, cap), cap);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_wait() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = wait_with_cancellation(&ctx, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
    }
}
