//! Bounded retry for outbound vendor calls.
//!
//! Network errors, 429 and 5xx responses are retried with exponential
//! backoff plus random jitter. Everything else is returned to the caller
//! on the first attempt.

use std::time::Duration;

use rand::Rng;
use reqwest::{RequestBuilder, Response, StatusCode};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let backoff = base_ms.saturating_mul(1u64 << attempt.min(10));
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base_ms / 2)
        };
        Duration::from_millis(backoff + jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Send `request`, retrying transient failures according to `policy`.
///
/// The final response is returned whatever its status; callers decide
/// what a non-success status means for them.
pub async fn send_with_retry(
    request: RequestBuilder,
    policy: &RetryPolicy,
) -> Result<Response, String> {
    let mut attempt = 0;

    loop {
        let pending = request
            .try_clone()
            .ok_or_else(|| "request cannot be retried (streaming body)".to_string())?;

        match pending.send().await {
            Ok(response) if is_retryable(response.status()) && attempt < policy.max_retries => {
                tracing::debug!(
                    "Retrying after HTTP {} (attempt {}/{})",
                    response.status(),
                    attempt + 1,
                    policy.max_retries
                );
            }
            Ok(response) => return Ok(response),
            Err(err) if attempt < policy.max_retries && (err.is_connect() || err.is_timeout()) => {
                tracing::debug!(
                    "Retrying after network error (attempt {}/{}): {}",
                    attempt + 1,
                    policy.max_retries,
                    err
                );
            }
            Err(err) => return Err(err.to_string()),
        }

        tokio::time::sleep(policy.delay_for(attempt)).await;
        attempt += 1;
    }
}
