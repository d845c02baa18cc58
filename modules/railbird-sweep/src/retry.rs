//! Retry envelope for fetch and save calls.
//!
//! Retries only on rate-limit signals. Anything else surfaces immediately —
//! the job-stop policy for genuine errors lives in the engine, not here.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Rate-limit markers seen across the scraping proxy and the backend.
const RATE_LIMIT_MARKERS: [&str; 4] = ["429", "rate exceeded", "toomanyrequests", "rate limit"];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_attempts: 3,
        }
    }
}

pub fn is_rate_limited(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Run `f`, retrying on rate-limit errors with `base · 2^attempt` backoff
/// plus 0–250 ms jitter. The last error is returned once attempts run out.
pub async fn retry_rate_limited<T, E, F, Fut>(
    policy: RetryPolicy,
    op: &str,
    mut f: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let message = e.to_string();
                if !is_rate_limited(&message) || attempt + 1 >= policy.max_attempts.max(1) {
                    return Err(e);
                }

                let backoff = policy.base * 2u32.pow(attempt);
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                warn!(
                    op,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, retrying after backoff"
                );
                tokio::time::sleep(backoff + jitter).await;
                attempt += 1;
            }
        }
    }
}
