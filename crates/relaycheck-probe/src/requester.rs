//! Retrying requester with linear backoff.
//!
//! A request is attempted once, then retried up to `retries` more times on
//! transport failure. The wait before the n-th retry is `n * retry_delay`.
//! Any HTTP response, whatever its status, ends the loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{ProbeError, ProbeResult};
use crate::transport::{ProbeRequest, ProbeResponse, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Base backoff unit.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn no_retries() -> Self {
        Self {
            retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// Wait before the `retry`-th retry (1-based).
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.retry_delay.checked_mul(retry).unwrap_or(Duration::MAX)
    }
}

#[derive(Clone)]
pub struct Requester {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl Requester {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Send `request`, retrying transport failures per the policy.
    ///
    /// Exhausting the retries returns the last transport error.
    pub async fn request(&self, request: &ProbeRequest) -> ProbeResult<ProbeResponse> {
        let mut retry = 0;
        loop {
            match self.transport.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if retry < self.policy.retries => {
                    retry += 1;
                    let delay = self.policy.delay_before(retry);
                    debug!(
                        uri = %request.uri,
                        attempt = retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ProbeError::Exhausted {
                        attempts: retry + 1,
                        source: e,
                    });
                }
            }
        }
    }
}
