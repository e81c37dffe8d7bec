// Process-wide quota limiter for outbound classifier calls.
//
// Two limits combine here:
// - a governor rate limiter that bounds the request rate the external service sees
// - a semaphore that bounds how many calls are outstanding at once
//
// `acquire` never waits longer than the caller allows. Running out of quota is
// reported as `RateLimited` so the classifier client can treat it like any
// other retryable failure.

use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Stand-in deadline when `now + max_wait` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("classifier quota exhausted after waiting {0:?}")]
    RateLimited(Duration),
}

/// Limits applied by [`QuotaLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Burst size: how many calls can go out back to back.
    pub capacity: u32,
    /// One more call is allowed each time this period elapses.
    pub replenish_every: Duration,
    /// Maximum classifier calls in flight at any time.
    pub max_concurrent: usize,
}

impl RateLimitConfig {
    /// Convenience for "N requests per minute".
    pub fn per_minute(requests: u32, max_concurrent: usize) -> Self {
        let requests = requests.max(1);
        Self {
            capacity: requests,
            replenish_every: Duration::from_secs(60) / requests,
            max_concurrent: max_concurrent.max(1),
        }
    }

    fn quota(&self) -> Option<Quota> {
        let burst = NonZeroU32::new(self.capacity.max(1))?;
        Quota::with_period(self.replenish_every).map(|quota| quota.allow_burst(burst))
    }
}

pub struct QuotaLimiter {
    /// `None` means calls are only bounded by the concurrency slots.
    rate: Option<DirectRateLimiter>,
    in_flight: Arc<Semaphore>,
}

/// Held for the duration of one classifier call. Dropping it frees the
/// concurrency slot; the rate cell it consumed is not returned.
#[derive(Debug)]
pub struct QuotaPermit {
    _slot: OwnedSemaphorePermit,
}

impl QuotaLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let rate = match config.quota() {
            Some(quota) => Some(RateLimiter::direct(quota)),
            None => {
                tracing::warn!(?config, "Zero replenish period, classifier rate is unbounded");
                None
            }
        };
        Self {
            rate,
            in_flight: Arc::new(Semaphore::new(config.max_concurrent.clamp(1, Semaphore::MAX_PERMITS))),
        }
    }

    /// A limiter that never throttles. Useful for tests and local runs.
    pub fn unlimited() -> Self {
        Self {
            rate: None,
            in_flight: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
        }
    }

    /// Take one concurrency slot and one rate cell, waiting at most `max_wait`.
    pub async fn acquire(&self, max_wait: Duration) -> Result<QuotaPermit, RateLimitError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(max_wait)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);

        let slot = match self.in_flight.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(_) => {
                match tokio::time::timeout_at(deadline, self.in_flight.clone().acquire_owned())
                    .await
                {
                    Ok(Ok(slot)) => slot,
                    // Semaphore is never closed, so the only real failure is the deadline.
                    _ => return Err(RateLimitError::RateLimited(max_wait)),
                }
            }
        };

        let Some(rate) = &self.rate else {
            return Ok(QuotaPermit { _slot: slot });
        };
        if rate.check().is_ok() {
            return Ok(QuotaPermit { _slot: slot });
        }

        match tokio::time::timeout_at(deadline, rate.until_ready()).await {
            Ok(()) => Ok(QuotaPermit { _slot: slot }),
            Err(_) => {
                tracing::debug!(?max_wait, "Classifier quota exhausted");
                Err(RateLimitError::RateLimited(max_wait))
            }
        }
    }
}
