//! Opt-in limits on external calls made by workers
//!
//! Both limits are off by default. When set, every tool and synthesizer call
//! in a run shares one semaphore (calls in flight) and one direct rate
//! limiter (calls started per second). Waiting on either races against the
//! run's cancellation token.

use crate::config::LimitsConfig;
use crate::error::{Error, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Shared limiter for tool and synthesizer calls
pub struct CallLimiter {
    semaphore: Option<Arc<Semaphore>>,
    rate: Option<DefaultDirectRateLimiter>,
}

/// Held for the duration of one external call
pub struct CallPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl CallLimiter {
    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self {
            semaphore: None,
            rate: None,
        }
    }

    /// Build a limiter from configuration
    pub fn from_config(limits: &LimitsConfig) -> Result<Self> {
        let semaphore = match limits.max_concurrent_calls {
            Some(0) => return Err(Error::config("max_concurrent_calls must be at least 1")),
            Some(n) => Some(Arc::new(Semaphore::new(n))),
            None => None,
        };

        let rate = match limits.calls_per_second {
            Some(n) => {
                let per_second = NonZeroU32::new(n)
                    .ok_or_else(|| Error::config("calls_per_second must be at least 1"))?;
                Some(RateLimiter::direct(Quota::per_second(per_second)))
            }
            None => None,
        };

        Ok(Self { semaphore, rate })
    }

    /// Whether any limit is configured
    pub fn is_limited(&self) -> bool {
        self.semaphore.is_some() || self.rate.is_some()
    }

    /// Wait for a call slot, or fail if the run is cancelled first
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<CallPermit> {
        let permit = match &self.semaphore {
            Some(semaphore) => {
                let acquired = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(Error::cancelled("waiting for a call slot"));
                    }
                    permit = semaphore.clone().acquire_owned() => permit,
                };
                Some(acquired.map_err(|_| Error::other("call limiter closed"))?)
            }
            None => None,
        };

        if let Some(rate) = &self.rate {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(Error::cancelled("waiting for rate limit"));
                }
                _ = rate.until_ready() => {}
            }
        }

        Ok(CallPermit { _permit: permit })
    }

    /// Run `call` under the limits, abandoning it if the run is cancelled
    pub async fn run<F, T>(&self, cancel: &CancellationToken, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire(cancel).await?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled(format!("{} abandoned", what))),
            out = call => Ok(out),
        }
    }
}

impl Default for CallLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl std::fmt::Debug for CallLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallLimiter")
            .field(
                "available_slots",
                &self.semaphore.as_ref().map(|s| s.available_permits()),
            )
            .field("rate_limited", &self.rate.is_some())
            .finish()
    }
}
