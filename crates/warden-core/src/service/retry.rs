// Bounded retry execution for try-once lock operations
// Turns "try once, succeed or not" into "try until the policy gives up"

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use warden_common::{Result, WardenError};

/// Progress of a retry loop, handed to the policy after each failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryExecutionMetadata {
    /// Time since the first attempt started
    pub elapsed: Duration,
    /// 1-based number of attempts made so far
    pub attempt: u32,
}

impl RetryExecutionMetadata {
    pub fn new(elapsed: Duration, attempt: u32) -> Self {
        Self { elapsed, attempt }
    }
}

/// Decides whether a failed operation is attempted again and how long to wait
pub trait RetryPolicy: Send + Sync {
    fn can_retry(&self, metadata: &RetryExecutionMetadata) -> bool;

    fn delay_before_next_retry(&self, metadata: &RetryExecutionMetadata) -> Duration;
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for Arc<P> {
    fn can_retry(&self, metadata: &RetryExecutionMetadata) -> bool {
        (**self).can_retry(metadata)
    }

    fn delay_before_next_retry(&self, metadata: &RetryExecutionMetadata) -> Duration {
        (**self).delay_before_next_retry(metadata)
    }
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for &P {
    fn can_retry(&self, metadata: &RetryExecutionMetadata) -> bool {
        (**self).can_retry(metadata)
    }

    fn delay_before_next_retry(&self, metadata: &RetryExecutionMetadata) -> Duration {
        (**self).delay_before_next_retry(metadata)
    }
}

/// Single attempt, never retried
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn can_retry(&self, _metadata: &RetryExecutionMetadata) -> bool {
        false
    }

    fn delay_before_next_retry(&self, _metadata: &RetryExecutionMetadata) -> Duration {
        Duration::ZERO
    }
}

type DelayFn = dyn Fn(&RetryExecutionMetadata) -> Duration + Send + Sync;

/// Wait between two attempts
#[derive(Clone)]
pub enum RetryDelay {
    /// Same delay after every attempt
    Fixed(Duration),
    /// `step * attempt`, capped at `max`
    Linear { step: Duration, max: Duration },
    /// `base * 2^(attempt - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
    /// Arbitrary function of the attempt metadata
    Custom(Arc<DelayFn>),
}

impl RetryDelay {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&RetryExecutionMetadata) -> Duration + Send + Sync + 'static,
    {
        RetryDelay::Custom(Arc::new(f))
    }

    pub fn delay_for(&self, metadata: &RetryExecutionMetadata) -> Duration {
        let attempt = metadata.attempt.max(1);
        match self {
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::Linear { step, max } => step.saturating_mul(attempt).min(*max),
            RetryDelay::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt - 1);
                base.saturating_mul(factor).min(*max)
            }
            RetryDelay::Custom(f) => f(metadata),
        }
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            RetryDelay::Linear { step, max } => f
                .debug_struct("Linear")
                .field("step", step)
                .field("max", max)
                .finish(),
            RetryDelay::Exponential { base, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            RetryDelay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Keeps retrying while less than `timeout` has elapsed since the first attempt
#[derive(Debug, Clone)]
pub struct TimeoutRetryPolicy {
    timeout: Duration,
    delay: RetryDelay,
}

impl TimeoutRetryPolicy {
    pub fn new(timeout: Duration, delay: RetryDelay) -> Self {
        Self { timeout, delay }
    }

    /// Timeout-bounded policy with a constant wait between attempts
    pub fn fixed(timeout: Duration, delay: Duration) -> Self {
        Self::new(timeout, RetryDelay::Fixed(delay))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn delay(&self) -> &RetryDelay {
        &self.delay
    }
}

impl RetryPolicy for TimeoutRetryPolicy {
    fn can_retry(&self, metadata: &RetryExecutionMetadata) -> bool {
        metadata.elapsed < self.timeout
    }

    fn delay_before_next_retry(&self, metadata: &RetryExecutionMetadata) -> Duration {
        self.delay.delay_for(metadata)
    }
}

/// Run `operation` until it succeeds or `policy` stops allowing retries.
///
/// The operation returns `Ok(Some(value))` on success and `Ok(None)` for a
/// definitive try-once failure (for example losing a lock race). Retryable
/// errors are absorbed and kept as the cause of the final
/// `RetryExecutionFailed`; any other error propagates immediately.
///
/// The policy is consulted both before and after the inter-attempt delay, and
/// the delay itself is interrupted by `cancel`. No attempt is started once
/// cancellation has been observed.
pub async fn execute_with_retries<T, F, Fut, P>(
    mut operation: F,
    policy: &P,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
    P: RetryPolicy + ?Sized,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(WardenError::Cancelled);
        }

        attempt = attempt.saturating_add(1);
        let last_error = match operation().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => None,
            Err(e) if e.is_retryable() => {
                debug!(attempt, error = %e, "Retryable failure, will consult retry policy");
                Some(e)
            }
            Err(e) => return Err(e),
        };

        let metadata = RetryExecutionMetadata::new(started.elapsed(), attempt);
        if !policy.can_retry(&metadata) {
            return Err(exhausted(metadata, last_error));
        }

        let delay = policy.delay_before_next_retry(&metadata);
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WardenError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let metadata = RetryExecutionMetadata::new(started.elapsed(), attempt);
        if !policy.can_retry(&metadata) {
            return Err(exhausted(metadata, last_error));
        }
    }
}

fn exhausted(metadata: RetryExecutionMetadata, last_error: Option<WardenError>) -> WardenError {
    warn!(
        attempts = metadata.attempt,
        elapsed_ms = metadata.elapsed.as_millis() as u64,
        "Retry policy exhausted"
    );
    WardenError::RetryExecutionFailed {
        attempts: metadata.attempt,
        elapsed: metadata.elapsed,
        source: last_error.map(Box::new),
    }
}
