//! Retry decisions for failed responses.
//!
//! Only errors the server itself reports as transient are retried. The
//! response body must be a JSON [`ErrorPayload`] whose code is in the
//! retryable set. The wait grows exponentially with the attempt number and
//! carries random jitter, and a call stops retrying once the next wait would
//! push it past the configured retry budget.

use crate::payload::{ErrorDecoder, ErrorPayload, JsonErrorDecoder};
use crate::Response;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// The service is down for maintenance.
pub const SYSTEM_MAINTENANCE: i32 = 4001;
/// The server timed out while processing the request.
pub const SERVER_TIMEOUT: i32 = 4002;
/// The caller exceeded the rate limit.
pub const RATE_LIMIT_EXCEEDED: i32 = 4003;
/// An unexpected error occurred on the server.
pub const UNEXPECTED_ERROR: i32 = 4004;

/// Error codes the server uses to signal a transient condition.
pub const RETRYABLE_ERROR_CODES: [i32; 4] = [
    SYSTEM_MAINTENANCE,
    SERVER_TIMEOUT,
    RATE_LIMIT_EXCEEDED,
    UNEXPECTED_ERROR,
];

/// Default upper bound on the time a call may spend retrying.
pub const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_millis(15_000);

/// Decides which error payloads are worth another attempt and how long to
/// wait before it.
///
/// # Examples
///
/// ```
/// use gridwire::retry::RetryPolicy;
/// use gridwire::ErrorPayload;
/// use std::time::Duration;
///
/// /// Retries only rate limiting, with a flat one second wait.
/// struct RateLimitOnly;
///
/// impl RetryPolicy for RateLimitOnly {
///     fn is_retryable(&self, payload: &ErrorPayload) -> bool {
///         payload.error_code == gridwire::retry::RATE_LIMIT_EXCEEDED
///     }
///
///     fn calc_backoff(
///         &self,
///         _attempt: usize,
///         _elapsed: Duration,
///         _payload: &ErrorPayload,
///     ) -> Duration {
///         Duration::from_secs(1)
///     }
/// }
/// ```
pub trait RetryPolicy: Send + Sync {
    /// Returns `true` if the payload reports a transient condition.
    fn is_retryable(&self, payload: &ErrorPayload) -> bool {
        RETRYABLE_ERROR_CODES.contains(&payload.error_code)
    }

    /// Returns the wait before the next attempt.
    ///
    /// * `attempt` - The number of attempts made so far (1 after the first failure)
    /// * `elapsed` - Time spent on the call since the first attempt started
    fn calc_backoff(&self, attempt: usize, elapsed: Duration, payload: &ErrorPayload) -> Duration;
}

/// Exponential backoff over the retryable error codes:
/// `2^attempt` seconds plus up to a second of random jitter.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    /// Whether to add random jitter to delays.
    ///
    /// Jitter keeps concurrent callers that hit the same condition from
    /// retrying in lockstep. Disable only for deterministic tests.
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self { jitter: true }
    }
}

impl ExponentialBackoff {
    /// The delay before jitter: `2^attempt` seconds, saturating.
    ///
    /// ```
    /// use gridwire::retry::ExponentialBackoff;
    /// use std::time::Duration;
    ///
    /// assert_eq!(ExponentialBackoff::base_delay(1), Duration::from_secs(2));
    /// assert_eq!(ExponentialBackoff::base_delay(3), Duration::from_secs(8));
    /// ```
    pub fn base_delay(attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
        Duration::from_secs(2u64.saturating_pow(exponent))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn calc_backoff(
        &self,
        attempt: usize,
        _elapsed: Duration,
        _payload: &ErrorPayload,
    ) -> Duration {
        let base = Self::base_delay(attempt);
        if self.jitter {
            let jitter_ms = rand::thread_rng().gen_range(0..1000u64);
            base.saturating_add(Duration::from_millis(jitter_ms))
        } else {
            base
        }
    }
}

/// Why a failed response is not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The body declares a content type other than JSON.
    NotJson(String),
    /// The body is missing or could not be decoded into an error payload.
    Undecodable(String),
    /// The error code is not one the server marks as transient.
    NotRetryable(i32),
    /// Waiting for the next attempt would exceed the retry budget.
    BudgetExhausted {
        /// Time already spent on the call.
        elapsed: Duration,
        /// The wait the policy asked for.
        backoff: Duration,
    },
}

/// The outcome of evaluating a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then try again.
    Retry(Duration),
    /// Return the failed response to the caller.
    GiveUp(GiveUpReason),
}

/// The backoff sleep was cut short.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Backoff sleep was interrupted")]
pub struct Interrupted;

/// Future returned by [`Sleeper::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Interrupted>> + Send + 'a>>;

/// Waits out backoff delays.
pub trait Sleeper: Send + Sync {
    /// Sleeps for `delay`, or reports that the sleep was interrupted.
    fn sleep(&self, delay: Duration) -> SleepFuture<'_>;
}

/// Sleeps on the tokio timer. Never interrupted.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, delay: Duration) -> SleepFuture<'_> {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
    }
}

/// A tokio sleeper that can be interrupted from another task.
///
/// Interruption is sticky: once [`interrupt`](InterruptibleSleeper::interrupt)
/// has been called, every current and future sleep reports [`Interrupted`]
/// until [`clear`](InterruptibleSleeper::clear).
#[derive(Debug, Default)]
pub struct InterruptibleSleeper {
    interrupted: AtomicBool,
    notify: Notify,
}

impl InterruptibleSleeper {
    /// Creates a sleeper that has not been interrupted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupts in-flight sleeps and makes later ones fail immediately.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Re-arms the sleeper after an interrupt.
    pub fn clear(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }
}

impl Sleeper for InterruptibleSleeper {
    fn sleep(&self, delay: Duration) -> SleepFuture<'_> {
        Box::pin(async move {
            let mut notified = std::pin::pin!(self.notify.notified());
            // register before checking the flag so a concurrent interrupt is not missed
            notified.as_mut().enable();
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(Interrupted);
            }
            match tokio::time::timeout(delay, notified).await {
                Ok(()) => Err(Interrupted),
                Err(_elapsed) => Ok(()),
            }
        })
    }
}

/// Evaluates failed responses against a [`RetryPolicy`] and a retry budget,
/// sleeping through a [`Sleeper`] when another attempt is warranted.
#[derive(Clone)]
pub struct Retrier {
    policy: Arc<dyn RetryPolicy>,
    decoder: Arc<dyn ErrorDecoder>,
    sleeper: Arc<dyn Sleeper>,
    max_retry_time: Duration,
}

impl Retrier {
    /// Creates a retrier with the default policy, decoder and sleeper.
    pub fn new(max_retry_time: Duration) -> Self {
        Self {
            policy: Arc::new(ExponentialBackoff::default()),
            decoder: Arc::new(JsonErrorDecoder),
            sleeper: Arc::new(TokioSleeper),
            max_retry_time,
        }
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the error payload decoder.
    pub fn with_decoder(mut self, decoder: Arc<dyn ErrorDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replaces the sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Decides, without sleeping, whether `response` deserves another attempt.
    pub fn decide(&self, attempt: usize, elapsed: Duration, response: &Response) -> RetryDecision {
        if let Some(content_type) = response.content_type() {
            if !is_json(content_type) {
                return RetryDecision::GiveUp(GiveUpReason::NotJson(content_type.to_string()));
            }
        }

        let payload = match response.error_payload(self.decoder.as_ref()) {
            Ok(payload) => payload,
            Err(e) => return RetryDecision::GiveUp(GiveUpReason::Undecodable(e.to_string())),
        };

        if !self.policy.is_retryable(&payload) {
            return RetryDecision::GiveUp(GiveUpReason::NotRetryable(payload.error_code));
        }

        let backoff = self.policy.calc_backoff(attempt, elapsed, &payload);
        if elapsed.saturating_add(backoff) > self.max_retry_time {
            return RetryDecision::GiveUp(GiveUpReason::BudgetExhausted { elapsed, backoff });
        }
        RetryDecision::Retry(backoff)
    }

    /// Returns `true` after sleeping if another attempt should be made.
    ///
    /// Returns `false` without sleeping when the response is not retryable
    /// or the budget would be exceeded, and `false` when the sleep is
    /// interrupted.
    pub async fn should_retry(
        &self,
        attempt: usize,
        elapsed: Duration,
        response: &Response,
    ) -> bool {
        match self.decide(attempt, elapsed, response) {
            RetryDecision::Retry(delay) => {
                tracing::info!(
                    delay_ms = delay.as_millis(),
                    attempt = attempt,
                    elapsed_ms = elapsed.as_millis(),
                    "Retrying request after delay"
                );
                match self.sleeper.sleep(delay).await {
                    Ok(()) => true,
                    Err(Interrupted) => {
                        tracing::warn!(attempt = attempt, "Backoff interrupted, not retrying");
                        false
                    }
                }
            }
            RetryDecision::GiveUp(reason) => {
                tracing::debug!(
                    attempt = attempt,
                    status = response.status.as_u16(),
                    reason = ?reason,
                    "Not retrying request"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("max_retry_time", &self.max_retry_time)
            .finish_non_exhaustive()
    }
}

/// Returns `true` for `application/json`, ignoring parameters and case.
fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|media_type| media_type.eq_ignore_ascii_case(crate::JSON_CONTENT_TYPE))
}
