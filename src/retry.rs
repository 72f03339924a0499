//! Bounded retry with exponential backoff and jitter.
//!
//! Attempt `n` (zero-based) that fails with a retryable error is followed by a
//! sleep of `base_delay * backoff_multiplier^n`, capped by `max_delay`, plus up
//! to 10% jitter. Sleeps end early when the policy deadline would be crossed or
//! the cancellation token fires; the last failure is then returned as is.

use crate::core::RetryConfig;
use crate::errors::{Classify, ErrorCategory, ErrorInfo};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type RetryPredicate = Arc<dyn Fn(&ErrorInfo) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Option<Duration>,
    pub jitter: bool,
    /// Retries stop once sleeping would run past this instant.
    pub deadline: Option<Instant>,
    retryable: RetryPredicate,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ErrorInfo) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Retry only errors in `categories`.
    pub fn retry_on(self, categories: Vec<ErrorCategory>) -> Self {
        self.with_retryable(move |error| categories.contains(&error.category))
    }

    /// Never retry `category`, whatever the current predicate says.
    pub fn excluding(mut self, category: ErrorCategory) -> Self {
        let inner = Arc::clone(&self.retryable);
        self.retryable = Arc::new(move |error: &ErrorInfo| {
            error.category != category && inner(error)
        });
        self
    }

    pub fn is_retryable(&self, error: &ErrorInfo) -> bool {
        (self.retryable)(error)
    }

    /// Backoff before the retry that follows failed attempt `attempt`, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        let delay = if secs.is_finite() && secs < u64::MAX as f64 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::MAX
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter {
            delay.saturating_add(delay.mul_f64(0.1 * jitter_fraction()))
        } else {
            delay
        }
    }

    /// True when sleeping `delay` from now would pass the deadline.
    fn exceeds_deadline(&self, delay: Duration) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() + delay >= deadline,
            None => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: None,
            jitter: true,
            deadline: None,
            retryable: Arc::new(|error: &ErrorInfo| error.category.is_transient()),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let mut policy = RetryPolicy::new(config.max_attempts)
            .with_base_delay(Duration::from_millis(config.base_delay_ms))
            .with_backoff_multiplier(config.backoff_multiplier)
            .with_jitter(config.jitter)
            .retry_on(config.retry_on.clone());
        if let Some(max_delay_ms) = config.max_delay_ms {
            policy = policy.with_max_delay(Duration::from_millis(max_delay_ms));
        }
        policy
    }
}

/// Uniform-ish value in `[0, 1)` taken from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

/// Sleeps for `delay`; returns false if `cancel` fired first.
async fn cancellable_sleep(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = token.cancelled() => false,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

type RetryObserver<'a> = Box<dyn Fn(&ErrorInfo, u32) + Send + Sync + 'a>;

/// Runs operations under a [`RetryPolicy`].
pub struct Retrier<'a> {
    policy: &'a RetryPolicy,
    cancel: Option<CancellationToken>,
    on_retry: Option<RetryObserver<'a>>,
}

impl<'a> Retrier<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            cancel: None,
            on_retry: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Called with the error and the 1-based number of the failed attempt before each retry.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ErrorInfo, u32) + Send + Sync + 'a,
    {
        self.on_retry = Some(Box::new(observer));
        self
    }

    /// Decides whether failed attempt `attempt` may be retried, and sleeps if so.
    async fn backoff(&self, attempt: u32, error: &ErrorInfo) -> bool {
        let max_attempts = self.policy.max_attempts.max(1);
        if attempt + 1 >= max_attempts {
            warn!(attempts = max_attempts, error = %error, "operation failed after all attempts");
            return false;
        }
        if !self.policy.is_retryable(error) {
            debug!(category = %error.category, "error is not retryable");
            return false;
        }
        let delay = self.policy.jittered_delay(attempt);
        if self.policy.exceeds_deadline(delay) {
            warn!(attempt = attempt + 1, error = %error, "retry budget exhausted by deadline");
            return false;
        }

        warn!(
            attempt = attempt + 1,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "attempt failed, retrying"
        );
        if let Some(observer) = &self.on_retry {
            observer(error, attempt + 1);
        }
        cancellable_sleep(delay, self.cancel.as_ref()).await
    }

    /// Retries `operation` until it succeeds or the policy gives up; the last error is returned.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Classify,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let info = err.error_info();
                    if !self.backoff(attempt, &info).await {
                        return Err(err);
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Retries while `accept` rejects the produced value, returning the last value either way.
    pub async fn run_until<T, F, Fut, P>(&self, mut operation: F, accept: P) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = T>,
        P: Fn(&T) -> bool,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let value = operation().await;
            if accept(&value) || attempt + 1 >= max_attempts {
                return value;
            }
            let delay = self.policy.jittered_delay(attempt);
            if self.policy.exceeds_deadline(delay) {
                return value;
            }
            debug!(attempt = attempt + 1, "result rejected by predicate, retrying");
            if !cancellable_sleep(delay, self.cancel.as_ref()).await {
                return value;
            }
            attempt += 1;
        }
    }
}

/// Runs `operation` under `policy`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Retrier::new(policy).run(operation).await
}

/// Reruns `operation` while `accept` rejects its result; returns the last result.
pub async fn retry_until<T, F, Fut, P>(policy: &RetryPolicy, operation: F, accept: P) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    Retrier::new(policy).run_until(operation, accept).await
}

/// Attempt-by-attempt retry control for callers driving their own loop.
///
/// ```no_run
/// # use browser_ragent_server::retry::{RetryableOperation, RetryPolicy};
/// # use browser_ragent_server::errors::ErrorInfo;
/// # async fn click() -> Result<(), ErrorInfo> { Ok(()) }
/// # async fn run() {
/// let mut op = RetryableOperation::new(RetryPolicy::new(3));
/// while op.should_retry().await {
///     match click().await {
///         Ok(()) => op.mark_success(),
///         Err(e) => op.mark_failed(e),
///     }
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct RetryableOperation {
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
    attempt: u32,
    succeeded: bool,
    last_error: Option<ErrorInfo>,
}

impl RetryableOperation {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: None,
            attempt: 0,
            succeeded: false,
            last_error: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Whether another attempt should run. Sleeps the backoff before every attempt after the first.
    pub async fn should_retry(&mut self) -> bool {
        if self.succeeded || self.attempt >= self.policy.max_attempts.max(1) {
            return false;
        }
        if self.attempt > 0 {
            if let Some(error) = &self.last_error {
                if !self.policy.is_retryable(error) {
                    return false;
                }
            }
            let delay = self.policy.jittered_delay(self.attempt - 1);
            if self.policy.exceeds_deadline(delay) {
                return false;
            }
            if !cancellable_sleep(delay, self.cancel.as_ref()).await {
                return false;
            }
        }
        self.attempt += 1;
        true
    }

    pub fn mark_success(&mut self) {
        self.succeeded = true;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Classify) {
        let info = error.error_info();
        debug!(attempt = self.attempt, error = %info, "attempt failed");
        self.last_error = Some(info);
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }
}
