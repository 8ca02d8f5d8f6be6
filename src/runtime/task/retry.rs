//! Retry policy and exponential backoff with jitter.
//!
//! Before retry `i + 1` the loop sleeps `dᵢ + U[0, dᵢ/2)` and then doubles
//! `dᵢ`. The jitter is drawn independently for every sleep so that many
//! tasks failing together do not retry in lockstep. Nothing sleeps after the
//! last attempt.

use std::fmt;
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::runtime::cancel::CancelToken;

/// How many times an operation may run, and how long to wait between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Run once, never retry.
    pub const NONE: RetryPolicy = RetryPolicy {
        attempts: 1,
        base_delay: Duration::ZERO,
    };

    /// Create a policy allowing `attempts` runs in total.
    ///
    /// `attempts` of zero is treated as one.
    #[inline]
    pub fn new(
        attempts: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Total number of runs allowed, including the first.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay before the first retry, before jitter.
    #[inline]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Whether more than one run is allowed.
    #[inline]
    pub fn retries(&self) -> bool {
        self.attempts > 1
    }

    /// Fresh backoff state for one execution.
    #[inline]
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} attempts, base delay {:?}", self.attempts, self.base_delay)
    }
}

/// Backoff state local to a single execution.
///
/// Each call to [`next_delay`](Backoff::next_delay) returns the sleep for the
/// upcoming retry and doubles the base for the one after.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    /// Start from `base`.
    #[inline]
    pub fn new(base: Duration) -> Self {
        Self { current: base }
    }

    /// Base delay the next sleep will be computed from.
    #[inline]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Next sleep using the thread-local RNG.
    #[inline]
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::rng())
    }

    /// Next sleep using the given RNG.
    pub fn next_delay_with<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Duration {
        let delay = self.current.saturating_add(jitter(self.current, rng));
        self.current = self.current.saturating_mul(2);
        delay
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Uniform jitter in `[0, base / 2)`.
fn jitter<R: Rng + ?Sized>(
    base: Duration,
    rng: &mut R,
) -> Duration {
    let half = u64::try_from(base.as_nanos() / 2).unwrap_or(u64::MAX);
    if half == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rng.random_range(0..half))
}

/// Run `op` under `policy`.
///
/// `op` receives the 1-based attempt number. The first `Ok` is returned
/// immediately; once attempts run out the last error is returned as is.
/// If `cancel` is set when a retry is due, the loop stops and returns the
/// error it has.
pub fn run<T, E, F>(
    policy: &RetryPolicy,
    cancel: Option<&CancelToken>,
    mut op: F,
) -> Result<T, E>
where
    E: fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 1;

    loop {
        let err = match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= policy.attempts() {
            return Err(err);
        }

        if cancel.is_some_and(CancelToken::is_cancelled) {
            debug!(attempt, "cancelled, not retrying");
            return Err(err);
        }

        let delay = backoff.next_delay();
        debug!(attempt, ?delay, error = %err, "attempt failed, retrying");
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        attempt += 1;
    }
}
