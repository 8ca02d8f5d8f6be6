//! Bounded-concurrency task pool
//!
//! This module provides the [`Pool`], which runs batches of [`Worker`]s on
//! their own threads, at most `limit` at a time, and collects every terminal
//! failure by submission index.
//!
//! # Lifecycle
//!
//! ```text
//! new / from_config -> with_limit / with_retry -> submit (any number of times)
//!     -> wait -> errors -> close
//! ```
//!
//! Configuration is fixed before tasks start: changing the limit while tasks
//! are still running is a programming error. A failing task never stops its
//! siblings unless fail-fast was opted into; everything submitted runs to
//! completion so that side effects (such as partial drainer output) are all
//! there once `wait` returns.

pub mod admission;
pub mod error;

pub use admission::{Permit, Semaphore};
pub use error::{PoolError, TaskError, TaskPanic};

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::runtime::cancel::CancelToken;
use crate::runtime::task::{retry, RetryPolicy, RunContext, Worker};
use crate::util::config::PoolConfig;

/// Pool statistics.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Tasks handed to the pool.
    pub submitted: AtomicUsize,
    /// Tasks that ran to completion, successfully or not.
    pub completed: AtomicUsize,
    /// Tasks whose final attempt failed.
    pub failed: AtomicUsize,
    /// Tasks never started because the pool was cancelled.
    pub skipped: AtomicUsize,
    /// Operation calls, retries included.
    pub invocations: AtomicUsize,
    /// Tasks running right now.
    pub active: AtomicUsize,
    /// Highest number of tasks seen running at once.
    pub peak_parallelism: AtomicUsize,
}

impl PoolStats {
    /// Record a submitted task.
    #[inline]
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a skipped task.
    #[inline]
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a single operation call.
    #[inline]
    pub fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a finished task.
    #[inline]
    pub fn record_completed(
        &self,
        failed: bool,
    ) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if failed {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A task started running.
    fn enter(&self) {
        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.update_parallelism(current);
    }

    /// A task stopped running.
    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Update parallelism.
    #[inline]
    pub fn update_parallelism(
        &self,
        current: usize,
    ) {
        loop {
            let peak = self.peak_parallelism.load(Ordering::SeqCst);
            if current <= peak {
                break;
            }
            if self
                .peak_parallelism
                .compare_exchange(peak, current, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }
    }
}

/// State shared between the pool and its task threads.
#[derive(Debug, Default)]
struct Shared {
    /// Terminal failures keyed by submission index.
    errors: Mutex<BTreeMap<usize, TaskError>>,
    stats: PoolStats,
    /// Tasks admitted and not yet finished.
    outstanding: AtomicUsize,
}

impl Shared {
    /// Run one admitted task to completion and record its outcome.
    fn run(
        &self,
        index: usize,
        worker: &mut dyn Worker,
        policy: &RetryPolicy,
        cancel: &CancelToken,
        fail_fast: bool,
    ) {
        self.stats.enter();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            retry::run(policy, Some(cancel), |attempt| {
                self.stats.record_invocation();
                worker.call(RunContext {
                    attempt,
                    cancel: Some(cancel),
                })
            })
        }));
        self.stats.leave();

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                debug!(task = index, name = worker.name(), error = %err, "task failed");
                Some(err)
            }
            Err(payload) => {
                let panic = TaskPanic::from_payload(payload);
                warn!(
                    task = index,
                    name = worker.name(),
                    message = panic.message(),
                    "task panicked"
                );
                Some(anyhow::Error::new(panic))
            }
        };

        self.stats.record_completed(failure.is_some());
        if let Some(err) = failure {
            self.errors.lock().insert(index, TaskError::new(index, err));
            if fail_fast && cancel.cancel() {
                debug!(task = index, "fail-fast: cancelling tasks not yet started");
            }
        }

        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs batches of tasks concurrently under an optional concurrency limit.
///
/// ```
/// use drainpool::{Drainer, Pool, Task};
///
/// let output = Drainer::new();
/// let tasks: Vec<_> = (0..4)
///     .map(|i| {
///         Task::<(), usize>::new(move |args| {
///             args.send(i * 10)?;
///             Ok(())
///         })
///         .drain_to(&output)
///     })
///     .collect();
///
/// let mut pool = Pool::new().with_limit(2);
/// pool.submit(tasks).wait().unwrap();
/// pool.close();
///
/// let mut results = output.drain();
/// results.sort();
/// assert_eq!(results, vec![0, 10, 20, 30]);
/// ```
#[derive(Debug)]
pub struct Pool {
    limit: Option<NonZeroUsize>,
    admission: Option<Arc<Semaphore>>,
    /// Replaces every task's own policy when set.
    retry: Option<RetryPolicy>,
    fail_fast: bool,
    cancel: CancelToken,
    shared: Arc<Shared>,
    handles: Vec<thread::JoinHandle<()>>,
    next_index: usize,
    first_error: OnceCell<TaskError>,
}

impl Pool {
    /// Create an unbounded pool with no retry override.
    pub fn new() -> Self {
        Self {
            limit: None,
            admission: None,
            retry: None,
            fail_fast: false,
            cancel: CancelToken::new(),
            shared: Arc::new(Shared::default()),
            handles: Vec::new(),
            next_index: 0,
            first_error: OnceCell::new(),
        }
    }

    /// Build a pool from a validated configuration.
    pub fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        let mut pool = Pool::new();
        pool.try_set_limit(config.limit)?;

        if let Some(retry) = &config.retry {
            if retry.attempts == 0 {
                return Err(PoolError::InvalidAttempts);
            }
            pool.retry = Some(retry.policy());
        }
        pool.fail_fast = config.fail_fast;

        debug!(
            limit = ?pool.limit,
            retry = ?pool.retry,
            fail_fast = pool.fail_fast,
            "pool configured"
        );
        Ok(pool)
    }

    /// Run at most `limit` tasks at once.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero.
    pub fn with_limit(
        mut self,
        limit: usize,
    ) -> Self {
        self.set_limit(limit);
        self
    }

    /// Change the concurrency limit.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is zero or if submitted tasks are still running.
    pub fn set_limit(
        &mut self,
        limit: usize,
    ) {
        if let Err(err) = self.try_set_limit(Some(limit)) {
            panic!("{}", err);
        }
    }

    /// Change the concurrency limit; `None` removes it.
    pub fn try_set_limit(
        &mut self,
        limit: Option<usize>,
    ) -> Result<(), PoolError> {
        let active = self.outstanding();
        if active > 0 {
            return Err(PoolError::LimitChangedWhileActive { active });
        }

        let limit = match limit {
            Some(n) => Some(NonZeroUsize::new(n).ok_or(PoolError::InvalidLimit)?),
            None => None,
        };
        self.limit = limit;
        self.admission = limit.map(|n| Arc::new(Semaphore::new(n.get())));
        Ok(())
    }

    /// Retry every task up to `attempts` times, ignoring the tasks' own policies.
    #[inline]
    pub fn with_retry(
        mut self,
        attempts: u32,
        base_delay: Duration,
    ) -> Self {
        self.retry = Some(RetryPolicy::new(attempts, base_delay));
        self
    }

    /// Set or clear the pool-wide retry override.
    #[inline]
    pub fn with_retry_policy(
        mut self,
        policy: Option<RetryPolicy>,
    ) -> Self {
        self.retry = policy;
        self
    }

    /// Cancel tasks that have not started yet as soon as one task fails.
    ///
    /// Cancellation is permanent: once a failure has fired it, every later
    /// [`submit`](Pool::submit) on this pool skips its tasks and
    /// [`wait`](Pool::wait) keeps returning the first error. Build a new pool
    /// for the next batch.
    #[inline]
    pub fn with_fail_fast(
        mut self,
        fail_fast: bool,
    ) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Use an externally owned cancellation token.
    #[inline]
    pub fn with_cancel(
        mut self,
        cancel: CancelToken,
    ) -> Self {
        self.cancel = cancel;
        self
    }

    /// The configured concurrency limit, `None` when unbounded.
    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.limit.map(NonZeroUsize::get)
    }

    /// The pool-wide retry override.
    #[inline]
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry
    }

    /// Whether fail-fast is enabled.
    #[inline]
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// The pool's cancellation token.
    #[inline]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Statistics.
    #[inline]
    pub fn stats(&self) -> &PoolStats {
        &self.shared.stats
    }

    /// Tasks admitted and not yet finished.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Start every task in `workers`, in order.
    ///
    /// With a limit set, this blocks the caller whenever all slots are taken,
    /// so tasks are admitted strictly in submission order. May be called any
    /// number of times before [`wait`](Pool::wait).
    pub fn submit<W>(
        &mut self,
        workers: W,
    ) -> &mut Self
    where
        W: IntoIterator,
        W::Item: Into<Box<dyn Worker>>,
    {
        let first = self.next_index;
        for worker in workers {
            self.spawn(worker);
        }
        debug!(
            tasks = self.next_index - first,
            limit = ?self.limit(),
            retry = ?self.retry,
            "batch submitted"
        );
        self
    }

    /// Start a single task and return its submission index.
    pub fn spawn(
        &mut self,
        worker: impl Into<Box<dyn Worker>>,
    ) -> usize {
        let mut worker = worker.into();
        let index = self.next_index;
        self.next_index += 1;
        self.shared.stats.record_submitted();

        if self.cancel.is_cancelled() {
            self.skip(index);
            return index;
        }

        let permit = self.admission.as_ref().map(Semaphore::acquire);

        // the token may have fired while we were waiting for a slot
        if self.cancel.is_cancelled() {
            drop(permit);
            self.skip(index);
            return index;
        }

        let policy = self.retry.unwrap_or_else(|| worker.retry_policy());
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let fail_fast = self.fail_fast;

        shared.outstanding.fetch_add(1, Ordering::SeqCst);
        trace!(task = index, active = shared.stats.active.load(Ordering::Relaxed), "task admitted");

        let handle = thread::Builder::new()
            .name(format!("drainpool-task-{}", index))
            .spawn(move || {
                let _permit = permit;
                shared.run(index, worker.as_mut(), &policy, &cancel, fail_fast);
                drop(worker);
            })
            .expect("Failed to spawn pool task thread");

        self.handles.push(handle);
        index
    }

    fn skip(
        &self,
        index: usize,
    ) {
        trace!(task = index, "pool cancelled, task skipped");
        self.shared.stats.record_skipped();
    }

    /// Block until every submitted task has finished.
    ///
    /// Threads are joined in submission order. Returns the error of the
    /// earliest-submitted task that failed, if any; see
    /// [`errors`](Pool::errors) for the full list.
    pub fn wait(&mut self) -> Result<(), TaskError> {
        let joined = self.handles.len();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("pool task thread panicked outside its task");
            }
        }

        if let Some(first) = self.shared.errors.lock().values().next() {
            let _ = self.first_error.set(first.clone());
        }

        let stats = &self.shared.stats;
        debug!(
            joined,
            completed = stats.completed.load(Ordering::SeqCst),
            failed = stats.failed.load(Ordering::SeqCst),
            skipped = stats.skipped.load(Ordering::SeqCst),
            "pool drained"
        );

        match self.first_error.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Every terminal failure so far, ordered by submission index, and
    /// whether there were any.
    ///
    /// Only complete once [`wait`](Pool::wait) has returned.
    pub fn errors(&self) -> (Vec<TaskError>, bool) {
        let errors: Vec<TaskError> = self.shared.errors.lock().values().cloned().collect();
        let has_errors = !errors.is_empty();
        (errors, has_errors)
    }

    /// Whether any task has failed.
    #[inline]
    pub fn has_errors(&self) -> bool {
        !self.shared.errors.lock().is_empty()
    }

    /// Tear the pool down.
    ///
    /// # Panics
    ///
    /// Closing a pool whose submitted tasks were never joined by
    /// [`wait`](Pool::wait) is a programming error and panics. The pool
    /// still joins those tasks while unwinding.
    pub fn close(self) {
        if let Err(err) = self.try_close() {
            panic!("{}", err);
        }
    }

    /// Tear the pool down, reporting a close before `wait` as an error.
    pub fn try_close(self) -> Result<(), PoolError> {
        if !self.handles.is_empty() {
            return Err(PoolError::CloseBeforeWait {
                outstanding: self.handles.len(),
            });
        }

        debug!(submitted = self.next_index, "pool closed");
        Ok(())
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        warn!(
            outstanding = self.handles.len(),
            "pool dropped before wait, joining remaining tasks"
        );
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
