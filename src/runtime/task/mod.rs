//! Tasks: retryable, fallible units of work.
//!
//! A [`Task`] pairs an operation with an optional shared input, an optional
//! output sink and a [`RetryPolicy`]. The pool only sees tasks through the
//! object-safe [`Worker`] trait, so a single batch can mix tasks with
//! unrelated input and output types.
//!
//! Retrying is composed around a plain single-shot call: [`Worker::call`]
//! runs the operation once, and [`retry::run`] is the loop the task (or the
//! pool, when it overrides the policy) wraps around it.

pub mod retry;

pub use retry::{Backoff, RetryPolicy};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::{Mutex, MutexGuard};

use crate::runtime::cancel::CancelToken;
use crate::runtime::drain::Sink;

/// Input shared between the caller and a task.
///
/// The caller keeps a clone and reads it back once the pool is done.
pub type Shared<T> = Arc<Mutex<T>>;

/// Wrap a value so it can be attached to a task as input.
#[inline]
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// A batch of type-erased tasks.
pub type Workers = Vec<Box<dyn Worker>>;

/// The function a task runs.
pub type Operation<I, O> = Box<dyn FnMut(&Args<'_, I, O>) -> Result<()> + Send>;

/// Errors raised by [`Args`] accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArgsError {
    #[error("task has no input attached")]
    MissingInput,
    #[error("task has no output sink attached")]
    MissingOutput,
}

/// Per-attempt context handed to [`Worker::call`].
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    /// 1-based attempt number within the current execution.
    pub attempt: u32,
    /// Cancellation signal of the pool running this task, if any.
    pub cancel: Option<&'a CancelToken>,
}

impl RunContext<'_> {
    /// Context for a single standalone attempt.
    #[inline]
    pub fn first() -> Self {
        RunContext {
            attempt: 1,
            cancel: None,
        }
    }
}

/// What an operation gets to work with on each attempt.
pub struct Args<'a, I, O> {
    input: Option<&'a Shared<I>>,
    output: Option<&'a dyn Sink<O>>,
    ctx: RunContext<'a>,
}

impl<'a, I, O> Args<'a, I, O> {
    /// Lock the attached input for reading or in-place mutation.
    pub fn input(&self) -> Result<MutexGuard<'a, I>, ArgsError> {
        self.input
            .map(|input| input.lock())
            .ok_or(ArgsError::MissingInput)
    }

    /// Whether an input is attached.
    #[inline]
    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    /// Push a value into the attached sink.
    pub fn send(
        &self,
        value: O,
    ) -> Result<(), ArgsError> {
        let output = self.output.ok_or(ArgsError::MissingOutput)?;
        output.send(value);
        Ok(())
    }

    /// Whether an output sink is attached.
    #[inline]
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// 1-based attempt number.
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.ctx.attempt
    }

    /// Whether the running pool has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.ctx.cancel.is_some_and(CancelToken::is_cancelled)
    }
}

/// A unit of work the pool can run.
pub trait Worker: Send {
    /// Run the operation exactly once, without retrying.
    fn call(
        &mut self,
        ctx: RunContext<'_>,
    ) -> Result<()>;

    /// The task's own retry policy.
    fn retry_policy(&self) -> RetryPolicy;

    /// Name used in logs.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Run under the task's own retry policy.
    fn execute(&mut self) -> Result<()> {
        let policy = self.retry_policy();
        self.execute_with(&policy, None)
    }

    /// Run under `policy` instead of the task's own.
    fn execute_with(
        &mut self,
        policy: &RetryPolicy,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        retry::run(policy, cancel, |attempt| self.call(RunContext { attempt, cancel }))
    }
}

/// A fallible operation with optional input, output and retry policy.
///
/// ```
/// use drainpool::{shared, Drainer, Task};
///
/// let counter = shared(0);
/// let output = Drainer::new();
///
/// let mut task = Task::<i32, &str>::new(|args| {
///     *args.input()? += 1;
///     args.send("done")?;
///     Ok(())
/// })
/// .with_input(counter.clone())
/// .drain_to(&output);
///
/// task.execute().unwrap();
/// assert_eq!(*counter.lock(), 1);
/// assert_eq!(output.drain(), vec!["done"]);
/// ```
pub struct Task<I = (), O = ()> {
    operation: Operation<I, O>,
    input: Option<Shared<I>>,
    output: Option<Arc<dyn Sink<O>>>,
    retry: RetryPolicy,
    name: Option<String>,
}

impl<I, O> Task<I, O> {
    /// Create a task from an operation. Runs once unless a retry policy is set.
    pub fn new<F>(operation: F) -> Self
    where
        F: FnMut(&Args<'_, I, O>) -> Result<()> + Send + 'static,
    {
        Self {
            operation: Box::new(operation),
            input: None,
            output: None,
            retry: RetryPolicy::NONE,
            name: None,
        }
    }

    /// Attach an input the operation can read and mutate.
    #[inline]
    pub fn with_input(
        mut self,
        input: Shared<I>,
    ) -> Self {
        self.input = Some(input);
        self
    }

    /// Attach an output sink. The task keeps its own handle to it.
    pub fn drain_to<S>(
        mut self,
        sink: &S,
    ) -> Self
    where
        S: Sink<O> + Clone + 'static,
    {
        self.output = Some(Arc::new(sink.clone()));
        self
    }

    /// Allow up to `attempts` runs, backing off from `base_delay`.
    #[inline]
    pub fn with_retry(
        mut self,
        attempts: u32,
        base_delay: Duration,
    ) -> Self {
        self.retry = RetryPolicy::new(attempts, base_delay);
        self
    }

    /// Set the retry policy directly.
    #[inline]
    pub fn with_retry_policy(
        mut self,
        policy: RetryPolicy,
    ) -> Self {
        self.retry = policy;
        self
    }

    /// Set the name used in logs.
    #[inline]
    pub fn named(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The attached input, if any.
    #[inline]
    pub fn input(&self) -> Option<&Shared<I>> {
        self.input.as_ref()
    }
}

impl Task {
    /// Create a task that takes no input and emits nothing.
    pub fn simple<F>(mut operation: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        Task::new(move |_| operation())
    }
}

impl<I: Send + 'static, O: 'static> Task<I, O> {
    /// Run under the task's own retry policy, outside of any pool.
    #[inline]
    pub fn execute(&mut self) -> Result<()> {
        Worker::execute(self)
    }

    /// Erase the task's types so it can join a mixed batch.
    #[inline]
    pub fn boxed(self) -> Box<dyn Worker> {
        Box::new(self)
    }
}

impl<I: Send + 'static, O: 'static> Worker for Task<I, O> {
    fn call(
        &mut self,
        ctx: RunContext<'_>,
    ) -> Result<()> {
        let args = Args {
            input: self.input.as_ref(),
            output: self.output.as_deref(),
            ctx,
        };
        (self.operation)(&args)
    }

    #[inline]
    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    #[inline]
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl<I: Send + 'static, O: 'static> From<Task<I, O>> for Box<dyn Worker> {
    fn from(task: Task<I, O>) -> Self {
        task.boxed()
    }
}

impl<I, O> fmt::Debug for Task<I, O> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("has_input", &self.input.is_some())
            .field("has_output", &self.output.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Build a [`Workers`] batch from tasks of any input/output types.
///
/// ```
/// use drainpool::{workers, Task};
///
/// let batch = workers![Task::simple(|| Ok(())), Task::simple(|| Ok(()))];
/// assert_eq!(batch.len(), 2);
/// ```
#[macro_export]
macro_rules! workers {
    ($($task:expr),* $(,)?) => {
        ::std::vec![$(<::std::boxed::Box<dyn $crate::Worker>>::from($task)),*]
    };
}

#[cfg(test)]
mod tests;
