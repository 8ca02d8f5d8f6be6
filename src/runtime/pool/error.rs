//! Pool error types.
//!
//! Operation failures reach the caller as [`TaskError`], which shows the
//! operation's own error unchanged. Misuse of the pool itself is a
//! [`PoolError`].

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Terminal failure of one submitted task.
///
/// Cheap to clone; `wait()` and `errors()` hand out clones of the same error.
/// `Display` prints the operation's error exactly as it was returned.
#[derive(Clone)]
pub struct TaskError {
    index: usize,
    error: Arc<anyhow::Error>,
}

impl TaskError {
    pub(crate) fn new(
        index: usize,
        error: anyhow::Error,
    ) -> Self {
        Self {
            index,
            error: Arc::new(error),
        }
    }

    /// Submission index of the task that failed.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The error returned by the operation.
    #[inline]
    pub fn inner(&self) -> &anyhow::Error {
        &self.error
    }

    /// Downcast to the operation's concrete error type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether the task panicked instead of returning an error.
    #[inline]
    pub fn is_panic(&self) -> bool {
        self.downcast_ref::<TaskPanic>().is_some()
    }
}

impl fmt::Display for TaskError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if f.alternate() {
            write!(f, "{:#}", self.error)
        } else {
            write!(f, "{}", self.error)
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskError")
            .field("index", &self.index)
            .field("error", &self.error)
            .finish()
    }
}

impl StdError for TaskError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let error: &(dyn StdError + 'static) = &**self.error;
        error.source()
    }
}

/// A task's operation panicked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task panicked: {message}")]
pub struct TaskPanic {
    message: String,
}

impl TaskPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    /// The panic message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Misuse of a pool: bad configuration or teardown at the wrong time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("concurrency limit must be at least 1")]
    InvalidLimit,

    #[error("retry attempts must be at least 1")]
    InvalidAttempts,

    #[error("cannot change the concurrency limit while {active} tasks are still running")]
    LimitChangedWhileActive { active: usize },

    #[error("pool closed before wait: {outstanding} submitted tasks were never joined")]
    CloseBeforeWait { outstanding: usize },
}
