//! Shared cancellation signal
//!
//! The pool never interrupts a running operation. A `CancelToken` only stops
//! tasks that have not been admitted yet and cuts retry loops short; an
//! operation that wants to bail out early reads the token itself through
//! [`Args::is_cancelled`](crate::runtime::task::Args::is_cancelled).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable, thread-safe cancellation flag.
///
/// All clones observe the same state. Once cancelled, a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token.
    ///
    /// Returns `true` if this call flipped the flag.
    #[inline]
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    /// Check whether the token has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
