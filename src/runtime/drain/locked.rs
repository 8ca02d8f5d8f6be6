//! Mutex-guarded drainer
//!
//! Same contract as [`Drainer`](super::Drainer), backed by a single vector
//! behind a lock. Every producer serialises on the lock, which is fine for a
//! handful of writers and keeps the implementation trivially correct.

use std::sync::Arc;

use parking_lot::Mutex;

use super::Sink;

/// A thread-safe collector backed by `Mutex<Vec<T>>`.
#[derive(Debug)]
pub struct LockedDrainer<T> {
    /// Inner vector protected by mutex
    inner: Arc<Mutex<Vec<T>>>,
}

impl<T> LockedDrainer<T> {
    /// Create a new empty drainer.
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a drainer with room for `capacity` values before reallocating.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
        }
    }

    /// Append a value.
    #[inline]
    pub fn send(
        &self,
        value: T,
    ) {
        self.inner.lock().push(value);
    }

    /// Number of values appended.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if nothing has been appended.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Copy of every value appended so far, in append order.
    pub fn drain(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.lock().clone()
    }
}

impl<T> Clone for LockedDrainer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for LockedDrainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Sink<T> for LockedDrainer<T> {
    #[inline]
    fn send(
        &self,
        value: T,
    ) {
        LockedDrainer::send(self, value);
    }

    #[inline]
    fn len(&self) -> usize {
        LockedDrainer::len(self)
    }
}
