//! Admission control for the pool.
//!
//! A counting semaphore: each running task holds one [`Permit`], and the
//! permit goes back to the semaphore when it is dropped.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Counting semaphore bounding how many tasks may run at once.
#[derive(Debug)]
pub struct Semaphore {
    /// Permits currently available.
    available: Mutex<usize>,
    /// Signalled whenever a permit is returned.
    released: Condvar,
    capacity: usize,
}

impl Semaphore {
    /// Create a semaphore with `capacity` permits.
    #[inline]
    pub fn new(capacity: usize) -> Self {
        Self {
            available: Mutex::new(capacity),
            released: Condvar::new(),
            capacity,
        }
    }

    /// Take a permit, blocking until one is free.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;

        Permit {
            semaphore: Arc::clone(self),
        }
    }

    /// Take a permit if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut available = self.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;

        Some(Permit {
            semaphore: Arc::clone(self),
        })
    }

    /// Permits not currently held.
    #[inline]
    pub fn available(&self) -> usize {
        *self.available.lock()
    }

    /// Total number of permits.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        debug_assert!(*available <= self.capacity);
        self.released.notify_one();
    }
}

/// One admission slot. Returned to its semaphore on drop.
#[derive(Debug)]
pub struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
