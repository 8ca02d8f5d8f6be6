//! Lock-free chunked drainer
//!
//! Values live in a singly linked list of fixed-capacity chunks. A producer
//! claims a slot with one `fetch_add` on the tail chunk's cursor, writes the
//! value, then flips the slot's ready flag. When the tail is full, the first
//! producer to notice allocates the next chunk and links it with a
//! compare-and-swap on the tail's `next` pointer; everyone else follows the
//! link. Chunks are only freed when the last handle is dropped, so readers
//! and writers can walk the list without reclamation.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::{Backoff, CachePadded};
use tracing::trace;

use super::Sink;

/// Number of slots per chunk unless configured otherwise.
pub const DEFAULT_CHUNK_CAPACITY: usize = 64;

struct Slot<T> {
    ready: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Chunk<T> {
    slots: Box<[Slot<T>]>,
    /// Next slot to hand out; runs past `slots.len()` once the chunk is full.
    cursor: AtomicUsize,
    next: AtomicPtr<Chunk<T>>,
}

impl<T> Chunk<T> {
    fn alloc(capacity: usize) -> *mut Chunk<T> {
        let slots = (0..capacity)
            .map(|_| Slot {
                ready: AtomicBool::new(false),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Box::into_raw(Box::new(Chunk {
            slots,
            cursor: AtomicUsize::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    /// Slots handed out so far, capped at capacity.
    #[inline]
    fn claimed(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.slots.len())
    }
}

struct Inner<T> {
    head: NonNull<Chunk<T>>,
    tail: CachePadded<AtomicPtr<Chunk<T>>>,
    len: CachePadded<AtomicUsize>,
    chunks: AtomicUsize,
    chunk_capacity: usize,
}

// SAFETY: values are moved in by producers on any thread and handed out by
// reference to readers on any thread; chunk memory is owned by `Inner`.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send + Sync> Sync for Inner<T> {}

impl<T> Inner<T> {
    fn new(chunk_capacity: usize) -> Self {
        let first = Chunk::alloc(chunk_capacity);

        Self {
            // SAFETY: `Box::into_raw` never returns null.
            head: unsafe { NonNull::new_unchecked(first) },
            tail: CachePadded::new(AtomicPtr::new(first)),
            len: CachePadded::new(AtomicUsize::new(0)),
            chunks: AtomicUsize::new(1),
            chunk_capacity,
        }
    }

    /// Move the shared tail past a full chunk, linking a new one if needed.
    fn grow(
        &self,
        full_ptr: *mut Chunk<T>,
        full: &Chunk<T>,
    ) {
        let mut next = full.next.load(Ordering::Acquire);

        if next.is_null() {
            let fresh = Chunk::alloc(self.chunk_capacity);
            match full.next.compare_exchange(
                ptr::null_mut(),
                fresh,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let chunks = self.chunks.fetch_add(1, Ordering::Relaxed) + 1;
                    trace!(chunks, capacity = self.chunk_capacity, "drainer chunk linked");
                    next = fresh;
                }
                Err(installed) => {
                    // SAFETY: `fresh` was never published.
                    unsafe { drop(Box::from_raw(fresh)) };
                    next = installed;
                }
            }
        }

        // Losing this race only means someone else already advanced the tail.
        let _ = self
            .tail
            .compare_exchange(full_ptr, next, Ordering::AcqRel, Ordering::Acquire);
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let mut current = self.head.as_ptr();

        while !current.is_null() {
            // SAFETY: every chunk was created by `Box::into_raw` and is reachable
            // exactly once from the head.
            let mut chunk = unsafe { Box::from_raw(current) };
            for slot in chunk.slots.iter_mut() {
                if *slot.ready.get_mut() {
                    // SAFETY: ready slots hold an initialised value.
                    unsafe { slot.value.get_mut().assume_init_drop() };
                }
            }
            current = *chunk.next.get_mut();
        }
    }
}

/// Concurrent append-only collector.
///
/// `Drainer` is a cheap handle: clones share the same storage, so a task can
/// hold one while the caller keeps another to read results afterwards.
///
/// ```
/// use drainpool::Drainer;
///
/// let output = Drainer::new();
/// output.send("a");
/// output.send("b");
/// assert_eq!(output.drain(), vec!["a", "b"]);
/// assert_eq!(output.drain(), vec!["a", "b"]);
/// ```
pub struct Drainer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Drainer<T> {
    /// Create an empty drainer with [`DEFAULT_CHUNK_CAPACITY`] slots per chunk.
    #[inline]
    pub fn new() -> Self {
        Self::with_chunk_capacity(DEFAULT_CHUNK_CAPACITY)
    }

    /// Create an empty drainer with a custom chunk size.
    ///
    /// A capacity of zero is bumped to one.
    pub fn with_chunk_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner::new(capacity.max(1))),
        }
    }

    /// Append a value.
    ///
    /// Never blocks on a lock; contention only costs a retried CAS when a
    /// chunk fills up.
    pub fn send(
        &self,
        value: T,
    ) {
        let inner = &*self.inner;
        let backoff = Backoff::new();

        loop {
            let tail_ptr = inner.tail.load(Ordering::Acquire);
            // SAFETY: chunks outlive every handle to the drainer.
            let tail = unsafe { &*tail_ptr };

            let index = tail.cursor.fetch_add(1, Ordering::AcqRel);
            if let Some(slot) = tail.slots.get(index) {
                // SAFETY: `index` was handed out to this producer alone.
                unsafe { (*slot.value.get()).write(value) };
                slot.ready.store(true, Ordering::Release);
                inner.len.fetch_add(1, Ordering::Relaxed);
                return;
            }

            inner.grow(tail_ptr, tail);
            backoff.spin();
        }
    }

    /// Number of values fully written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len.load(Ordering::Relaxed)
    }

    /// Whether no value has been written yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots per chunk.
    #[inline]
    pub fn chunk_capacity(&self) -> usize {
        self.inner.chunk_capacity
    }

    /// Number of chunks allocated so far.
    #[inline]
    pub fn chunks(&self) -> usize {
        self.inner.chunks.load(Ordering::Relaxed)
    }

    /// Snapshot of every value written so far, in slot order.
    ///
    /// Values that were completely sent before the call are always included.
    /// A slot still being written by a concurrent producer is skipped, so a
    /// value racing with the read may or may not show up, but nothing is ever
    /// duplicated. The read stops at the tail chunk as it was when the call
    /// started, so each producer's values always form a prefix of what that
    /// producer sent. Calling this does not consume anything.
    pub fn drain(&self) -> Vec<T>
    where
        T: Clone,
    {
        // Cut at the current tail: chunks before it are full, and the tail is
        // read only up to the slots claimed here.
        let tail_ptr = self.inner.tail.load(Ordering::Acquire);
        // SAFETY: chunks outlive every handle to the drainer.
        let tail_claimed = unsafe { &*tail_ptr }.claimed();

        let mut values = Vec::with_capacity(self.len());
        let mut current: *const Chunk<T> = self.inner.head.as_ptr();

        // SAFETY: chunks outlive every handle to the drainer.
        while let Some(chunk) = unsafe { current.as_ref() } {
            let is_tail = ptr::eq(current, tail_ptr);
            let claimed = if is_tail {
                tail_claimed
            } else {
                chunk.slots.len()
            };

            for slot in &chunk.slots[..claimed] {
                if slot.ready.load(Ordering::Acquire) {
                    // SAFETY: the ready flag is set only after the write.
                    values.push(unsafe { (*slot.value.get()).assume_init_ref() }.clone());
                }
            }

            if is_tail {
                break;
            }
            current = chunk.next.load(Ordering::Acquire);
        }

        values
    }
}

impl<T> Clone for Drainer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Drainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Drainer<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Drainer")
            .field("len", &self.len())
            .field("chunks", &self.chunks())
            .field("chunk_capacity", &self.chunk_capacity())
            .finish()
    }
}

impl<T: Send + Sync> Sink<T> for Drainer<T> {
    #[inline]
    fn send(
        &self,
        value: T,
    ) {
        Drainer::send(self, value);
    }

    #[inline]
    fn len(&self) -> usize {
        Drainer::len(self)
    }
}
