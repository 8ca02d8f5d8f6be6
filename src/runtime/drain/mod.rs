//! Multi-producer result collectors
//!
//! Tasks push their outputs into a sink while the pool runs them; the caller
//! reads everything back once the pool is done.
//!
//! # Architecture
//!
//! - [`Drainer`](chunked::Drainer) - lock-free collector built from fixed-size chunks
//! - [`LockedDrainer`](locked::LockedDrainer) - mutex-guarded vector, for low producer counts
//! - [`Sink`] - the write side shared by both, used by tasks to emit values
//!
//! Reads are snapshots: they never consume anything, so a sink can be drained
//! any number of times and each read sees at least what the previous one saw.

pub mod chunked;
pub mod locked;

pub use chunked::{Drainer, DEFAULT_CHUNK_CAPACITY};
pub use locked::LockedDrainer;

/// Write side of a result collector.
///
/// Implementations must accept values from any number of threads at once.
pub trait Sink<T>: Send + Sync {
    /// Append a value.
    fn send(
        &self,
        value: T,
    );

    /// Number of values appended so far.
    fn len(&self) -> usize;

    /// Whether nothing has been appended yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
