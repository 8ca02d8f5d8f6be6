//! Drainpool
//!
//! A bounded-concurrency task executor: run a batch of fallible operations
//! in parallel under a concurrency ceiling, retry them with exponential
//! backoff and jitter, and collect whatever they emit into a lock-free sink.
//!
//! # Example
//!
//! ```
//! use drainpool::{Drainer, Pool, Result, Task};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let lengths = Drainer::new();
//!     let words = ["spoon", "fork", "knife"];
//!
//!     let tasks: Vec<_> = words
//!         .into_iter()
//!         .map(|word| {
//!             Task::<(), usize>::new(move |args| {
//!                 args.send(word.len())?;
//!                 Ok(())
//!             })
//!             .drain_to(&lengths)
//!             .with_retry(3, Duration::from_millis(10))
//!         })
//!         .collect();
//!
//!     let mut pool = Pool::new().with_limit(2);
//!     pool.submit(tasks).wait()?;
//!     pool.close();
//!
//!     let mut lengths = lengths.drain();
//!     lengths.sort();
//!     assert_eq!(lengths, vec![4, 5, 5]);
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/drainpool")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use runtime::cancel::CancelToken;
pub use runtime::drain::{Drainer, LockedDrainer, Sink};
pub use runtime::pool::{Pool, PoolError, PoolStats, TaskError, TaskPanic};
pub use runtime::task::{
    retry, shared, Args, ArgsError, Backoff, RetryPolicy, RunContext, Shared, Task, Worker,
    Workers,
};
pub use util::config::{ConfigError, PoolConfig, RetryConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "drainpool";
