//! Runtime system
//!
//! This module contains the task abstraction, the bounded pool that runs
//! tasks, and the sinks tasks write their output into.

pub mod cancel;
pub mod drain;
pub mod pool;
pub mod task;

pub use cancel::CancelToken;
pub use drain::{Drainer, LockedDrainer, Sink};
pub use pool::{Pool, PoolError, PoolStats, TaskError, TaskPanic};
pub use task::{
    shared, Args, ArgsError, Backoff, RetryPolicy, RunContext, Shared, Task, Worker, Workers,
};
