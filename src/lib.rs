//! `parexec`: bounded-concurrency task executor.
//!
//! Runs a list of independent tasks on their own threads, never more than a
//! concurrency ceiling at once, under a single wall-clock deadline. Results come
//! back in submission order; a deadline or interrupt yields a [`RunFailure`]
//! carrying whatever finished.
//!
//! Invariants:
//! - one outcome per submitted task, in submission order
//! - running tasks never exceed the ceiling
//! - host slot usage never exceeds each host's limit
//! - only the calling thread mutates scheduling state
//!
//! Cancellation is cooperative. Tasks that ignore [`cancel::is_cancelled`]
//! may keep running after a failed run returns.

pub mod cancel;
pub mod config;
pub mod demo;
pub mod error;
pub mod executor;
pub mod handle;
pub mod hosts;
pub mod task;
pub mod trace;

pub use cancel::CancelToken;
pub use config::ExecutorConfig;
pub use error::{ExecError, FailureKind, RunFailure};
pub use executor::{BoundedExecutor, Outcome, RunResult, DEFAULT_POLL_QUANTUM};
pub use handle::{HandleState, PanicPolicy, TaskHandle, TaskResult};
pub use hosts::{ConcurrencyPolicy, HostDescriptor, HostSpec, HostTable};
pub use task::{task_fn, FnTask, HostAware, HostCell, Task};
