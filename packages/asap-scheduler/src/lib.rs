//! Run a task in a future turn of a single-threaded event loop, as soon as the
//! loop is free.
//!
//! The core is host-agnostic: a [`Scheduler`] owns the task queue and the
//! "armed" state, and asks a [`WakeUp`] primitive supplied by the host for a
//! flush callback on a later turn. Host crates provide the primitives and pick
//! the best one once, at startup, with [`wake::select`].

pub mod context;
pub mod error;
pub mod manual;
pub mod queue;
pub mod scheduler;
pub mod task;
pub mod wake;

pub use context::{Ambient, ExecutionContext};
pub use error::{ErrorPolicy, ErrorReporter, TaskError};
pub use manual::ManualLoop;
pub use queue::TaskQueue;
pub use scheduler::{Metrics, Scheduler, SchedulerBuilder, SchedulerConfig};
pub use task::Task;
pub use wake::{Callback, Mechanism, Probe, WakeReason, WakeUp};
