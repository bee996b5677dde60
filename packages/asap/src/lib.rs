//! Run a task in a future turn of this thread's event loop, as soon as the
//! loop is free.
//!
//! ```no_run
//! asap::asap(|| println!("after the current turn"));
//! ```
//!
//! The first call on a thread creates that thread's default [`Scheduler`] on
//! the best wake-up primitive of the host: the JS environment on `wasm32`,
//! the current tokio `LocalSet` elsewhere. [`install`] replaces that choice
//! with an explicitly configured scheduler.

use std::cell::OnceCell;
use thiserror::Error;

pub use asap_scheduler::{
    Ambient, ErrorPolicy, ErrorReporter, ExecutionContext, ManualLoop, Mechanism, Metrics,
    Scheduler, SchedulerConfig, Task, TaskError, WakeReason, WakeUp,
};

thread_local! {
    static DEFAULT: OnceCell<Scheduler> = const { OnceCell::new() };
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("a default scheduler is already in use on this thread")]
    AlreadyInstalled,
}

/// Makes `scheduler` this thread's default.
///
/// Fails once the default exists, whether installed or created by a first
/// call to [`asap`].
pub fn install(scheduler: Scheduler) -> Result<(), InstallError> {
    DEFAULT.with(|default| {
        default
            .set(scheduler)
            .map_err(|_| InstallError::AlreadyInstalled)
    })
}

/// This thread's default scheduler, created on first use.
///
/// # Panics
///
/// Panics if nothing was installed and the host offers no wake-up primitive
/// (natively: this thread is not inside a tokio `LocalSet`). Nothing is
/// cached then, so a later call from inside a `LocalSet` succeeds.
pub fn default_scheduler() -> Scheduler {
    DEFAULT.with(|default| {
        default
            .get_or_init(|| {
                tracing::debug!("creating this thread's default scheduler");
                host_scheduler()
            })
            .clone()
    })
}

/// Queues `task` on this thread's default scheduler.
///
/// Never runs `task` before returning. Tasks run in submission order; a task
/// scheduled from inside a task runs in the same flush.
pub fn asap(task: impl FnOnce() + 'static) {
    default_scheduler().schedule(task)
}

#[cfg(target_arch = "wasm32")]
fn host_scheduler() -> Scheduler {
    match asap_web::scheduler() {
        Ok(scheduler) => scheduler,
        Err(err) => panic!("cannot create the default scheduler: {err}"),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn host_scheduler() -> Scheduler {
    match asap_native::scheduler() {
        Ok(scheduler) => scheduler,
        Err(err) => panic!("cannot create the default scheduler: {err}"),
    }
}
