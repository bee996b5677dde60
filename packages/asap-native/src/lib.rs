//! Tokio host for `asap-scheduler`.
//!
//! Flushes are spawned onto the current [`tokio::task::LocalSet`], so a
//! scheduler built here must be used from inside one (for example from
//! `LocalSet::run_until`). The default error policy is
//! [`ErrorPolicy::Rethrow`](asap_scheduler::ErrorPolicy::Rethrow): a panicking
//! task unwinds out of its flush, where tokio catches it, and the recovery
//! request keeps the rest of the queue moving.

pub mod context;
pub mod report;
pub mod wake;

use asap_scheduler::{Mechanism, Probe, Scheduler, SchedulerConfig};
use thiserror::Error;
use tokio::runtime::Handle;

pub use context::SpanContext;
pub use report::LocalReporter;
pub use wake::{LocalImmediate, LocalTimer};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no tokio runtime is running on this thread")]
    NoRuntime,
    #[error("a tokio runtime is running, but not inside a `LocalSet`")]
    NoLocalSet,
    #[error("none of the requested wake-up primitives is available")]
    NoPrimitive,
}

/// Local-task flushes, available anywhere `spawn_local` works.
pub const IMMEDIATE: Probe = Probe {
    mechanism: Mechanism::Immediate,
    name: "spawn_local",
    detect: wake::detect_immediate,
};

/// Timer-paced flushes; also needs the runtime's time driver.
pub const TIMER: Probe = Probe {
    mechanism: Mechanism::Timer,
    name: "sleep",
    detect: wake::detect_timer,
};

/// The probes [`scheduler`] chooses from.
///
/// `TIMER` needs everything `IMMEDIATE` needs, so it would never be chosen
/// here. Pass it to [`scheduler_from`] to pace flushes by the timer instead.
pub const PROBES: [Probe; 1] = [IMMEDIATE];

/// A scheduler on the current `LocalSet` with the default configuration.
pub fn scheduler() -> Result<Scheduler, HostError> {
    scheduler_with(SchedulerConfig::default())
}

pub fn scheduler_with(config: SchedulerConfig) -> Result<Scheduler, HostError> {
    scheduler_from(&PROBES, config)
}

/// A scheduler on the best available primitive among `probes`.
///
/// Detection happens once, here: every primitive it can return works for
/// the rest of the current `LocalSet`, so `schedule` never fails.
pub fn scheduler_from(probes: &[Probe], config: SchedulerConfig) -> Result<Scheduler, HostError> {
    let wake = asap_scheduler::wake::select(probes).ok_or_else(unavailable)?;
    Ok(Scheduler::builder(wake)
        .config(config)
        .reporter(LocalReporter)
        .context(SpanContext)
        .build())
}

fn unavailable() -> HostError {
    if wake::local_set_entered() {
        HostError::NoPrimitive
    } else if Handle::try_current().is_ok() {
        HostError::NoLocalSet
    } else {
        HostError::NoRuntime
    }
}
