use asap_scheduler::{ErrorPolicy, Mechanism, Probe, Scheduler, SchedulerConfig};
use thiserror::Error;

pub mod report;
pub mod wake;

pub use report::ThrowLater;
pub use wake::{MessageWake, MutationWake, NodeTick, Timeout};

// Platform adapter for wasm32 hosts (browser, worker, Node)

#[derive(Debug, Error)]
pub enum HostError {
    #[error("no JS wake-up primitive is available")]
    NoPrimitive,
}

/// Wake-up primitives this host can offer, best first.
pub const PROBES: [Probe; 4] = [
    Probe {
        mechanism: Mechanism::Immediate,
        name: "process.nextTick",
        detect: wake::detect_node_tick,
    },
    Probe {
        mechanism: Mechanism::Mutation,
        name: "MutationObserver",
        detect: wake::detect_mutation,
    },
    Probe {
        mechanism: Mechanism::Message,
        name: "MessageChannel",
        detect: wake::detect_message,
    },
    Probe {
        mechanism: Mechanism::Timer,
        name: "setTimeout",
        detect: wake::detect_timeout,
    },
];

/// The configuration browsers expect: an uncaught error does not stop the
/// page, so a failing task is reported and the drain continues.
pub fn default_config() -> SchedulerConfig {
    SchedulerConfig {
        error_policy: ErrorPolicy::Report,
    }
}

pub fn scheduler() -> Result<Scheduler, HostError> {
    scheduler_with(default_config())
}

/// Builds a scheduler on the best primitive of the current JS environment.
///
/// Under Node, where an uncaught exception ends the process, pass
/// [`ErrorPolicy::Rethrow`].
pub fn scheduler_with(config: SchedulerConfig) -> Result<Scheduler, HostError> {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    let wake = asap_scheduler::wake::select(&PROBES).ok_or(HostError::NoPrimitive)?;
    Ok(Scheduler::builder(wake)
        .config(config)
        .reporter(ThrowLater::new())
        .build())
}
