//! Wake-up capabilities: the host primitive used to get a flush callback
//! invoked on a later turn of the loop.

use std::fmt;
use std::rc::Rc;

/// The callback a scheduler hands to its wake-up primitive.
pub type Callback = Rc<dyn Fn()>;

/// Classes of wake-up primitive, in order of preference.
///
/// Lower variants have lower latency and fewer side effects, so `Ord` ranks
/// them: `Immediate < Mutation < Message < Timer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Mechanism {
    /// Runs as soon as the current turn ends, without starving pending I/O.
    Immediate,
    /// Zero-delay notification fired by observing a mutation.
    Mutation,
    /// Zero-delay delivery of a posted message.
    Message,
    /// Deferred callback with the host's minimum timer delay.
    Timer,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mechanism::Immediate => "immediate",
            Mechanism::Mutation => "mutation",
            Mechanism::Message => "message",
            Mechanism::Timer => "timer",
        })
    }
}

/// Why a scheduler is requesting a wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A task was submitted while the scheduler was at rest.
    Submitted,
    /// A task panicked and the drain is about to unwind; the request keeps the
    /// remaining tasks alive. Hosts with a recursion-prone primitive should
    /// use a primitive that yields to the loop first.
    Recovering,
    /// The callback reports a task failure and touches no queue. Made by a
    /// scheduler that has no [`ErrorReporter`](crate::ErrorReporter) of its
    /// own.
    Reporting,
}

/// A host primitive that invokes a callback once, asynchronously, as soon as
/// the loop is free.
///
/// A scheduler has at most one outstanding flush request, except that a
/// [`WakeReason::Recovering`] request may be made from inside the callback of
/// the previous one. [`WakeReason::Reporting`] requests come on top of those.
/// `request` must never invoke `callback` synchronously.
pub trait WakeUp {
    fn mechanism(&self) -> Mechanism;

    fn request(&self, callback: Callback, reason: WakeReason);
}

impl<W: WakeUp + ?Sized> WakeUp for Box<W> {
    fn mechanism(&self) -> Mechanism {
        (**self).mechanism()
    }

    fn request(&self, callback: Callback, reason: WakeReason) {
        (**self).request(callback, reason)
    }
}

impl<W: WakeUp + ?Sized> WakeUp for Rc<W> {
    fn mechanism(&self) -> Mechanism {
        (**self).mechanism()
    }

    fn request(&self, callback: Callback, reason: WakeReason) {
        (**self).request(callback, reason)
    }
}

/// Detects one wake-up primitive in the current environment.
pub struct Probe {
    pub mechanism: Mechanism,
    pub name: &'static str,
    pub detect: fn() -> Option<Box<dyn WakeUp>>,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("mechanism", &self.mechanism)
            .field("name", &self.name)
            .finish()
    }
}

/// Picks the best available wake-up primitive.
///
/// Probes run in order of [`Mechanism`] rank (ties keep their given order) and
/// the first that detects its primitive wins; later probes are never run.
pub fn select(probes: &[Probe]) -> Option<Box<dyn WakeUp>> {
    let mut ranked: Vec<&Probe> = probes.iter().collect();
    ranked.sort_by_key(|probe| probe.mechanism);

    for probe in ranked {
        if let Some(wake) = (probe.detect)() {
            tracing::debug!(
                mechanism = %probe.mechanism,
                primitive = probe.name,
                "selected wake-up primitive"
            );
            return Some(wake);
        }
        tracing::trace!(primitive = probe.name, "wake-up primitive unavailable");
    }
    None
}
