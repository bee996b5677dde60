use asap_scheduler::{Callback, Mechanism, WakeReason, WakeUp};
use std::panic;
use std::time::Duration;

/// The smallest delay the tokio timer wheel resolves.
pub const MIN_TIMER_DELAY: Duration = Duration::from_millis(1);

/// `true` if `spawn_local` works on this thread right now.
///
/// Tokio offers no query for the current `LocalSet`, so this spawns an empty
/// local task and sees whether tokio panics.
pub(crate) fn local_set_entered() -> bool {
    panic::catch_unwind(|| drop(tokio::task::spawn_local(async {}))).is_ok()
}

/// `true` if a runtime with its time driver enabled is current.
fn timers_enabled() -> bool {
    panic::catch_unwind(|| drop(tokio::time::sleep(Duration::ZERO))).is_ok()
}

pub(crate) fn detect_immediate() -> Option<Box<dyn WakeUp>> {
    local_set_entered().then(|| Box::new(LocalImmediate) as Box<dyn WakeUp>)
}

pub(crate) fn detect_timer() -> Option<Box<dyn WakeUp>> {
    (local_set_entered() && timers_enabled()).then(|| Box::new(LocalTimer) as Box<dyn WakeUp>)
}

/// Spawns the flush as a local task; it runs on the local set's next tick.
///
/// A recovery request yields once before flushing so the runtime gets to
/// drive I/O between a failed pass and the next one.
///
/// `spawn_local` does not carry the caller's `tracing` span into the new
/// task: the flush is polled by the `LocalSet` itself, so it never runs
/// inside the span of whatever code requested it. That is what keeps the
/// request context-neutral under [`SpanContext`](crate::SpanContext), whose
/// `set_active` cannot leave a span.
///
/// # Panics
///
/// `request` panics when called outside of a `LocalSet`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalImmediate;

impl WakeUp for LocalImmediate {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Immediate
    }

    fn request(&self, callback: Callback, reason: WakeReason) {
        tokio::task::spawn_local(async move {
            if reason == WakeReason::Recovering {
                tokio::task::yield_now().await;
            }
            callback();
        });
    }
}

/// Spawns the flush behind a [`MIN_TIMER_DELAY`] sleep. Like
/// [`LocalImmediate`], the flush task starts with no span of the caller's.
///
/// # Panics
///
/// `request` panics when called outside of a `LocalSet`; the flush panics
/// if the runtime was built without its time driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTimer;

impl WakeUp for LocalTimer {
    fn mechanism(&self) -> Mechanism {
        Mechanism::Timer
    }

    fn request(&self, callback: Callback, _reason: WakeReason) {
        tokio::task::spawn_local(async move {
            tokio::time::sleep(MIN_TIMER_DELAY).await;
            callback();
        });
    }
}
