use asap_scheduler::{ExecutionContext, Task};
use tracing::Span;

/// Propagates the current `tracing` span to scheduled tasks.
///
/// A task runs inside the span that was current when it was scheduled. The
/// flush itself is spawned as a fresh, uninstrumented local task, so it never
/// inherits a span; `set_active` has nothing to do because `tracing` only
/// leaves a span through the guard that entered it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpanContext;

impl ExecutionContext for SpanContext {
    type Context = Span;

    fn active(&self) -> Option<Span> {
        let span = Span::current();
        (!span.is_none()).then_some(span)
    }

    fn set_active(&self, _context: Option<Span>) {}

    fn bind(&self, task: Task, span: Span) -> Task {
        task.wrap(move |task| span.in_scope(|| task.run()))
    }
}
