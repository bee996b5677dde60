use asap_scheduler::{ErrorReporter, TaskError};

/// Logs reported failures from a separate local task, after the drain that
/// caught them has moved on.
///
/// Must be used from inside a `LocalSet`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalReporter;

impl ErrorReporter for LocalReporter {
    fn report(&self, error: TaskError) {
        tokio::task::spawn_local(async move {
            tracing::error!(error = %error, "unhandled task failure");
        });
    }
}
