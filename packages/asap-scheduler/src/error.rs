use std::any::Any;
use thiserror::Error;

/// A task panicked while the scheduler was draining.
#[derive(Debug, Error)]
#[error("task panicked: {message}")]
pub struct TaskError {
    message: String,
    payload: Box<dyn Any + Send>,
}

impl TaskError {
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_owned()
        };
        Self { message, payload }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the original panic payload, for `std::panic::resume_unwind`.
    pub fn into_panic(self) -> Box<dyn Any + Send> {
        self.payload
    }
}

/// What a drain does when a task panics.
///
/// This is an explicit input rather than something detected at runtime: hosts
/// whose loop dies on an uncaught error want `Rethrow`, hosts whose loop keeps
/// running want `Report`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorPolicy {
    /// Request a new wake-up, then resume the panic out of the drain. Tasks
    /// queued behind the failing one run on the next pass, if anything up
    /// the stack catches the panic.
    #[default]
    Rethrow,
    /// Keep draining and hand the error to the [`ErrorReporter`], which
    /// surfaces it on a later turn.
    Report,
}

/// The host's channel for errors that were not allowed to interrupt a drain.
///
/// Implementations should surface the error on a later, independent turn of
/// the loop rather than synchronously. A scheduler without one logs the error
/// at `error` level from a [`WakeReason::Reporting`](crate::WakeReason::Reporting)
/// wake-up of its own.
pub trait ErrorReporter {
    fn report(&self, error: TaskError);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn message_is_extracted_from_common_payloads() {
        let err = TaskError::from_panic(Box::new("static message"));
        assert_eq!(err.message(), "static message");

        let err = TaskError::from_panic(Box::new(format!("formatted {}", 42)));
        assert_eq!(err.message(), "formatted 42");
        assert_eq!(err.to_string(), "task panicked: formatted 42");

        let err = TaskError::from_panic(Box::new(17_u32));
        assert_eq!(err.message(), "Box<dyn Any>");
    }

    #[test]
    fn payload_survives_the_round_trip() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let err = TaskError::from_panic(payload);
        assert_eq!(err.message(), "boom");

        let payload = err.into_panic();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    }
}
