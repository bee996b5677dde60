use crate::wake::Timeout;
use asap_scheduler::{ErrorReporter, TaskError};
use wasm_bindgen::prelude::*;

/// Rethrows reported failures as uncaught JS errors from a later
/// `setTimeout`, so they reach the console and `window.onerror` without
/// interrupting the drain that caught them.
pub struct ThrowLater {
    timeout: Option<Timeout>,
}

impl Default for ThrowLater {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrowLater {
    pub fn new() -> Self {
        Self {
            timeout: Timeout::detect(),
        }
    }
}

impl ErrorReporter for ThrowLater {
    fn report(&self, error: TaskError) {
        let message = error.to_string();
        let Some(timeout) = &self.timeout else {
            tracing::error!(error = %message, "unhandled task failure");
            return;
        };

        let throw = Closure::once_into_js(move || -> Result<(), JsValue> {
            Err(js_sys::Error::new(&message).into())
        });
        if let Err(err) = timeout.defer(&throw) {
            tracing::error!(error = %error_message(&err), "could not defer task failure");
        }
    }
}

fn error_message(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}
