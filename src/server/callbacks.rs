//! Host callbacks, invoked on the server thread.
//!
//! Errors returned by the event callback and panics raised by either callback
//! are caught and logged; they never reach the server loop.

use crate::error::ErrorSeverity;
use crate::events::Event;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// Receives every delivered event.
pub type EventCallback = Box<dyn Fn(Event) -> anyhow::Result<()> + Send + Sync>;

/// Receives Warning and Critical reports.
pub type ErrorCallback = Box<dyn Fn(ErrorSeverity, &str) + Send + Sync>;

pub(crate) struct Callbacks {
    on_event: EventCallback,
    on_error: ErrorCallback,
}

impl Callbacks {
    pub(crate) fn new(on_event: EventCallback, on_error: ErrorCallback) -> Self {
        Self { on_event, on_error }
    }

    pub(crate) fn event(&self, event: Event) {
        let kind = event.kind();
        match catch_unwind(AssertUnwindSafe(|| (self.on_event)(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(kind, error = %e, "event callback failed"),
            Err(panic) => warn!(kind, panic = %panic_message(&*panic), "event callback panicked"),
        }
    }

    pub(crate) fn error(&self, severity: ErrorSeverity, message: &str) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (self.on_error)(severity, message))) {
            warn!(%severity, panic = %panic_message(&*panic), "error callback panicked");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn progress() -> Event {
        Event::Progress {
            point: vec![1.0],
            kpis: vec![2.0],
            iteration: None,
        }
    }

    #[test]
    fn test_event_callback_failures_are_contained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let callbacks = Callbacks::new(
            Box::new(move |_| {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    anyhow::bail!("host rejected event");
                }
                panic!("host exploded");
            }),
            Box::new(|_, _| {}),
        );

        callbacks.event(progress());
        callbacks.event(progress());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_error_callback_panic_is_contained() {
        let callbacks = Callbacks::new(
            Box::new(|_| Ok(())),
            Box::new(|_, _| panic!("boom")),
        );
        callbacks.error(ErrorSeverity::Warning, "dropped");
    }

    #[test]
    fn test_panic_message_extraction() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*owned), "owned");
        assert_eq!(panic_message(&*borrowed), "borrowed");
        assert_eq!(panic_message(&*other), "unknown panic");
    }
}
