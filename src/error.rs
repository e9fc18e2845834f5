//! Runtime error funnel.
//!
//! Every invocation of user code (setup, render, watcher callbacks,
//! lifecycle hooks, event handlers, directive hooks, scheduler jobs, ref
//! functions) reports failures here instead of raising. The funnel walks
//! the component parent chain invoking `errorCaptured` hooks; a hook
//! returning `true` halts propagation. If the chain exhausts, the app's
//! configured error handler runs; failing that, the error is logged.

use thiserror::Error;
use tracing::error;

use crate::component::Instance;

/// Where in the framework the user code was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Setup,
    Render,
    WatcherCallback,
    WatcherCleanup,
    LifecycleHook,
    EventHandler,
    DirectiveHook,
    SchedulerJob,
    RefFunction,
    Expression,
}

impl ErrorSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSource::Setup => "setup function",
            ErrorSource::Render => "render function",
            ErrorSource::WatcherCallback => "watcher callback",
            ErrorSource::WatcherCleanup => "watcher cleanup function",
            ErrorSource::LifecycleHook => "lifecycle hook",
            ErrorSource::EventHandler => "event handler",
            ErrorSource::DirectiveHook => "directive hook",
            ErrorSource::SchedulerJob => "scheduler flush",
            ErrorSource::RefFunction => "ref function",
            ErrorSource::Expression => "template expression",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("error in {}: {message}", .origin.as_str())]
pub struct RuntimeError {
    pub origin: ErrorSource,
    pub message: String,
}

impl RuntimeError {
    pub fn new(origin: ErrorSource, message: impl Into<String>) -> Self {
        Self { origin, message: message.into() }
    }
}

/// Run the error capture chain for an error raised in `instance` (or
/// outside any component when `None`).
pub fn handle_error(instance: Option<&Instance>, err: RuntimeError) {
    let mut current = instance.cloned();
    while let Some(inst) = current {
        for hook in inst.error_captured_hooks() {
            if hook(&err) {
                return;
            }
        }
        current = inst.parent();
    }
    if let Some(inst) = instance {
        if let Some(handler) = inst.app_error_handler() {
            handler(&err);
            return;
        }
    }
    error!(origin = err.origin.as_str(), "{}", err.message);
}

/// Funnel for fallible framework-invoked user code.
pub fn invoke_with_error_handling<T>(
    instance: Option<&Instance>,
    source: ErrorSource,
    f: impl FnOnce() -> Result<T, String>,
) -> Option<T> {
    match f() {
        Ok(value) => Some(value),
        Err(message) => {
            handle_error(instance, RuntimeError::new(source, message));
            None
        }
    }
}
