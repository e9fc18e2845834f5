//! Effect scopes.
//!
//! A scope collects every effect created while it is running so they can
//! be stopped together. Control-flow helpers and component instances use
//! scopes as their cleanup boundary.

use std::cell::RefCell;
use std::rc::Rc;

use super::dep::{stop_effect, EffectId};

#[derive(Default)]
struct ScopeInner {
    effects: RefCell<Vec<EffectId>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    stopped: RefCell<bool>,
}

/// Owns effects registered while [`EffectScope::run`] executes.
#[derive(Clone, Default)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

thread_local! {
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = RefCell::new(Vec::new());
}

impl EffectScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with this scope active; effects created inside are adopted.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        SCOPE_STACK.with(|s| s.borrow_mut().push(self.clone()));
        struct Guard;
        impl Drop for Guard {
            fn drop(&mut self) {
                SCOPE_STACK.with(|s| {
                    s.borrow_mut().pop();
                });
            }
        }
        let _guard = Guard;
        f()
    }

    /// Adopt an effect created outside `run`.
    pub fn adopt(&self, id: EffectId) {
        self.inner.effects.borrow_mut().push(id);
    }

    /// Stop every adopted effect and run registered dispose callbacks.
    /// Idempotent.
    pub fn stop(&self) {
        if std::mem::replace(&mut *self.inner.stopped.borrow_mut(), true) {
            return;
        }
        for id in self.inner.effects.borrow_mut().drain(..) {
            stop_effect(id);
        }
        let cleanups = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }
}

/// Create a new scope.
pub fn effect_scope() -> EffectScope {
    EffectScope::new()
}

/// Register a callback that runs when the innermost active scope stops.
/// Outside any scope this is a no-op.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) {
    SCOPE_STACK.with(|s| {
        if let Some(scope) = s.borrow().last() {
            scope.inner.cleanups.borrow_mut().push(Box::new(f));
        }
    });
}

/// Called by effect creation: adopt into the innermost active scope.
pub(crate) fn record_in_current_scope(id: EffectId) {
    SCOPE_STACK.with(|s| {
        if let Some(scope) = s.borrow().last() {
            scope.adopt(id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactivity::{effect, reset_reactivity, Signal};
    use std::cell::Cell;

    #[test]
    fn test_scope_stops_effects() {
        reset_reactivity();
        let count = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let scope = effect_scope();
        let r = runs.clone();
        let c = count.clone();
        scope.run(move || {
            let _stop = effect(move || {
                r.set(r.get() + 1);
                c.get();
            });
        });
        assert_eq!(runs.get(), 1);

        scope.stop();
        count.set(1);
        assert_eq!(runs.get(), 1, "effect inside stopped scope must not rerun");
    }

    #[test]
    fn test_on_scope_dispose() {
        reset_reactivity();
        let disposed = Rc::new(Cell::new(false));
        let scope = effect_scope();
        let d = disposed.clone();
        scope.run(move || on_scope_dispose(move || d.set(true)));

        assert!(!disposed.get());
        scope.stop();
        assert!(disposed.get());
        // Idempotent.
        scope.stop();
    }
}
