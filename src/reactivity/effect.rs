//! Effect primitive.
//!
//! An effect is a re-runnable unit of work. While it runs it is the
//! implicit tracker: every tracked read joins it to that dependency, and
//! any later write to a joined dependency re-runs it (or hands it to its
//! scheduler).

use std::cell::RefCell;
use std::rc::Rc;

use super::dep::{
    self, DebugHook, EffectBody, EffectId, EffectSpec, SchedulerFn,
};
use super::scope::record_in_current_scope;

/// Options for [`create_effect`].
#[derive(Default)]
pub struct EffectOptions {
    /// Do not run at creation; the caller runs it when first needed.
    pub lazy: bool,
    /// Run before non-computed effects on trigger fan-out.
    pub computed: bool,
    /// Called with the effect id instead of running it inline.
    pub scheduler: Option<SchedulerFn>,
    pub on_track: Option<DebugHook>,
    pub on_trigger: Option<DebugHook>,
    pub on_stop: Option<Box<dyn FnOnce()>>,
}

impl EffectOptions {
    pub fn lazy() -> Self {
        Self { lazy: true, ..Default::default() }
    }

    pub fn with_scheduler(f: impl Fn(EffectId) + 'static) -> Self {
        Self { scheduler: Some(Rc::new(f)), ..Default::default() }
    }
}

/// Create an effect with explicit options. Runs immediately unless `lazy`.
pub fn create_effect(f: impl FnMut() + 'static, options: EffectOptions) -> EffectId {
    let body: EffectBody = Rc::new(RefCell::new(f));
    let id = dep::register_effect(EffectSpec {
        body,
        computed: options.computed,
        scheduler: options.scheduler,
        on_track: options.on_track,
        on_trigger: options.on_trigger,
        on_stop: options.on_stop,
    });
    record_in_current_scope(id);
    if !options.lazy {
        dep::run_effect(id);
    }
    id
}

/// Create and immediately run an effect; returns a stop function.
///
/// ```ignore
/// let stop = effect(move || {
///     let value = count.get();
///     render(value);
/// });
/// // ...
/// stop();
/// ```
pub fn effect(f: impl FnMut() + 'static) -> impl FnOnce() {
    let id = create_effect(f, EffectOptions::default());
    move || dep::stop_effect(id)
}

/// Re-run an effect by id (used by schedulers and computed cells).
pub fn run_effect(id: EffectId) {
    dep::run_effect(id);
}

/// Deactivate an effect and detach it from every dependency set.
pub fn stop_effect(id: EffectId) {
    dep::stop_effect(id);
}

/// Monotonic creation order; the scheduler's sort key.
pub(crate) fn effect_ord(id: EffectId) -> Option<u64> {
    dep::effect_ord(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactivity::{reset_reactivity, Signal};
    use std::cell::Cell;

    #[test]
    fn test_effect_runs_immediately() {
        reset_reactivity();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let _stop = effect(move || r.set(r.get() + 1));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_effect_reruns_on_write() {
        reset_reactivity();
        let count = Signal::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let c = count.clone();
        let _stop = effect(move || s.borrow_mut().push(c.get()));

        count.set(1);
        count.set(2);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_stop_function() {
        reset_reactivity();
        let count = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let c = count.clone();
        let stop = effect(move || {
            r.set(r.get() + 1);
            c.get();
        });
        stop();
        count.set(5);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_lazy_effect() {
        reset_reactivity();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let id = create_effect(move || r.set(r.get() + 1), EffectOptions::lazy());
        assert_eq!(runs.get(), 0);
        run_effect(id);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_scheduler_receives_id_instead_of_run() {
        reset_reactivity();
        let count = Signal::new(0);
        let runs = Rc::new(Cell::new(0));
        let scheduled = Rc::new(Cell::new(0));

        let r = runs.clone();
        let c = count.clone();
        let s = scheduled.clone();
        let _id = create_effect(
            move || {
                r.set(r.get() + 1);
                c.get();
            },
            EffectOptions {
                scheduler: Some(Rc::new(move |_id| s.set(s.get() + 1))),
                ..Default::default()
            },
        );
        assert_eq!(runs.get(), 1);

        count.set(1);
        // Trigger went to the scheduler, not the body.
        assert_eq!(runs.get(), 1);
        assert_eq!(scheduled.get(), 1);
    }
}
