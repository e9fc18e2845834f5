//! Computed: a lazy, cached, dirty-tracked derived cell.
//!
//! The inner effect's scheduler never recomputes eagerly; it only marks
//! the cell dirty and re-triggers downstream readers. The getter runs at
//! most once between any two dependency updates, and only when read.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::warn;

use super::dep::{
    register_target, track, trigger, DepKey, EffectId, TargetId, TargetKind, TrackOp, TriggerOp,
};
use super::effect::{create_effect, run_effect, stop_effect, EffectOptions};

struct ComputedState<T> {
    target: TargetId,
    dirty: Rc<Cell<bool>>,
    value: Rc<RefCell<Option<T>>>,
    effect: EffectId,
    setter: Option<Rc<dyn Fn(T)>>,
}

/// A cached derived value. Acts as an effect downstream of its
/// dependencies and as a tracked source upstream of its readers.
pub struct Computed<T> {
    state: Rc<ComputedState<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T: Clone + 'static> Computed<T> {
    pub fn new(getter: impl Fn() -> T + 'static) -> Self {
        Self::build(getter, None)
    }

    /// A writable computed: writes go through `setter`.
    pub fn with_setter(getter: impl Fn() -> T + 'static, setter: impl Fn(T) + 'static) -> Self {
        Self::build(getter, Some(Rc::new(setter)))
    }

    fn build(getter: impl Fn() -> T + 'static, setter: Option<Rc<dyn Fn(T)>>) -> Self {
        let target = register_target(TargetKind::Cell);
        let dirty = Rc::new(Cell::new(true));
        let value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

        let value_for_body = value.clone();
        let dirty_for_scheduler = dirty.clone();
        let effect = create_effect(
            move || {
                *value_for_body.borrow_mut() = Some(getter());
            },
            EffectOptions {
                lazy: true,
                computed: true,
                scheduler: Some(Rc::new(move |_id| {
                    // Invalidate once; downstream recomputes on next read.
                    if !dirty_for_scheduler.get() {
                        dirty_for_scheduler.set(true);
                        trigger(target, TriggerOp::Set, Some(DepKey::Value), None);
                    }
                })),
                ..Default::default()
            },
        );

        Self {
            state: Rc::new(ComputedState { target, dirty, value, effect, setter }),
        }
    }

    /// Tracked read; recomputes only if dirty.
    pub fn get(&self) -> T {
        if self.state.dirty.get() {
            run_effect(self.state.effect);
            self.state.dirty.set(false);
        }
        track(self.state.target, TrackOp::Get, DepKey::Value);
        self.state
            .value
            .borrow()
            .clone()
            .unwrap_or_else(|| unreachable_value())
    }

    /// Untracked read of the cached value (recomputes if dirty).
    pub fn peek(&self) -> T {
        if self.state.dirty.get() {
            run_effect(self.state.effect);
            self.state.dirty.set(false);
        }
        self.state.value.borrow().clone().unwrap_or_else(|| unreachable_value())
    }

    /// Write through the setter, if any.
    pub fn set(&self, value: T) {
        match &self.state.setter {
            Some(setter) => setter(value),
            None => warn!("write to a computed with no setter ignored"),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Detach the inner effect. Later reads return the last cached value.
    pub fn stop(&self) {
        stop_effect(self.state.effect);
    }
}

fn unreachable_value<T>() -> T {
    // The inner effect always stores a value before `dirty` clears; a read
    // can only land here if the getter itself panicked mid-run.
    panic!("computed read before its getter produced a value")
}

impl<T: std::fmt::Debug + Clone + 'static> std::fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed").field("dirty", &self.state.dirty.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactivity::{effect, reset_reactivity, Signal};
    use std::cell::Cell;

    #[test]
    fn test_lazy_and_cached() {
        reset_reactivity();
        let count = Signal::new(1);
        let calls = Rc::new(Cell::new(0));

        let c = count.clone();
        let k = calls.clone();
        let plus_one = Computed::new(move || {
            k.set(k.get() + 1);
            c.get() + 1
        });
        assert_eq!(calls.get(), 0, "computed is lazy");

        assert_eq!(plus_one.get(), 2);
        assert_eq!(plus_one.get(), 2);
        assert_eq!(calls.get(), 1, "second read hits the cache");

        count.set(5);
        assert_eq!(calls.get(), 1, "invalidation does not recompute eagerly");
        assert_eq!(plus_one.get(), 6);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_at_most_once_per_update_cycle() {
        reset_reactivity();
        let a = Signal::new(1);
        let b = Signal::new(2);
        let calls = Rc::new(Cell::new(0));

        let (a2, b2, k) = (a.clone(), b.clone(), calls.clone());
        let sum = Computed::new(move || {
            k.set(k.get() + 1);
            a2.get() + b2.get()
        });
        sum.get();

        a.set(10);
        b.set(20);
        assert_eq!(sum.get(), 30);
        assert_eq!(calls.get(), 2, "two dependency writes, one recompute");
    }

    #[test]
    fn test_downstream_effect_sees_fresh_value() {
        reset_reactivity();
        let count = Signal::new(0);
        let c = count.clone();
        let doubled = Computed::new(move || c.get() * 2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let d = doubled.clone();
        let _stop = effect(move || s.borrow_mut().push(d.get()));

        count.set(3);
        assert_eq!(*seen.borrow(), vec![0, 6]);
    }

    #[test]
    fn test_chained_computed() {
        reset_reactivity();
        let count = Signal::new(1);
        let c = count.clone();
        let double = Computed::new(move || c.get() * 2);
        let d = double.clone();
        let quad = Computed::new(move || d.get() * 2);

        assert_eq!(quad.get(), 4);
        count.set(2);
        assert_eq!(quad.get(), 8);
    }

    #[test]
    fn test_writable_computed() {
        reset_reactivity();
        let count = Signal::new(1);
        let (cg, cs) = (count.clone(), count.clone());
        let plus_one =
            Computed::with_setter(move || cg.get() + 1, move |v| cs.set(v - 1));

        assert_eq!(plus_one.get(), 2);
        plus_one.set(10);
        assert_eq!(count.peek(), 9);
        assert_eq!(plus_one.get(), 10);
    }
}
