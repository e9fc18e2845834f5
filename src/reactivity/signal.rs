//! Signal: a single-cell tracked container.
//!
//! Reads track on the sentinel `Value` key; writes compare with
//! `PartialEq` and trigger only on change. Cloning a signal clones the
//! handle, not the cell.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::dep::{register_target, track, trigger, DepKey, TargetId, TargetKind, TrackOp, TriggerOp};

struct SignalInner<T> {
    target: TargetId,
    value: RefCell<T>,
}

/// A reactive single-value cell.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&*self.inner.value.borrow()).finish()
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                target: register_target(TargetKind::Cell),
                value: RefCell::new(value),
            }),
        }
    }

    /// Tracked read.
    pub fn get(&self) -> T {
        track(self.inner.target, TrackOp::Get, DepKey::Value);
        self.inner.value.borrow().clone()
    }

    /// Untracked read.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Write; triggers only if the value actually changed.
    pub fn set(&self, value: T) {
        let changed = {
            let mut slot = self.inner.value.borrow_mut();
            if *slot == value {
                false
            } else {
                *slot = value;
                true
            }
        };
        if changed {
            trigger(self.inner.target, TriggerOp::Set, Some(DepKey::Value), None);
        }
    }

    /// In-place update; always triggers (the closure may mutate interior
    /// state that `PartialEq` cannot see).
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        trigger(self.inner.target, TriggerOp::Set, Some(DepKey::Value), None);
    }

    /// Handle identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn target(&self) -> TargetId {
        self.inner.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactivity::{effect, reset_reactivity};
    use std::cell::Cell;

    #[test]
    fn test_get_set() {
        reset_reactivity();
        let s = Signal::new(10);
        assert_eq!(s.get(), 10);
        s.set(20);
        assert_eq!(s.get(), 20);
    }

    #[test]
    fn test_same_value_does_not_trigger() {
        reset_reactivity();
        let s = Signal::new(1);
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let s2 = s.clone();
        let _stop = effect(move || {
            r.set(r.get() + 1);
            s2.get();
        });
        assert_eq!(runs.get(), 1);

        s.set(1);
        assert_eq!(runs.get(), 1, "identical write must not notify");
        s.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_peek_does_not_track() {
        reset_reactivity();
        let s = Signal::new(1);
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let s2 = s.clone();
        let _stop = effect(move || {
            r.set(r.get() + 1);
            s2.peek();
        });
        s.set(2);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_handle_identity() {
        reset_reactivity();
        let a = Signal::new(0);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Signal::new(0)));
    }
}
