//! Tracked containers: `Store` (keyed) and `ListStore` (indexed).
//!
//! These are the handle substitution for transparent proxies: every read
//! tracks, every write triggers, and nested aggregates read out of a store
//! are reactive handles themselves, so deep reactivity needs no lazy
//! wrapping step and identity is stable by construction.
//!
//! Read-only and shallow views share the inner target and differ only in
//! handler behavior: a read-only view rejects writes with a diagnostic and
//! propagates read-only-ness to nested aggregates; a shallow view does not
//! unwrap signals on read.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::warn;

use super::dep::{
    register_target, track, trigger, DepKey, TargetId, TargetKind, TrackOp, TriggerOp,
};
use crate::value::Value;

// =============================================================================
// Store
// =============================================================================

struct StoreInner {
    target: TargetId,
    entries: RefCell<IndexMap<String, Value>>,
}

/// A reactive keyed container over `String → Value` entries.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
    readonly: bool,
    shallow: bool,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner {
                target: register_target(TargetKind::Map),
                entries: RefCell::new(IndexMap::new()),
            }),
            readonly: false,
            shallow: false,
        }
    }

    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let store = Self::new();
        {
            let mut map = store.inner.entries.borrow_mut();
            for (k, v) in entries {
                map.insert(k.into(), v);
            }
        }
        store
    }

    /// A read-only view over the same entries. Writing through it warns
    /// and is ignored.
    pub fn readonly_view(&self) -> Store {
        Store { inner: self.inner.clone(), readonly: true, shallow: self.shallow }
    }

    /// A view that tracks only top-level reads: signals read through it
    /// are returned as-is instead of being unwrapped.
    pub fn shallow_view(&self) -> Store {
        Store { inner: self.inner.clone(), readonly: self.readonly, shallow: true }
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_shallow(&self) -> bool {
        self.shallow
    }

    /// Same underlying target, regardless of view flags.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn target(&self) -> TargetId {
        self.inner.target
    }

    fn wrap_read(&self, value: Value) -> Value {
        let value = if self.shallow { value } else { value.unref() };
        if self.readonly {
            match value {
                Value::Map(s) => Value::Map(s.readonly_view()),
                Value::List(l) => Value::List(l.readonly_view()),
                other => other,
            }
        } else {
            value
        }
    }

    /// Tracked read.
    pub fn get(&self, key: &str) -> Value {
        track(self.inner.target, TrackOp::Get, DepKey::Prop(key.to_string()));
        let value = self.inner.entries.borrow().get(key).cloned().unwrap_or(Value::Null);
        self.wrap_read(value)
    }

    /// Untracked read; no signal unwrapping, no view wrapping.
    pub fn peek(&self, key: &str) -> Value {
        self.inner.entries.borrow().get(key).cloned().unwrap_or(Value::Null)
    }

    /// Tracked existence check.
    pub fn has(&self, key: &str) -> bool {
        track(self.inner.target, TrackOp::Has, DepKey::Prop(key.to_string()));
        self.inner.entries.borrow().contains_key(key)
    }

    /// Write. ADD vs SET is decided by key pre-existence; a write of a
    /// non-signal over an existing signal entry forwards to the signal.
    pub fn set(&self, key: &str, value: Value) {
        if self.readonly {
            warn!(key, "set on read-only store ignored");
            return;
        }
        enum Outcome {
            Forwarded(crate::reactivity::Signal<Value>, Value),
            Added,
            Changed,
            Unchanged,
        }
        let outcome = {
            let mut entries = self.inner.entries.borrow_mut();
            match entries.get(key) {
                Some(Value::Signal(signal)) if !matches!(value, Value::Signal(_)) => {
                    Outcome::Forwarded(signal.clone(), value)
                }
                Some(Value::Computed(computed)) if !matches!(value, Value::Computed(_)) => {
                    // Writable computed or a diagnostic from its setter.
                    computed.set(value);
                    Outcome::Unchanged
                }
                Some(old) if old.loose_eq(&value) => Outcome::Unchanged,
                Some(_) => {
                    entries.insert(key.to_string(), value);
                    Outcome::Changed
                }
                None => {
                    entries.insert(key.to_string(), value);
                    Outcome::Added
                }
            }
        };
        match outcome {
            Outcome::Forwarded(signal, value) => signal.set(value),
            Outcome::Added => trigger(
                self.inner.target,
                TriggerOp::Add,
                Some(DepKey::Prop(key.to_string())),
                None,
            ),
            Outcome::Changed => trigger(
                self.inner.target,
                TriggerOp::Set,
                Some(DepKey::Prop(key.to_string())),
                None,
            ),
            Outcome::Unchanged => {}
        }
    }

    /// Delete an entry; triggers only if it existed.
    pub fn remove(&self, key: &str) {
        if self.readonly {
            warn!(key, "remove on read-only store ignored");
            return;
        }
        let existed = self.inner.entries.borrow_mut().shift_remove(key).is_some();
        if existed {
            trigger(
                self.inner.target,
                TriggerOp::Delete,
                Some(DepKey::Prop(key.to_string())),
                None,
            );
        }
    }

    /// Remove every entry.
    pub fn clear(&self) {
        if self.readonly {
            warn!("clear on read-only store ignored");
            return;
        }
        let had_entries = {
            let mut entries = self.inner.entries.borrow_mut();
            let had = !entries.is_empty();
            entries.clear();
            had
        };
        if had_entries {
            trigger(self.inner.target, TriggerOp::Clear, None, None);
        }
    }

    /// Tracked entry count (iteration bucket).
    pub fn len(&self) -> usize {
        track(self.inner.target, TrackOp::Iterate, DepKey::Iterate);
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked key snapshot (key-iteration bucket: SET of an existing
    /// entry does not invalidate it).
    pub fn keys(&self) -> Vec<String> {
        track(self.inner.target, TrackOp::Iterate, DepKey::KeyIterate);
        self.inner.entries.borrow().keys().cloned().collect()
    }

    /// Tracked entry snapshot (iteration bucket).
    pub fn entries(&self) -> Vec<(String, Value)> {
        track(self.inner.target, TrackOp::Iterate, DepKey::Iterate);
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), self.wrap_read(v.clone())))
            .collect()
    }

    /// Untracked snapshot of raw entries.
    pub fn peek_entries(&self) -> Vec<(String, Value)> {
        self.inner.entries.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.inner.entries.borrow();
        f.debug_struct("Store")
            .field("len", &entries.len())
            .field("readonly", &self.readonly)
            .finish()
    }
}

// =============================================================================
// ListStore
// =============================================================================

struct ListInner {
    target: TargetId,
    items: RefCell<Vec<Value>>,
}

/// A reactive indexed container over `Vec<Value>`.
#[derive(Clone)]
pub struct ListStore {
    inner: Rc<ListInner>,
    readonly: bool,
    shallow: bool,
}

impl Default for ListStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ListStore {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ListInner {
                target: register_target(TargetKind::List),
                items: RefCell::new(Vec::new()),
            }),
            readonly: false,
            shallow: false,
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let list = Self::new();
        list.inner.items.borrow_mut().extend(values);
        list
    }

    pub fn readonly_view(&self) -> ListStore {
        ListStore { inner: self.inner.clone(), readonly: true, shallow: self.shallow }
    }

    pub fn shallow_view(&self) -> ListStore {
        ListStore { inner: self.inner.clone(), readonly: self.readonly, shallow: true }
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn ptr_eq(&self, other: &ListStore) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn target(&self) -> TargetId {
        self.inner.target
    }

    fn wrap_read(&self, value: Value) -> Value {
        let value = if self.shallow { value } else { value.unref() };
        if self.readonly {
            match value {
                Value::Map(s) => Value::Map(s.readonly_view()),
                Value::List(l) => Value::List(l.readonly_view()),
                other => other,
            }
        } else {
            value
        }
    }

    /// Tracked indexed read.
    pub fn get(&self, index: usize) -> Value {
        track(self.inner.target, TrackOp::Get, DepKey::Index(index));
        let value = self.inner.items.borrow().get(index).cloned().unwrap_or(Value::Null);
        self.wrap_read(value)
    }

    /// Write at `index`. Writing one past the end appends (ADD); writing
    /// in range is SET and triggers only on change.
    pub fn set(&self, index: usize, value: Value) {
        if self.readonly {
            warn!(index, "set on read-only list ignored");
            return;
        }
        enum Outcome {
            Added,
            Changed,
            Unchanged,
            OutOfBounds,
        }
        let outcome = {
            let mut items = self.inner.items.borrow_mut();
            if index < items.len() {
                if items[index].loose_eq(&value) {
                    Outcome::Unchanged
                } else {
                    items[index] = value;
                    Outcome::Changed
                }
            } else if index == items.len() {
                items.push(value);
                Outcome::Added
            } else {
                Outcome::OutOfBounds
            }
        };
        match outcome {
            Outcome::Added => {
                trigger(self.inner.target, TriggerOp::Add, Some(DepKey::Index(index)), None)
            }
            Outcome::Changed => {
                trigger(self.inner.target, TriggerOp::Set, Some(DepKey::Index(index)), None)
            }
            Outcome::Unchanged => {}
            Outcome::OutOfBounds => warn!(index, "list write past end ignored"),
        }
    }

    pub fn push(&self, value: Value) {
        if self.readonly {
            warn!("push on read-only list ignored");
            return;
        }
        let index = {
            let mut items = self.inner.items.borrow_mut();
            items.push(value);
            items.len() - 1
        };
        trigger(self.inner.target, TriggerOp::Add, Some(DepKey::Index(index)), None);
    }

    pub fn pop(&self) -> Value {
        if self.readonly {
            warn!("pop on read-only list ignored");
            return Value::Null;
        }
        let (popped, index) = {
            let mut items = self.inner.items.borrow_mut();
            let popped = items.pop();
            (popped, items.len())
        };
        match popped {
            Some(value) => {
                trigger(self.inner.target, TriggerOp::Delete, Some(DepKey::Index(index)), None);
                value
            }
            None => Value::Null,
        }
    }

    pub fn insert(&self, index: usize, value: Value) {
        if self.readonly {
            warn!(index, "insert on read-only list ignored");
            return;
        }
        let shifted = {
            let mut items = self.inner.items.borrow_mut();
            if index > items.len() {
                warn!(index, "list insert past end ignored");
                return;
            }
            items.insert(index, value);
            index + 1..items.len()
        };
        trigger(self.inner.target, TriggerOp::Add, Some(DepKey::Index(index)), None);
        for i in shifted {
            trigger(self.inner.target, TriggerOp::Set, Some(DepKey::Index(i)), None);
        }
    }

    pub fn remove(&self, index: usize) -> Value {
        if self.readonly {
            warn!(index, "remove on read-only list ignored");
            return Value::Null;
        }
        let (removed, shifted) = {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                return Value::Null;
            }
            let removed = items.remove(index);
            (removed, index..items.len())
        };
        trigger(self.inner.target, TriggerOp::Delete, Some(DepKey::Index(index)), None);
        for i in shifted {
            trigger(self.inner.target, TriggerOp::Set, Some(DepKey::Index(i)), None);
        }
        removed
    }

    /// Tracked length.
    pub fn len(&self) -> usize {
        track(self.inner.target, TrackOp::Get, DepKey::Length);
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shrink (or grow with nulls) to `len`. Shrinking invalidates every
    /// observer of a truncated index.
    pub fn set_len(&self, len: usize) {
        if self.readonly {
            warn!("set_len on read-only list ignored");
            return;
        }
        let old_len = {
            let mut items = self.inner.items.borrow_mut();
            let old = items.len();
            items.resize(len, Value::Null);
            old
        };
        if len < old_len {
            trigger(self.inner.target, TriggerOp::Set, Some(DepKey::Length), Some(len));
        } else if len > old_len {
            trigger(self.inner.target, TriggerOp::Add, Some(DepKey::Length), None);
        }
    }

    pub fn clear(&self) {
        if self.readonly {
            warn!("clear on read-only list ignored");
            return;
        }
        let had_items = {
            let mut items = self.inner.items.borrow_mut();
            let had = !items.is_empty();
            items.clear();
            had
        };
        if had_items {
            trigger(self.inner.target, TriggerOp::Clear, None, None);
        }
    }

    /// Tracked snapshot. Tracks length and every index, so an in-place
    /// element write invalidates iterating observers.
    pub fn to_vec(&self) -> Vec<Value> {
        track(self.inner.target, TrackOp::Iterate, DepKey::Length);
        let items = self.inner.items.borrow();
        for i in 0..items.len() {
            track(self.inner.target, TrackOp::Get, DepKey::Index(i));
        }
        items.iter().map(|v| self.wrap_read(v.clone())).collect()
    }

    /// Identity search. Tracks every index so any later mutation
    /// invalidates the query.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        track(self.inner.target, TrackOp::Iterate, DepKey::Length);
        let items = self.inner.items.borrow();
        for (i, item) in items.iter().enumerate() {
            track(self.inner.target, TrackOp::Get, DepKey::Index(i));
            if item.loose_eq(needle) {
                return Some(i);
            }
        }
        None
    }

    pub fn contains(&self, needle: &Value) -> bool {
        self.index_of(needle).is_some()
    }

    /// Untracked snapshot of raw items.
    pub fn peek_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }
}

impl fmt::Debug for ListStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListStore")
            .field("len", &self.inner.items.borrow().len())
            .field("readonly", &self.readonly)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactivity::{effect, reset_reactivity, Signal};
    use std::cell::Cell;

    #[test]
    fn test_store_get_set() {
        reset_reactivity();
        let store = Store::new();
        store.set("a", Value::from(1));
        assert_eq!(store.get("a"), Value::from(1));
        assert_eq!(store.get("missing"), Value::Null);
    }

    #[test]
    fn test_store_per_key_tracking() {
        reset_reactivity();
        let store = Store::new();
        store.set("a", Value::from(1));
        store.set("b", Value::from(2));

        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let s = store.clone();
        let _stop = effect(move || {
            r.set(r.get() + 1);
            s.get("a");
        });
        assert_eq!(runs.get(), 1);

        store.set("b", Value::from(3));
        assert_eq!(runs.get(), 1, "writing an unrelated key must not notify");
        store.set("a", Value::from(9));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_store_add_invalidates_iteration() {
        reset_reactivity();
        let store = Store::new();
        let lens = Rc::new(RefCell::new(Vec::new()));
        let l = lens.clone();
        let s = store.clone();
        let _stop = effect(move || l.borrow_mut().push(s.len()));

        store.set("x", Value::from(1));
        assert_eq!(*lens.borrow(), vec![0, 1]);

        // SET of an existing key invalidates entries observers too.
        store.set("x", Value::from(2));
        assert_eq!(*lens.borrow(), vec![0, 1, 1]);
    }

    #[test]
    fn test_store_keys_not_invalidated_by_set() {
        reset_reactivity();
        let store = Store::new();
        store.set("x", Value::from(1));
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let s = store.clone();
        let _stop = effect(move || {
            r.set(r.get() + 1);
            s.keys();
        });
        assert_eq!(runs.get(), 1);

        store.set("x", Value::from(2));
        assert_eq!(runs.get(), 1, "SET must not invalidate key iteration");
        store.set("y", Value::from(3));
        assert_eq!(runs.get(), 2, "ADD must invalidate key iteration");
    }

    #[test]
    fn test_store_signal_forwarding() {
        reset_reactivity();
        let inner = Signal::new(Value::from(1));
        let store = Store::new();
        store.set("count", Value::Signal(inner.clone()));

        // Non-shallow read unwraps the signal.
        assert_eq!(store.get("count"), Value::from(1));

        // Writing a plain value forwards into the signal.
        store.set("count", Value::from(5));
        assert_eq!(inner.peek(), Value::from(5));
        assert!(matches!(store.peek("count"), Value::Signal(_)));
    }

    #[test]
    fn test_store_shallow_view_keeps_signals() {
        reset_reactivity();
        let store = Store::new();
        store.set("s", Value::Signal(Signal::new(Value::from(1))));
        assert!(matches!(store.shallow_view().get("s"), Value::Signal(_)));
    }

    #[test]
    fn test_readonly_rejects_writes() {
        reset_reactivity();
        let store = Store::new();
        store.set("a", Value::from(1));
        let ro = store.readonly_view();
        ro.set("a", Value::from(2));
        ro.remove("a");
        assert_eq!(store.peek("a"), Value::from(1));
        assert!(ro.ptr_eq(&store));
    }

    #[test]
    fn test_readonly_propagates_to_nested() {
        reset_reactivity();
        let nested = Store::new();
        let store = Store::new();
        store.set("child", Value::Map(nested));
        let ro = store.readonly_view();
        match ro.get("child") {
            Value::Map(child) => assert!(child.is_readonly()),
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn test_list_index_tracking() {
        reset_reactivity();
        let list = ListStore::from_values([Value::from(1), Value::from(2)]);
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let l = list.clone();
        let _stop = effect(move || {
            r.set(r.get() + 1);
            l.get(0);
        });

        list.set(1, Value::from(9));
        assert_eq!(runs.get(), 1);
        list.set(0, Value::from(9));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_list_push_invalidates_length() {
        reset_reactivity();
        let list = ListStore::new();
        let lens = Rc::new(RefCell::new(Vec::new()));
        let l = lens.clone();
        let ls = list.clone();
        let _stop = effect(move || l.borrow_mut().push(ls.len()));

        list.push(Value::from(1));
        list.push(Value::from(2));
        assert_eq!(*lens.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_list_shrink_invalidates_truncated_indices() {
        reset_reactivity();
        let list = ListStore::from_values([Value::from(1), Value::from(2), Value::from(3)]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let l = list.clone();
        let _stop = effect(move || s.borrow_mut().push(l.get(2)));

        list.set_len(1);
        assert_eq!(*seen.borrow(), vec![Value::from(3), Value::Null]);
    }

    #[test]
    fn test_list_index_of_invalidated_by_mutation() {
        reset_reactivity();
        let list = ListStore::from_values([Value::from(1), Value::from(2)]);
        let found = Rc::new(RefCell::new(Vec::new()));
        let f = found.clone();
        let l = list.clone();
        let _stop = effect(move || f.borrow_mut().push(l.index_of(&Value::from(2))));
        assert_eq!(*found.borrow(), vec![Some(1)]);

        list.set(1, Value::from(7));
        assert_eq!(*found.borrow(), vec![Some(1), None]);
    }

    #[test]
    fn test_identity_stable() {
        reset_reactivity();
        let store = Store::new();
        let child = Store::new();
        store.set("c", Value::Map(child.clone()));
        let a = store.get("c");
        let b = store.get("c");
        // Same handle both times: wrap(x) == wrap(x).
        assert_eq!(a, b);
        match (a, b) {
            (Value::Map(x), Value::Map(y)) => assert!(x.ptr_eq(&y) && x.ptr_eq(&child)),
            _ => panic!("expected maps"),
        }
    }
}
