//! Watchers: user-facing effects with explicit source selection, optional
//! immediate invocation, optional deep traversal, and a choice of flush
//! timing.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use super::computed::Computed;
use super::dep::{stop_effect, DebugHook, EffectId, TargetId};
use super::effect::{create_effect, effect_ord, run_effect, EffectOptions};
use super::signal::Signal;
use super::store::{ListStore, Store};
use crate::scheduler::{queue_job, queue_post_flush_cb, Job};
use crate::value::Value;

/// What a watcher observes.
#[derive(Clone)]
pub enum WatchSource {
    Signal(Signal<Value>),
    Computed(Computed<Value>),
    Store(Store),
    List(ListStore),
    Getter(Rc<dyn Fn() -> Value>),
    Many(Vec<WatchSource>),
}

impl WatchSource {
    pub fn getter(f: impl Fn() -> Value + 'static) -> Self {
        WatchSource::Getter(Rc::new(f))
    }
}

impl From<Signal<Value>> for WatchSource {
    fn from(s: Signal<Value>) -> Self {
        WatchSource::Signal(s)
    }
}

impl From<Store> for WatchSource {
    fn from(s: Store) -> Self {
        WatchSource::Store(s)
    }
}

impl From<ListStore> for WatchSource {
    fn from(l: ListStore) -> Self {
        WatchSource::List(l)
    }
}

impl From<Computed<Value>> for WatchSource {
    fn from(c: Computed<Value>) -> Self {
        WatchSource::Computed(c)
    }
}

/// When the watcher callback runs relative to render effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Before render effects of the same tick (default).
    #[default]
    Pre,
    /// After render effects drain.
    Post,
    /// Synchronously from the trigger.
    Sync,
}

/// Options for [`watch`].
#[derive(Default)]
pub struct WatchOptions {
    /// Invoke the callback immediately with old value unset.
    pub immediate: bool,
    /// Recursively read every reachable property of the source so nested
    /// mutations are collected as dependencies.
    pub deep: bool,
    pub flush: FlushMode,
    /// For pre-flush watchers owned by a component: while this reports
    /// false (not yet mounted), the callback runs synchronously so it
    /// fires before mount.
    pub owner_mounted: Option<Rc<dyn Fn() -> bool>>,
    pub on_track: Option<DebugHook>,
    pub on_trigger: Option<DebugHook>,
}

/// Registrar for invalidation cleanups. A registered cleanup runs the next
/// time the source re-fires, or when the watcher stops.
#[derive(Clone, Default)]
pub struct OnInvalidate {
    slot: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl OnInvalidate {
    pub fn register(&self, f: impl FnOnce() + 'static) {
        *self.slot.borrow_mut() = Some(Box::new(f));
    }

    fn run(&self) {
        if let Some(f) = self.slot.borrow_mut().take() {
            f();
        }
    }
}

/// Stop handle returned by [`watch`] / [`watch_effect`].
pub struct WatchHandle {
    effect: EffectId,
    invalidate: OnInvalidate,
}

impl WatchHandle {
    /// Deactivate the watcher and run any pending invalidation cleanup.
    pub fn stop(&self) {
        stop_effect(self.effect);
        self.invalidate.run();
    }

    pub(crate) fn effect_id(&self) -> EffectId {
        self.effect
    }
}

pub type WatchCallback = Rc<dyn Fn(&Value, &Value, &OnInvalidate)>;

/// Watch a source, invoking `callback(new, old, on_invalidate)` when it
/// changes.
pub fn watch(
    source: impl Into<WatchSource>,
    callback: impl Fn(&Value, &Value, &OnInvalidate) + 'static,
    options: WatchOptions,
) -> WatchHandle {
    let source = source.into();
    // A raw tracked container as source forces deep traversal.
    let deep = options.deep
        || matches!(source, WatchSource::Store(_) | WatchSource::List(_));
    let getter = normalize_getter(source, deep);
    build_watcher(getter, Some(Rc::new(callback)), deep, options)
}

/// A self-contained effect with invalidation registration and flush
/// control; re-runs whenever anything it read changes.
pub fn watch_effect(
    body: impl Fn(&OnInvalidate) + 'static,
    options: WatchOptions,
) -> WatchHandle {
    let invalidate = OnInvalidate::default();
    let inv_for_body = invalidate.clone();
    let getter: Rc<dyn Fn() -> Value> = Rc::new(move || {
        inv_for_body.run();
        body(&inv_for_body);
        Value::Null
    });
    build_self_contained(getter, invalidate, options)
}

fn normalize_getter(source: WatchSource, deep: bool) -> Rc<dyn Fn() -> Value> {
    let read: Rc<dyn Fn() -> Value> = match source {
        WatchSource::Signal(s) => Rc::new(move || s.get()),
        WatchSource::Computed(c) => Rc::new(move || c.get()),
        WatchSource::Store(s) => Rc::new(move || Value::Map(s.clone())),
        WatchSource::List(l) => Rc::new(move || Value::List(l.clone())),
        WatchSource::Getter(f) => f,
        WatchSource::Many(sources) => {
            let getters: Vec<Rc<dyn Fn() -> Value>> = sources
                .into_iter()
                .map(|s| normalize_getter(s, deep))
                .collect();
            Rc::new(move || {
                Value::List(ListStore::from_values(getters.iter().map(|g| g())))
            })
        }
    };
    if deep {
        Rc::new(move || {
            let value = read();
            traverse(&value, &mut HashSet::new());
            value
        })
    } else {
        read
    }
}

fn build_watcher(
    getter: Rc<dyn Fn() -> Value>,
    callback: Option<WatchCallback>,
    deep: bool,
    options: WatchOptions,
) -> WatchHandle {
    let invalidate = OnInvalidate::default();
    let latest: Rc<RefCell<Value>> = Rc::new(RefCell::new(Value::Null));
    let old_value: Rc<RefCell<Value>> = Rc::new(RefCell::new(Value::Null));

    let latest_for_body = latest.clone();
    let getter_for_body = getter.clone();
    let body = move || {
        *latest_for_body.borrow_mut() = getter_for_body();
    };

    // The comparison job: re-run the source, then decide whether the user
    // callback fires.
    let effect_slot: Rc<RefCell<Option<EffectId>>> = Rc::new(RefCell::new(None));
    let job: Rc<dyn Fn()> = {
        let effect_slot = effect_slot.clone();
        let latest = latest.clone();
        let old_value = old_value.clone();
        let invalidate = invalidate.clone();
        let callback = callback.clone();
        Rc::new(move || {
            let Some(id) = *effect_slot.borrow() else { return };
            run_effect(id);
            let new_value = latest.borrow().clone();
            let old = old_value.borrow().clone();
            let changed = deep || !values_equal(&new_value, &old);
            if changed {
                invalidate.run();
                if let Some(cb) = &callback {
                    cb(&new_value, &old, &invalidate);
                }
                *old_value.borrow_mut() = new_value;
            }
        })
    };

    let scheduler = make_scheduler(job.clone(), effect_slot.clone(), &options);
    let effect = create_effect(
        body,
        EffectOptions {
            lazy: true,
            computed: true,
            scheduler: Some(scheduler),
            on_track: options.on_track,
            on_trigger: options.on_trigger,
            on_stop: None,
        },
    );
    *effect_slot.borrow_mut() = Some(effect);

    if options.immediate {
        job();
    } else {
        // Prime the old value without firing the callback.
        run_effect(effect);
        *old_value.borrow_mut() = latest.borrow().clone();
    }

    WatchHandle { effect, invalidate }
}

fn build_self_contained(
    getter: Rc<dyn Fn() -> Value>,
    invalidate: OnInvalidate,
    options: WatchOptions,
) -> WatchHandle {
    let effect_slot: Rc<RefCell<Option<EffectId>>> = Rc::new(RefCell::new(None));
    let job: Rc<dyn Fn()> = {
        let effect_slot = effect_slot.clone();
        Rc::new(move || {
            if let Some(id) = *effect_slot.borrow() {
                run_effect(id);
            }
        })
    };
    let scheduler = make_scheduler(job, effect_slot.clone(), &options);
    let effect = create_effect(
        move || {
            getter();
        },
        EffectOptions {
            lazy: true,
            computed: true,
            scheduler: Some(scheduler),
            on_track: options.on_track,
            on_trigger: options.on_trigger,
            on_stop: None,
        },
    );
    *effect_slot.borrow_mut() = Some(effect);
    run_effect(effect);
    WatchHandle { effect, invalidate }
}

fn make_scheduler(
    job: Rc<dyn Fn()>,
    effect_slot: Rc<RefCell<Option<EffectId>>>,
    options: &WatchOptions,
) -> Rc<dyn Fn(EffectId)> {
    let flush = options.flush;
    let owner_mounted = options.owner_mounted.clone();
    // The queue entry is created once: idempotent enqueue works by job
    // identity, so re-wrapping on every trigger would defeat batching.
    let queue_entry: RefCell<Option<Job>> = RefCell::new(None);
    Rc::new(move |_id| match flush {
        FlushMode::Sync => job(),
        FlushMode::Pre => {
            if let Some(mounted) = &owner_mounted {
                if !mounted() {
                    // Pre-mount: fire before the mount render.
                    job();
                    return;
                }
            }
            let entry = queue_entry
                .borrow_mut()
                .get_or_insert_with(|| {
                    let id = effect_slot.borrow().and_then(effect_ord);
                    let job = job.clone();
                    Job::new(id, move || job())
                })
                .clone();
            queue_job(entry);
        }
        FlushMode::Post => {
            let entry = queue_entry
                .borrow_mut()
                .get_or_insert_with(|| {
                    let job = job.clone();
                    Job::new(None, move || job())
                })
                .clone();
            queue_post_flush_cb(entry);
        }
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // Multi-source snapshots compare elementwise.
        (Value::List(x), Value::List(y)) if !x.ptr_eq(y) => {
            let (x, y) = (x.peek_vec(), y.peek_vec());
            x.len() == y.len() && x.iter().zip(&y).all(|(a, b)| a.loose_eq(b))
        }
        _ => a.loose_eq(b),
    }
}

/// Read every reachable property once, breaking cycles on container
/// identity.
fn traverse(value: &Value, seen: &mut HashSet<TargetId>) {
    match value {
        Value::Map(store) => {
            if !seen.insert(store.target()) {
                return;
            }
            for (_, v) in store.entries() {
                traverse(&v, seen);
            }
        }
        Value::List(list) => {
            if !seen.insert(list.target()) {
                return;
            }
            for v in list.to_vec() {
                traverse(&v, seen);
            }
        }
        Value::Signal(signal) => {
            if !seen.insert(signal.target()) {
                return;
            }
            traverse(&signal.get(), seen);
        }
        Value::Computed(computed) => traverse(&computed.get(), seen),
        _ => {}
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactivity::reset_reactivity;
    use crate::scheduler::{flush_jobs, reset_scheduler};
    use std::cell::Cell;

    fn reset() {
        reset_reactivity();
        reset_scheduler();
    }

    #[test]
    fn test_watch_signal_pre_flush() {
        reset();
        let count = Signal::new(Value::from(0));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _handle = watch(
            count.clone(),
            move |new, old, _| s.borrow_mut().push((new.clone(), old.clone())),
            WatchOptions::default(),
        );
        assert!(seen.borrow().is_empty());

        count.set(Value::from(1));
        // Pre-flush: nothing until the tick drains.
        assert!(seen.borrow().is_empty());
        flush_jobs();
        assert_eq!(*seen.borrow(), vec![(Value::from(1), Value::from(0))]);
    }

    #[test]
    fn test_watch_batches_writes_in_one_tick() {
        reset();
        let count = Signal::new(Value::from(0));
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let _handle = watch(
            count.clone(),
            move |_, _, _| c.set(c.get() + 1),
            WatchOptions::default(),
        );

        count.set(Value::from(1));
        count.set(Value::from(2));
        count.set(Value::from(3));
        flush_jobs();
        assert_eq!(calls.get(), 1, "three writes, one callback per tick");
    }

    #[test]
    fn test_watch_immediate() {
        reset();
        let count = Signal::new(Value::from(7));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _handle = watch(
            count,
            move |new, old, _| s.borrow_mut().push((new.clone(), old.clone())),
            WatchOptions { immediate: true, ..Default::default() },
        );
        // Old value is unset on the immediate call.
        assert_eq!(*seen.borrow(), vec![(Value::from(7), Value::Null)]);
    }

    #[test]
    fn test_watch_sync_flush() {
        reset();
        let count = Signal::new(Value::from(0));
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let _handle = watch(
            count.clone(),
            move |_, _, _| c.set(c.get() + 1),
            WatchOptions { flush: FlushMode::Sync, ..Default::default() },
        );
        count.set(Value::from(1));
        assert_eq!(calls.get(), 1, "sync watcher fires without a flush");
    }

    #[test]
    fn test_deep_watch_nested_store() {
        reset();
        let c = Store::new();
        c.set("c", Value::from(1));
        let b = Store::new();
        b.set("b", Value::Map(c.clone()));
        let state = Store::new();
        state.set("a", Value::Map(b));

        let calls = Rc::new(Cell::new(0));
        let k = calls.clone();
        let _handle = watch(
            state,
            move |_, _, _| k.set(k.get() + 1),
            WatchOptions { deep: true, ..Default::default() },
        );

        c.set("c", Value::from(2));
        c.set("c", Value::from(3));
        flush_jobs();
        assert_eq!(calls.get(), 1, "deep watcher fires once per tick");

        c.set("c", Value::from(4));
        flush_jobs();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_watch_many_sources() {
        reset();
        let a = Signal::new(Value::from(1));
        let b = Signal::new(Value::from(2));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _handle = watch(
            WatchSource::Many(vec![a.clone().into(), b.clone().into()]),
            move |new, _, _| {
                if let Value::List(list) = new {
                    s.borrow_mut().push(list.peek_vec());
                }
            },
            WatchOptions::default(),
        );

        a.set(Value::from(10));
        flush_jobs();
        assert_eq!(*seen.borrow(), vec![vec![Value::from(10), Value::from(2)]]);

        // No change in either source: no callback.
        flush_jobs();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_on_invalidate_runs_before_refire_and_on_stop() {
        reset();
        let id = Signal::new(Value::from(1));
        let cancels = Rc::new(Cell::new(0));
        let starts = Rc::new(Cell::new(0));

        let (cancels2, starts2, id2) = (cancels.clone(), starts.clone(), id.clone());
        let handle = watch_effect(
            move |on_invalidate| {
                id2.get();
                starts2.set(starts2.get() + 1);
                let c = cancels2.clone();
                on_invalidate.register(move || c.set(c.get() + 1));
            },
            WatchOptions::default(),
        );
        assert_eq!(starts.get(), 1);
        assert_eq!(cancels.get(), 0);

        // Three writes in one tick: one cancel, one restart.
        id.set(Value::from(2));
        id.set(Value::from(3));
        id.set(Value::from(4));
        flush_jobs();
        assert_eq!(starts.get(), 2);
        assert_eq!(cancels.get(), 1);

        handle.stop();
        assert_eq!(cancels.get(), 2, "stop runs the pending cleanup");
        id.set(Value::from(5));
        flush_jobs();
        assert_eq!(starts.get(), 2);
    }

    #[test]
    fn test_stop_detaches() {
        reset();
        let count = Signal::new(Value::from(0));
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let handle = watch(
            count.clone(),
            move |_, _, _| c.set(c.get() + 1),
            WatchOptions::default(),
        );
        handle.stop();
        count.set(Value::from(1));
        flush_jobs();
        assert_eq!(calls.get(), 0);
    }
}
