//! Dependency graph and effect runtime.
//!
//! One thread-local runtime owns every effect and every dependency bucket:
//! - effects live in a slot table with generation counters (freed slots are
//!   reused, stale ids never resolve),
//! - dependencies are `target → key → ordered set of effect ids`,
//! - the currently-executing effect sits on top of an explicit stack and is
//!   the implicit tracker for every read.
//!
//! Re-running an effect first removes it from every dependency set it
//! joined on its previous run, then re-tracks, so stale dependencies are
//! collected. Self-triggered notifications are suppressed while an effect
//! is executing.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexSet;

/// Identity of a tracked container (store, list, signal, computed cell).
pub type TargetId = u64;

/// Handle to an effect. Slot + generation so freed slots cannot be
/// resurrected by a stale id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId {
    pub(crate) slot: usize,
    pub(crate) gen: u32,
}

/// What shape of container a target is. Decides which iteration buckets a
/// mutation invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Single-cell: signals and computed cells.
    Cell,
    /// Keyed entries: `Store`.
    Map,
    /// Indexed entries: `ListStore`.
    List,
}

/// The key a read or write touched within a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// Named entry of a store.
    Prop(String),
    /// Indexed entry of a list.
    Index(usize),
    /// List length.
    Length,
    /// The single cell of a signal or computed.
    Value,
    /// Sentinel bucket for entry/value iteration.
    Iterate,
    /// Sentinel bucket for key-only iteration.
    KeyIterate,
}

/// Read operations, reported to `on_track` debug hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// Write operations. Chooses the trigger fan-out buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

/// Payload handed to `on_track` / `on_trigger` debug hooks.
#[derive(Debug, Clone)]
pub struct DebugEvent {
    pub target: TargetId,
    pub key: Option<DepKey>,
}

pub(crate) type DebugHook = Rc<dyn Fn(&DebugEvent)>;
pub(crate) type SchedulerFn = Rc<dyn Fn(EffectId)>;
pub(crate) type EffectBody = Rc<RefCell<dyn FnMut()>>;

pub(crate) struct EffectEntry {
    pub(crate) gen: u32,
    /// Monotonic creation order. The scheduler sorts by this, which is what
    /// guarantees parent render effects run before their children's.
    pub(crate) ord: u64,
    pub(crate) body: EffectBody,
    pub(crate) active: bool,
    pub(crate) computed: bool,
    pub(crate) scheduler: Option<SchedulerFn>,
    pub(crate) on_track: Option<DebugHook>,
    pub(crate) on_trigger: Option<DebugHook>,
    pub(crate) on_stop: Option<Box<dyn FnOnce()>>,
    /// Every (target, key) set this effect joined on its last run.
    pub(crate) deps: Vec<(TargetId, DepKey)>,
}

#[derive(Default)]
struct Runtime {
    slots: Vec<Option<EffectEntry>>,
    free: Vec<usize>,
    next_gen: u32,
    next_ord: u64,
    next_target: TargetId,
    deps: HashMap<TargetId, HashMap<DepKey, IndexSet<EffectId>>>,
    target_kinds: HashMap<TargetId, TargetKind>,
    stack: Vec<EffectId>,
    /// Tracking pause depth. Reads track only at depth zero.
    pause_depth: usize,
}

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::default());
}

impl Runtime {
    fn entry(&self, id: EffectId) -> Option<&EffectEntry> {
        self.slots
            .get(id.slot)
            .and_then(|s| s.as_ref())
            .filter(|e| e.gen == id.gen)
    }

    fn entry_mut(&mut self, id: EffectId) -> Option<&mut EffectEntry> {
        self.slots
            .get_mut(id.slot)
            .and_then(|s| s.as_mut())
            .filter(|e| e.gen == id.gen)
    }

    fn cleanup(&mut self, id: EffectId) {
        let deps = match self.entry_mut(id) {
            Some(e) => std::mem::take(&mut e.deps),
            None => return,
        };
        for (target, key) in deps {
            if let Some(buckets) = self.deps.get_mut(&target) {
                if let Some(set) = buckets.get_mut(&key) {
                    set.shift_remove(&id);
                }
            }
        }
    }
}

/// Allocate a target id for a new tracked container.
pub(crate) fn register_target(kind: TargetKind) -> TargetId {
    RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        let id = rt.next_target;
        rt.next_target += 1;
        rt.target_kinds.insert(id, kind);
        id
    })
}

pub(crate) struct EffectSpec {
    pub(crate) body: EffectBody,
    pub(crate) computed: bool,
    pub(crate) scheduler: Option<SchedulerFn>,
    pub(crate) on_track: Option<DebugHook>,
    pub(crate) on_trigger: Option<DebugHook>,
    pub(crate) on_stop: Option<Box<dyn FnOnce()>>,
}

/// Insert an effect into the slot table without running it.
pub(crate) fn register_effect(spec: EffectSpec) -> EffectId {
    RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        rt.next_gen += 1;
        rt.next_ord += 1;
        let entry = EffectEntry {
            gen: rt.next_gen,
            ord: rt.next_ord,
            body: spec.body,
            active: true,
            computed: spec.computed,
            scheduler: spec.scheduler,
            on_track: spec.on_track,
            on_trigger: spec.on_trigger,
            on_stop: spec.on_stop,
            deps: Vec::new(),
        };
        let gen = entry.gen;
        let slot = match rt.free.pop() {
            Some(slot) => {
                rt.slots[slot] = Some(entry);
                slot
            }
            None => {
                rt.slots.push(Some(entry));
                rt.slots.len() - 1
            }
        };
        EffectId { slot, gen }
    })
}

/// Monotonic creation order of an effect, used as the scheduler sort key.
pub(crate) fn effect_ord(id: EffectId) -> Option<u64> {
    RUNTIME.with(|rt| rt.borrow().entry(id).map(|e| e.ord))
}

/// Install (or replace) an effect's scheduler after registration. Used
/// where the scheduler needs a handle that only exists once the effect
/// does (the render effect's queue job).
pub(crate) fn set_scheduler(id: EffectId, scheduler: SchedulerFn) {
    RUNTIME.with(|rt| {
        if let Some(entry) = rt.borrow_mut().entry_mut(id) {
            entry.scheduler = Some(scheduler);
        }
    });
}

pub(crate) fn effect_is_active(id: EffectId) -> bool {
    RUNTIME.with(|rt| rt.borrow().entry(id).map(|e| e.active).unwrap_or(false))
}

/// The effect currently on top of the execution stack, if any.
pub fn active_effect() -> Option<EffectId> {
    RUNTIME.with(|rt| rt.borrow().stack.last().copied())
}

/// Execute an effect body with tracking, after clearing its previous deps.
pub(crate) fn run_effect(id: EffectId) {
    let body = RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        let (active, has_scheduler, body) = match rt.entry(id) {
            Some(e) => (e.active, e.scheduler.is_some(), e.body.clone()),
            None => return None,
        };
        if !active {
            // A stopped effect invoked directly still runs its raw body,
            // but joins no dependency sets.
            return if has_scheduler { None } else { Some((body, false)) };
        }
        if rt.stack.contains(&id) {
            // Re-entry suppression.
            return None;
        }
        rt.cleanup(id);
        rt.stack.push(id);
        Some((body, true))
    });

    let Some((body, pushed)) = body else { return };

    struct StackGuard(bool);
    impl Drop for StackGuard {
        fn drop(&mut self) {
            if self.0 {
                RUNTIME.with(|rt| {
                    rt.borrow_mut().stack.pop();
                });
            }
        }
    }
    let _guard = StackGuard(pushed);
    (body.borrow_mut())();
}

/// Deactivate an effect: remove it from every dependency set, fire
/// `on_stop`, and free its slot.
pub fn stop_effect(id: EffectId) {
    let on_stop = RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        if rt.entry(id).map(|e| e.active) != Some(true) {
            return None;
        }
        rt.cleanup(id);
        let entry = rt.entry_mut(id)?;
        entry.active = false;
        let on_stop = entry.on_stop.take();
        // Slot is reclaimed; the generation check keeps stale ids inert.
        rt.slots[id.slot] = None;
        rt.free.push(id.slot);
        on_stop
    });
    if let Some(f) = on_stop {
        f();
    }
}

/// Record `active-effect ∈ deps[target][key]` and the back-reference.
pub(crate) fn track(target: TargetId, _op: TrackOp, key: DepKey) {
    RUNTIME.with(|rt| {
        let mut rt = rt.borrow_mut();
        if rt.pause_depth > 0 {
            return;
        }
        let Some(&id) = rt.stack.last() else { return };
        let inserted = rt
            .deps
            .entry(target)
            .or_default()
            .entry(key.clone())
            .or_default()
            .insert(id);
        if inserted {
            if let Some(entry) = rt.entry_mut(id) {
                entry.deps.push((target, key.clone()));
            }
        }
        let hook = rt.entry(id).and_then(|e| e.on_track.clone());
        drop(rt);
        if let Some(hook) = hook {
            hook(&DebugEvent { target, key: Some(key) });
        }
    });
}

/// Notify every effect observing `(target, key)` plus the iteration /
/// length buckets the operation implies. Computed effects run before plain
/// effects; the currently-executing effect is skipped; scheduled effects go
/// through their scheduler instead of running inline.
pub(crate) fn trigger(
    target: TargetId,
    op: TriggerOp,
    key: Option<DepKey>,
    new_length: Option<usize>,
) {
    let (computed, plain) = RUNTIME.with(|rt| {
        let rt = rt.borrow();
        let mut seen: IndexSet<EffectId> = IndexSet::new();
        let kind = rt.target_kinds.get(&target).copied().unwrap_or(TargetKind::Cell);
        let buckets = match rt.deps.get(&target) {
            Some(b) => b,
            None => return (Vec::new(), Vec::new()),
        };

        let mut add_bucket = |k: &DepKey, seen: &mut IndexSet<EffectId>| {
            if let Some(set) = buckets.get(k) {
                for id in set {
                    seen.insert(*id);
                }
            }
        };

        match op {
            TriggerOp::Clear => {
                for set in buckets.values() {
                    for id in set {
                        seen.insert(*id);
                    }
                }
            }
            _ => {
                if let Some(shrunk_to) = new_length {
                    // Array length write: everything at or past the new
                    // length, plus length observers.
                    for (k, set) in buckets {
                        let hit = match k {
                            DepKey::Length => true,
                            DepKey::Index(i) => *i >= shrunk_to,
                            _ => false,
                        };
                        if hit {
                            for id in set {
                                seen.insert(*id);
                            }
                        }
                    }
                } else if let Some(k) = &key {
                    add_bucket(k, &mut seen);
                }

                match (op, kind) {
                    (TriggerOp::Add, TargetKind::List) => {
                        add_bucket(&DepKey::Length, &mut seen);
                        add_bucket(&DepKey::Iterate, &mut seen);
                    }
                    (TriggerOp::Add | TriggerOp::Delete, TargetKind::Map) => {
                        add_bucket(&DepKey::Iterate, &mut seen);
                        add_bucket(&DepKey::KeyIterate, &mut seen);
                    }
                    (TriggerOp::Set, TargetKind::Map) => {
                        add_bucket(&DepKey::Iterate, &mut seen);
                    }
                    (TriggerOp::Delete, TargetKind::List) => {
                        add_bucket(&DepKey::Length, &mut seen);
                        add_bucket(&DepKey::Iterate, &mut seen);
                    }
                    _ => {}
                }
            }
        }

        let current = rt.stack.last().copied();
        let mut computed = Vec::new();
        let mut plain = Vec::new();
        for id in seen {
            // Cycle suppression: an effect cannot trigger itself.
            if Some(id) == current {
                continue;
            }
            let Some(entry) = rt.entry(id) else { continue };
            if !entry.active {
                continue;
            }
            let hook = entry.on_trigger.clone();
            let item = (id, entry.scheduler.clone(), hook);
            if entry.computed {
                computed.push(item);
            } else {
                plain.push(item);
            }
        }
        (computed, plain)
    });

    let event = DebugEvent { target, key };
    for (id, scheduler, hook) in computed.into_iter().chain(plain) {
        if let Some(hook) = hook {
            hook(&event);
        }
        match scheduler {
            Some(s) => s(id),
            None => run_effect(id),
        }
    }
}

/// Run `f` with dependency tracking paused.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    RUNTIME.with(|rt| rt.borrow_mut().pause_depth += 1);
    struct PauseGuard;
    impl Drop for PauseGuard {
        fn drop(&mut self) {
            RUNTIME.with(|rt| rt.borrow_mut().pause_depth -= 1);
        }
    }
    let _guard = PauseGuard;
    f()
}

/// Drop every effect and dependency bucket (test isolation).
pub fn reset_reactivity() {
    RUNTIME.with(|rt| {
        *rt.borrow_mut() = Runtime::default();
    });
}

/// Number of live dependency edges for an effect. Test introspection.
#[cfg(test)]
pub(crate) fn dep_count(id: EffectId) -> usize {
    RUNTIME.with(|rt| rt.borrow().entry(id).map(|e| e.deps.len()).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn make_effect(f: impl FnMut() + 'static) -> EffectId {
        register_effect(EffectSpec {
            body: Rc::new(RefCell::new(f)),
            computed: false,
            scheduler: None,
            on_track: None,
            on_trigger: None,
            on_stop: None,
        })
    }

    #[test]
    fn test_track_and_trigger() {
        reset_reactivity();
        let target = register_target(TargetKind::Cell);
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        let id = make_effect(move || {
            runs2.set(runs2.get() + 1);
            track(target, TrackOp::Get, DepKey::Value);
        });
        run_effect(id);
        assert_eq!(runs.get(), 1);

        trigger(target, TriggerOp::Set, Some(DepKey::Value), None);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_cleanup_between_runs() {
        reset_reactivity();
        let a = register_target(TargetKind::Cell);
        let b = register_target(TargetKind::Cell);
        let which = Rc::new(Cell::new(true));
        let which2 = which.clone();
        let id = make_effect(move || {
            if which2.get() {
                track(a, TrackOp::Get, DepKey::Value);
            } else {
                track(b, TrackOp::Get, DepKey::Value);
            }
        });
        run_effect(id);
        assert_eq!(dep_count(id), 1);

        which.set(false);
        run_effect(id);
        // Still exactly one edge: the `a` edge was collected.
        assert_eq!(dep_count(id), 1);
    }

    #[test]
    fn test_self_trigger_suppressed() {
        reset_reactivity();
        let target = register_target(TargetKind::Cell);
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        let id = make_effect(move || {
            runs2.set(runs2.get() + 1);
            track(target, TrackOp::Get, DepKey::Value);
            // Writing a key we also read must not loop.
            trigger(target, TriggerOp::Set, Some(DepKey::Value), None);
        });
        run_effect(id);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_stop_detaches() {
        reset_reactivity();
        let target = register_target(TargetKind::Cell);
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        let id = make_effect(move || {
            runs2.set(runs2.get() + 1);
            track(target, TrackOp::Get, DepKey::Value);
        });
        run_effect(id);
        stop_effect(id);
        trigger(target, TriggerOp::Set, Some(DepKey::Value), None);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_stale_id_inert() {
        reset_reactivity();
        let id = make_effect(|| {});
        stop_effect(id);
        // Slot may be reused; the old id must not resolve.
        let id2 = make_effect(|| {});
        assert_ne!(id.gen, id2.gen);
        assert!(!effect_is_active(id));
        assert!(effect_is_active(id2));
    }

    #[test]
    fn test_untracked() {
        reset_reactivity();
        let target = register_target(TargetKind::Cell);
        let id = make_effect(move || {
            untracked(|| track(target, TrackOp::Get, DepKey::Value));
        });
        run_effect(id);
        assert_eq!(dep_count(id), 0);
    }

    #[test]
    fn test_computed_runs_before_plain() {
        reset_reactivity();
        let target = register_target(TargetKind::Cell);
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = order.clone();
        let plain = make_effect(move || {
            o1.borrow_mut().push("plain");
            track(target, TrackOp::Get, DepKey::Value);
        });
        let o2 = order.clone();
        let comp = register_effect(EffectSpec {
            body: Rc::new(RefCell::new(move || {
                o2.borrow_mut().push("computed");
                track(target, TrackOp::Get, DepKey::Value);
            })),
            computed: true,
            scheduler: None,
            on_track: None,
            on_trigger: None,
            on_stop: None,
        });
        // Plain registers first, but computed must still fire first.
        run_effect(plain);
        run_effect(comp);
        order.borrow_mut().clear();

        trigger(target, TriggerOp::Set, Some(DepKey::Value), None);
        assert_eq!(*order.borrow(), vec!["computed", "plain"]);
    }
}
