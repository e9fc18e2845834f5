//! Fine-grained reactivity.
//!
//! Independent of any UI concept: tracked containers ([`Signal`],
//! [`Store`], [`ListStore`]), the effect primitive, derived values
//! ([`Computed`]), watchers, and effect scopes. The renderer drives itself
//! with one effect per component instance; everything else is plumbing on
//! top of `track` / `trigger`.

mod computed;
mod dep;
mod effect;
mod scope;
mod signal;
mod store;
mod watch;

pub use computed::Computed;
pub use dep::{
    active_effect, reset_reactivity, stop_effect, untracked, DebugEvent, DepKey, EffectId,
    TargetId, TrackOp, TriggerOp,
};
pub use effect::{create_effect, effect, run_effect, EffectOptions};
pub use scope::{effect_scope, on_scope_dispose, EffectScope};
pub use signal::Signal;
pub use store::{ListStore, Store};
pub use watch::{
    watch, watch_effect, FlushMode, OnInvalidate, WatchHandle, WatchOptions, WatchSource,
};

pub(crate) use dep::{register_target, track, trigger, TargetKind};
pub(crate) use effect::effect_ord;

/// Replace an effect's scheduler post-registration.
pub(crate) fn set_effect_scheduler(
    id: EffectId,
    scheduler: impl Fn(EffectId) + 'static,
) {
    dep::set_scheduler(id, std::rc::Rc::new(scheduler));
}
