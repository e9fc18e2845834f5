//! # cinder
//!
//! Reactive UI framework core for Rust.
//!
//! Three tightly coupled subsystems:
//!
//! - a **template compiler** that turns an HTML+directive dialect into a
//!   portable render program annotated with patch flags and block
//!   structure,
//! - a **fine-grained reactivity layer** (signals, stores, computed
//!   values, watchers) so only the minimal set of view computations
//!   re-runs on state change, and
//! - a **keyed-diff renderer** that reconciles virtual trees against an
//!   injected host backend, exploiting the compile-time hints.
//!
//! ## Architecture
//!
//! ```text
//! state write → trigger → scheduler → render effect → render program
//!             → virtual tree → reconciler → host backend ops
//! ```
//!
//! The host backend is injected ([`HostBackend`]); an in-memory
//! [`host::test_host::TestHost`] backs the test suites.
//!
//! ## Modules
//!
//! - [`value`] - Dynamic value model shared by state, props, and templates
//! - [`reactivity`] - Signals, stores, effects, computed values, watchers
//! - [`scheduler`] - Job queue with pre/post flush phases and `next_tick`
//! - [`compiler`] - Parse → transform → generate pipeline
//! - [`program`] - The portable render-program IR
//! - [`vnode`] - Virtual node model with shape and patch flags
//! - [`component`] - Descriptors, instances, props, slots, lifecycle
//! - [`runtime`] - Render-program evaluator
//! - [`renderer`] - Patch dispatch, keyed diff, render effects
//! - [`app`] - App context and mount surface

pub mod app;
pub mod compiler;
pub mod component;
pub mod error;
pub mod host;
pub mod program;
pub mod reactivity;
pub mod renderer;
pub mod runtime;
pub mod scheduler;
pub mod value;
pub mod vnode;

// Re-export commonly used items
pub use value::{NativeFn, Value};

pub use reactivity::{
    active_effect, create_effect, effect, effect_scope, on_scope_dispose, reset_reactivity,
    stop_effect, untracked, watch, watch_effect, Computed, EffectId, EffectOptions, EffectScope,
    FlushMode, ListStore, OnInvalidate, Signal, Store, WatchHandle, WatchOptions, WatchSource,
};

pub use scheduler::{
    flush_jobs, invalidate_job, is_flush_pending, next_tick, queue_job, queue_post_flush_cb,
    reset_scheduler, Job,
};

pub use compiler::{
    compile, parse, CompileError, CompileResult, CompilerOptions, ErrorCode, ParserOptions,
};

pub use program::RenderProgram;

pub use vnode::{Children, PatchFlags, RefBinding, ShapeFlags, SlotFn, Slots, VNode, VNodeType};

pub use component::{
    current_instance, inject, on_before_mount, on_before_unmount, on_before_update,
    on_error_captured, on_mounted, on_unmounted, on_updated, provide, ComponentDef, Directive,
    Hook, Instance, PendingSetup, PropOptions, PropType, RenderFn, SetupResult,
};

pub use error::{handle_error, ErrorSource, RuntimeError};

pub use host::{test_host::TestHost, HostBackend, HostId};

pub use renderer::{HydrateFn, Renderer, SuspenseBoundary};

pub use app::{create_app, App, AppContext};
