//! Component model.
//!
//! Descriptors ([`ComponentDef`]) describe components; instances are the
//! long-lived records the renderer creates at mount and destroys at
//! unmount. This module owns props normalization/resolution/update, slot
//! wiring, the render-context resolution chain, lifecycle hook tables,
//! provide/inject, and event emission. Driving the render effect is the
//! renderer's job.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::warn;

use crate::app::AppContext;
use crate::compiler::{compile, CompilerOptions};
use crate::error::RuntimeError;
use crate::host::HostId;
use crate::program::RenderProgram;
use crate::reactivity::{untracked, EffectId, EffectScope, Signal, Store};
use crate::value::{NativeFn, Value};
use crate::vnode::{Children, PatchFlags, Slots, VNode};

// =============================================================================
// Descriptors
// =============================================================================

/// Declared prop types for runtime casting and dev validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    Bool,
    Str,
    Number,
    Object,
    Array,
    Func,
}

/// Normalized per-prop options.
#[derive(Clone)]
pub struct PropOptions {
    pub name: String,
    /// Empty means any type.
    pub types: Vec<PropType>,
    pub required: bool,
    pub default: Option<Rc<dyn Fn() -> Value>>,
    pub validator: Option<Rc<dyn Fn(&Value) -> bool>>,
}

impl PropOptions {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            types: Vec::new(),
            required: false,
            default: None,
            validator: None,
        }
    }

    pub fn typed(name: &str, types: &[PropType]) -> Self {
        Self { types: types.to_vec(), ..Self::new(name) }
    }

    pub fn with_default(mut self, default: impl Fn() -> Value + 'static) -> Self {
        self.default = Some(Rc::new(default));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_validator(mut self, validator: impl Fn(&Value) -> bool + 'static) -> Self {
        self.validator = Some(Rc::new(validator));
        self
    }
}

#[derive(Clone)]
pub enum RenderFn {
    /// A compiled render program, evaluated against the instance.
    Program(Rc<RenderProgram>),
    /// A native render closure.
    Native(Rc<dyn Fn(&Instance) -> VNode>),
}

/// What a setup function yields.
pub enum SetupResult {
    /// Bindings exposed to the template (highest resolution tier).
    Bindings(Store),
    /// An explicit render function.
    Render(RenderFn),
    /// Async setup: the component suspends until the handle resolves.
    Pending(PendingSetup),
}

pub type SetupFn = Rc<dyn Fn(&Instance) -> SetupResult>;

/// Resolution handle for async setup. The component's render-effect
/// install is deferred until [`PendingSetup::resolve`] runs, signaled to
/// the nearest suspense boundary.
#[derive(Clone, Default)]
pub struct PendingSetup {
    inner: Rc<RefCell<PendingInner>>,
}

#[derive(Default)]
struct PendingInner {
    result: Option<Box<SetupResult>>,
    waiter: Option<Box<dyn FnOnce(SetupResult)>>,
}

impl PendingSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, result: SetupResult) {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            match inner.waiter.take() {
                Some(waiter) => Some((waiter, result)),
                None => {
                    inner.result = Some(Box::new(result));
                    None
                }
            }
        };
        if let Some((waiter, result)) = waiter {
            waiter(result);
        }
    }

    pub(crate) fn on_resolve(&self, f: impl FnOnce(SetupResult) + 'static) {
        let ready = self.inner.borrow_mut().result.take();
        match ready {
            Some(result) => f(*result),
            None => self.inner.borrow_mut().waiter = Some(Box::new(f)),
        }
    }
}

/// Runtime custom directive: a table of host-element hooks.
#[derive(Default)]
pub struct Directive {
    pub created: Option<DirectiveHook>,
    pub before_mount: Option<DirectiveHook>,
    pub mounted: Option<DirectiveHook>,
    pub before_update: Option<DirectiveHook>,
    pub updated: Option<DirectiveHook>,
    pub before_unmount: Option<DirectiveHook>,
    pub unmounted: Option<DirectiveHook>,
}

pub type DirectiveHook = Rc<dyn Fn(HostId, &DirectiveBinding)>;

pub struct DirectiveBinding {
    pub value: Value,
    pub old_value: Value,
    pub arg: Option<String>,
    pub modifiers: Vec<String>,
}

/// The source component descriptor.
#[derive(Default)]
pub struct ComponentDef {
    pub name: Option<String>,
    pub props: Vec<PropOptions>,
    pub emits: Vec<String>,
    pub setup: Option<SetupFn>,
    pub render: Option<RenderFn>,
    pub template: Option<String>,
    /// Locally registered components and directives.
    pub components: HashMap<String, Rc<ComponentDef>>,
    pub directives: HashMap<String, Rc<Directive>>,
    pub functional: bool,
    pub before_create: Option<Rc<dyn Fn(&Instance)>>,
    pub created: Option<Rc<dyn Fn(&Instance)>>,
    compiled: RefCell<Option<Rc<RenderProgram>>>,
}

impl ComponentDef {
    pub fn named(name: &str) -> Self {
        Self { name: Some(name.to_string()), ..Default::default() }
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }

    pub fn with_setup(mut self, setup: impl Fn(&Instance) -> SetupResult + 'static) -> Self {
        self.setup = Some(Rc::new(setup));
        self
    }

    pub fn with_props(mut self, props: Vec<PropOptions>) -> Self {
        self.props = props;
        self
    }

    pub fn with_render(mut self, render: impl Fn(&Instance) -> VNode + 'static) -> Self {
        self.render = Some(RenderFn::Native(Rc::new(render)));
        self
    }

    pub fn register_component(mut self, name: &str, def: Rc<ComponentDef>) -> Self {
        self.components.insert(name.to_string(), def);
        self
    }

    pub fn register_directive(mut self, name: &str, directive: Rc<Directive>) -> Self {
        self.directives.insert(name.to_string(), directive);
        self
    }

    pub fn build(self) -> Rc<ComponentDef> {
        Rc::new(self)
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    pub fn prop_options(&self, name: &str) -> Option<&PropOptions> {
        self.props.iter().find(|p| p.name == name || kebab(&p.name) == name)
    }

    /// The finalized render function: explicit render wins; otherwise the
    /// template is runtime-compiled once and cached on the descriptor.
    pub fn resolve_render(&self) -> Option<RenderFn> {
        if let Some(render) = &self.render {
            return Some(render.clone());
        }
        if let Some(program) = self.compiled.borrow().as_ref() {
            return Some(RenderFn::Program(program.clone()));
        }
        let template = self.template.as_deref()?;
        let result = compile(template, CompilerOptions::standard());
        for err in &result.errors {
            warn!(component = self.name.as_deref().unwrap_or("anonymous"), "{err}");
        }
        let program = Rc::new(result.program);
        *self.compiled.borrow_mut() = Some(program.clone());
        Some(RenderFn::Program(program))
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef").field("name", &self.name).finish()
    }
}

// =============================================================================
// Lifecycle hooks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
    Activated,
    Deactivated,
    RenderTracked,
    RenderTriggered,
}

// =============================================================================
// Provides (prototype chain)
// =============================================================================

pub struct Provides {
    map: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Provides>>,
}

impl Provides {
    pub fn root() -> Rc<Provides> {
        Rc::new(Provides { map: RefCell::new(HashMap::new()), parent: None })
    }

    pub fn child_of(parent: Rc<Provides>) -> Rc<Provides> {
        Rc::new(Provides { map: RefCell::new(HashMap::new()), parent: Some(parent) })
    }

    pub fn set(&self, key: &str, value: Value) {
        self.map.borrow_mut().insert(key.to_string(), value);
    }

    pub fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.map.borrow().get(key) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(key))
    }
}

// =============================================================================
// Instance
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessTier {
    Setup,
    Props,
    Builtin,
    AppGlobal,
    Missing,
}

pub struct InstanceInner {
    pub uid: usize,
    pub def: Rc<ComponentDef>,
    parent: Option<Weak<InstanceInner>>,
    app: AppContext,
    pub vnode: RefCell<Option<VNode>>,
    /// Parent-initiated pending vnode.
    pub next: RefCell<Option<VNode>>,
    /// Root of the currently rendered subtree.
    pub subtree: RefCell<Option<VNode>>,
    pub render_fn: RefCell<Option<RenderFn>>,
    pub update_effect: RefCell<Option<EffectId>>,
    pub update_job: RefCell<Option<crate::scheduler::Job>>,
    props: Store,
    raw_props: RefCell<IndexMap<String, Value>>,
    attrs: RefCell<IndexMap<String, Value>>,
    slots: RefCell<Slots>,
    setup_state: RefCell<Option<Store>>,
    pub refs: Store,
    provides: RefCell<Rc<Provides>>,
    owns_provides: Cell<bool>,
    pub scope: EffectScope,
    hooks: RefCell<HashMap<Hook, Vec<Rc<dyn Fn()>>>>,
    error_captured: RefCell<Vec<Rc<dyn Fn(&RuntimeError) -> bool>>>,
    pub is_mounted: Cell<bool>,
    pub is_unmounted: Cell<bool>,
    pub is_deactivated: Cell<bool>,
    access_cache: RefCell<HashMap<String, AccessTier>>,
    /// `v-once` cache slots, owned per instance.
    pub render_cache: RefCell<Vec<Option<VNode>>>,
    /// Materialized hoist-table entries; one vnode per slot, reused
    /// across renders so hoisted subtrees keep host-node identity.
    pub hoist_cache: RefCell<HashMap<usize, VNode>>,
    emitted_once: RefCell<HashSet<String>>,
}

#[derive(Clone)]
pub struct Instance {
    inner: Rc<InstanceInner>,
}

thread_local! {
    static UID: Cell<usize> = const { Cell::new(0) };
    static CURRENT: RefCell<Vec<Instance>> = RefCell::new(Vec::new());
}

impl Instance {
    pub fn new(def: Rc<ComponentDef>, parent: Option<&Instance>, app: AppContext) -> Self {
        let uid = UID.with(|c| {
            let id = c.get();
            c.set(id + 1);
            id
        });
        let provides = match parent {
            Some(p) => p.inner.provides.borrow().clone(),
            None => app.provides(),
        };
        let cache_len = 0;
        let instance = Self {
            inner: Rc::new(InstanceInner {
                uid,
                def,
                parent: parent.map(|p| Rc::downgrade(&p.inner)),
                app,
                vnode: RefCell::new(None),
                next: RefCell::new(None),
                subtree: RefCell::new(None),
                render_fn: RefCell::new(None),
                update_effect: RefCell::new(None),
                update_job: RefCell::new(None),
                props: Store::new().shallow_view(),
                raw_props: RefCell::new(IndexMap::new()),
                attrs: RefCell::new(IndexMap::new()),
                slots: RefCell::new(Slots::default()),
                setup_state: RefCell::new(None),
                refs: Store::new(),
                provides: RefCell::new(provides),
                owns_provides: Cell::new(false),
                scope: EffectScope::new(),
                hooks: RefCell::new(HashMap::new()),
                error_captured: RefCell::new(Vec::new()),
                is_mounted: Cell::new(false),
                is_unmounted: Cell::new(false),
                is_deactivated: Cell::new(false),
                access_cache: RefCell::new(HashMap::new()),
                render_cache: RefCell::new(Vec::with_capacity(cache_len)),
                hoist_cache: RefCell::new(HashMap::new()),
                emitted_once: RefCell::new(HashSet::new()),
            }),
        };
        if let Some(hook) = instance.inner.def.before_create.clone() {
            hook(&instance);
        }
        instance
    }

    pub fn uid(&self) -> usize {
        self.inner.uid
    }

    pub fn def(&self) -> Rc<ComponentDef> {
        self.inner.def.clone()
    }

    pub fn app(&self) -> AppContext {
        self.inner.app.clone()
    }

    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn parent(&self) -> Option<Instance> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Instance { inner })
    }

    pub fn root(&self) -> Instance {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn inner(&self) -> &InstanceInner {
        &self.inner
    }

    // -- props ---------------------------------------------------------------

    pub fn props(&self) -> Store {
        self.inner.props.clone()
    }

    pub fn attrs(&self) -> IndexMap<String, Value> {
        self.inner.attrs.borrow().clone()
    }

    pub fn slots(&self) -> Slots {
        self.inner.slots.borrow().clone()
    }

    pub fn set_slots(&self, slots: Slots) {
        *self.inner.slots.borrow_mut() = slots;
    }

    pub fn setup_state(&self) -> Option<Store> {
        self.inner.setup_state.borrow().clone()
    }

    pub fn set_setup_state(&self, state: Store) {
        *self.inner.setup_state.borrow_mut() = Some(state);
        self.inner.access_cache.borrow_mut().clear();
    }

    /// Resolve raw vnode props at mount: split into props vs attrs, apply
    /// defaults and boolean casting, validate in dev.
    pub fn init_props(&self, raw: &IndexMap<String, Value>) {
        *self.inner.raw_props.borrow_mut() = raw.clone();
        let (props, attrs) = split_props(&self.inner.def, raw);
        for (key, value) in props {
            self.inner.props.set(&key, value);
        }
        *self.inner.attrs.borrow_mut() = attrs;
        self.validate_props();
    }

    /// Props update. With a `PROPS` patch flag, only the listed dynamic
    /// names are touched; otherwise the full set is re-resolved and stale
    /// keys are removed or restored to defaults.
    pub fn update_props(
        &self,
        raw: &IndexMap<String, Value>,
        patch_flag: PatchFlags,
        dynamic_props: Option<&[String]>,
    ) {
        let prev_raw = self.inner.raw_props.borrow().clone();
        *self.inner.raw_props.borrow_mut() = raw.clone();

        let optimized = patch_flag.contains(PatchFlags::PROPS)
            && !patch_flag.contains(PatchFlags::FULL_PROPS);
        if optimized {
            if let Some(names) = dynamic_props {
                for name in names {
                    let value = raw.get(name).cloned();
                    match self.inner.def.prop_options(name.as_str()) {
                        Some(options) => {
                            let resolved = resolve_prop_value(&self.inner.def, options, value);
                            self.inner.props.set(&camelize(name), resolved);
                        }
                        None => {
                            match value {
                                Some(value) => {
                                    self.inner.attrs.borrow_mut().insert(name.clone(), value);
                                }
                                None => {
                                    self.inner.attrs.borrow_mut().shift_remove(name.as_str());
                                }
                            }
                        }
                    }
                }
                return;
            }
        }

        // Full set.
        let (props, attrs) = split_props(&self.inner.def, raw);
        for (key, value) in &props {
            self.inner.props.set(key, value.clone());
        }
        // Keys present before but missing now: restore default or delete.
        for (key, _) in prev_raw.iter() {
            let still_present = raw.contains_key(key) || raw.contains_key(&kebab(key));
            if !still_present {
                if let Some(options) = self.inner.def.prop_options(key) {
                    let resolved = resolve_prop_value(&self.inner.def, options, None);
                    self.inner.props.set(&camelize(key), resolved);
                }
            }
        }
        *self.inner.attrs.borrow_mut() = attrs;
        self.validate_props();
    }

    fn validate_props(&self) {
        for option in &self.inner.def.props {
            let value = self.inner.props.peek(&option.name);
            if option.required && value.is_null() {
                warn!(prop = %option.name, "missing required prop");
            }
            if !value.is_null() && !option.types.is_empty() {
                let ok = option.types.iter().any(|t| type_matches(*t, &value));
                if !ok {
                    warn!(prop = %option.name, "prop type check failed");
                }
            }
            if let Some(validator) = &option.validator {
                if !value.is_null() && !validator(&value) {
                    warn!(prop = %option.name, "custom prop validator failed");
                }
            }
        }
    }

    // -- render-context resolution chain --------------------------------------

    /// Resolve an identifier through: setup state, declared props,
    /// `$`-builtins, app-context globals.
    pub fn resolve_name(&self, name: &str) -> Value {
        let cached = self.inner.access_cache.borrow().get(name).copied();
        let tier = match cached {
            Some(tier) => tier,
            None => {
                let tier = self.classify_name(name);
                self.inner.access_cache.borrow_mut().insert(name.to_string(), tier);
                tier
            }
        };
        match tier {
            AccessTier::Setup => {
                match self.inner.setup_state.borrow().as_ref() {
                    Some(state) => state.get(name).unref(),
                    None => Value::Null,
                }
            }
            AccessTier::Props => self.inner.props.get(name),
            AccessTier::Builtin => self.builtin_value(name),
            AccessTier::AppGlobal => self.inner.app.global_properties().get(name),
            AccessTier::Missing => Value::Null,
        }
    }

    fn classify_name(&self, name: &str) -> AccessTier {
        if let Some(state) = self.inner.setup_state.borrow().as_ref() {
            if state.has(name) {
                return AccessTier::Setup;
            }
        }
        if self.inner.def.prop_options(name).is_some() {
            return AccessTier::Props;
        }
        if name.starts_with('$') {
            return AccessTier::Builtin;
        }
        if self.inner.app.global_properties().has(name) {
            return AccessTier::AppGlobal;
        }
        AccessTier::Missing
    }

    fn builtin_value(&self, name: &str) -> Value {
        match name {
            "$props" => {
                let snapshot = self.inner.props.peek_entries();
                Value::Map(Store::from_entries(snapshot))
            }
            "$attrs" => {
                let attrs = self.inner.attrs.borrow();
                Value::Map(Store::from_entries(
                    attrs.iter().map(|(k, v)| (k.clone(), v.clone())),
                ))
            }
            "$refs" => Value::Map(self.inner.refs.clone()),
            "$el" => match self.inner.vnode.borrow().as_ref().and_then(VNode::el) {
                Some(HostId(id)) => Value::Number(id as f64),
                None => Value::Null,
            },
            "$emit" => {
                let instance = self.clone();
                Value::Function(NativeFn::new(move |args| {
                    if let Some(Value::Str(event)) = args.first() {
                        instance.emit(event, &args[1..]);
                    }
                    Value::Null
                }))
            }
            "$nextTick" => Value::Function(NativeFn::new(move |args| {
                if let Some(Value::Function(f)) = args.first() {
                    let f = f.clone();
                    crate::scheduler::next_tick(move || {
                        f.call(&[]);
                    });
                }
                Value::Null
            })),
            "$forceUpdate" => {
                let instance = self.clone();
                Value::Function(NativeFn::new(move |_| {
                    if let Some(job) = instance.inner.update_job.borrow().clone() {
                        crate::scheduler::queue_job(job);
                    }
                    Value::Null
                }))
            }
            _ => {
                warn!(name, "unknown $-builtin");
                Value::Null
            }
        }
    }

    /// Writes route to setup state; props are read-only; `$`-prefixed
    /// names are reserved.
    pub fn write_name(&self, name: &str, value: Value) {
        if let Some(state) = self.inner.setup_state.borrow().as_ref() {
            if state.has(name) {
                state.set(name, value);
                return;
            }
        }
        if self.inner.def.prop_options(name).is_some() {
            warn!(name, "attempted to mutate a prop; props are read-only");
            return;
        }
        if name.starts_with('$') {
            warn!(name, "attempted to write a reserved property");
            return;
        }
        // Late additions land in setup state when one exists.
        match self.inner.setup_state.borrow().as_ref() {
            Some(state) => {
                state.set(name, value);
                self.inner.access_cache.borrow_mut().remove(name);
            }
            None => warn!(name, "write to unknown render-context property ignored"),
        }
    }

    // -- emit ----------------------------------------------------------------

    /// Resolve `onX` / `onUpdate:x` handlers from the raw vnode props
    /// (camelized, with `.once` deduplication) and invoke them.
    pub fn emit(&self, event: &str, args: &[Value]) {
        let handler_name = to_handler_name(event);
        let raw = self.inner.raw_props.borrow().clone();

        let handler = raw
            .get(&handler_name)
            .or_else(|| raw.get(&to_handler_name(&camelize(event))))
            .cloned();
        if let Some(handler) = handler {
            invoke_handler_value(&handler, args);
        }

        let once_name = format!("{handler_name}Once");
        if let Some(handler) = raw.get(&once_name).cloned() {
            if self.inner.emitted_once.borrow_mut().insert(once_name) {
                invoke_handler_value(&handler, args);
            }
        }
    }

    // -- lifecycle hooks ------------------------------------------------------

    pub fn add_hook(&self, hook: Hook, f: impl Fn() + 'static) {
        self.inner.hooks.borrow_mut().entry(hook).or_default().push(Rc::new(f));
    }

    pub fn invoke_hooks(&self, hook: Hook) {
        let hooks = self.inner.hooks.borrow().get(&hook).cloned().unwrap_or_default();
        for f in hooks {
            f();
        }
    }

    pub fn has_hooks(&self, hook: Hook) -> bool {
        self.inner.hooks.borrow().get(&hook).map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub fn add_error_captured(&self, f: impl Fn(&RuntimeError) -> bool + 'static) {
        self.inner.error_captured.borrow_mut().push(Rc::new(f));
    }

    pub fn error_captured_hooks(&self) -> Vec<Rc<dyn Fn(&RuntimeError) -> bool>> {
        self.inner.error_captured.borrow().clone()
    }

    pub fn app_error_handler(&self) -> Option<Rc<dyn Fn(&RuntimeError)>> {
        self.inner.app.error_handler()
    }

    // -- provide / inject -----------------------------------------------------

    pub fn provide(&self, key: &str, value: Value) {
        if !self.inner.owns_provides.get() {
            let parent = self.inner.provides.borrow().clone();
            *self.inner.provides.borrow_mut() = Provides::child_of(parent);
            self.inner.owns_provides.set(true);
        }
        self.inner.provides.borrow().set(key, value);
    }

    pub fn inject(&self, key: &str, default: Option<Value>) -> Value {
        // Lookup starts at the parent's provides so a component does not
        // shadow its own injection with its own provide of the same key.
        let source = match self.parent() {
            Some(parent) => parent.inner.provides.borrow().clone(),
            None => self.inner.app.provides(),
        };
        match source.lookup(key) {
            Some(value) => value,
            None => match default {
                Some(Value::Function(factory)) => factory.call(&[]),
                Some(value) => value,
                None => {
                    warn!(key, "injection not found");
                    Value::Null
                }
            },
        }
    }

    pub(crate) fn provides_handle(&self) -> Rc<Provides> {
        self.inner.provides.borrow().clone()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("uid", &self.inner.uid)
            .field("component", &self.inner.def.name)
            .field("mounted", &self.inner.is_mounted.get())
            .finish()
    }
}

// =============================================================================
// Current-instance stack and setup-time registration API
// =============================================================================

pub fn current_instance() -> Option<Instance> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

pub(crate) fn push_current_instance(instance: &Instance) {
    CURRENT.with(|stack| stack.borrow_mut().push(instance.clone()));
}

pub(crate) fn pop_current_instance() {
    CURRENT.with(|stack| {
        stack.borrow_mut().pop();
    });
}

fn register_hook(hook: Hook, f: impl Fn() + 'static) {
    match current_instance() {
        Some(instance) => instance.add_hook(hook, f),
        None => warn!(?hook, "lifecycle registration outside setup ignored"),
    }
}

pub fn on_before_mount(f: impl Fn() + 'static) {
    register_hook(Hook::BeforeMount, f);
}

pub fn on_mounted(f: impl Fn() + 'static) {
    register_hook(Hook::Mounted, f);
}

pub fn on_before_update(f: impl Fn() + 'static) {
    register_hook(Hook::BeforeUpdate, f);
}

pub fn on_updated(f: impl Fn() + 'static) {
    register_hook(Hook::Updated, f);
}

pub fn on_before_unmount(f: impl Fn() + 'static) {
    register_hook(Hook::BeforeUnmount, f);
}

pub fn on_unmounted(f: impl Fn() + 'static) {
    register_hook(Hook::Unmounted, f);
}

pub fn on_activated(f: impl Fn() + 'static) {
    register_hook(Hook::Activated, f);
}

pub fn on_deactivated(f: impl Fn() + 'static) {
    register_hook(Hook::Deactivated, f);
}

pub fn on_error_captured(f: impl Fn(&RuntimeError) -> bool + 'static) {
    match current_instance() {
        Some(instance) => instance.add_error_captured(f),
        None => warn!("errorCaptured registration outside setup ignored"),
    }
}

/// `provide` at setup time, against the current instance.
pub fn provide(key: &str, value: Value) {
    match current_instance() {
        Some(instance) => instance.provide(key, value),
        None => warn!(key, "provide outside setup ignored"),
    }
}

/// `inject` at setup time.
pub fn inject(key: &str, default: Option<Value>) -> Value {
    match current_instance() {
        Some(instance) => instance.inject(key, default),
        None => {
            warn!(key, "inject outside setup ignored");
            default.unwrap_or(Value::Null)
        }
    }
}

// =============================================================================
// Props helpers
// =============================================================================

fn split_props(
    def: &ComponentDef,
    raw: &IndexMap<String, Value>,
) -> (IndexMap<String, Value>, IndexMap<String, Value>) {
    let mut props: IndexMap<String, Value> = IndexMap::new();
    let mut attrs: IndexMap<String, Value> = IndexMap::new();
    for (key, value) in raw {
        if key == "key" || key == "ref" {
            continue;
        }
        match def.prop_options(key) {
            Some(options) => {
                let resolved = resolve_prop_value(def, options, Some(value.clone()));
                props.insert(options.name.clone(), resolved);
            }
            None => {
                attrs.insert(key.clone(), value.clone());
            }
        }
    }
    // Declared props absent from raw still resolve (defaults, boolean
    // casting).
    for options in &def.props {
        if !props.contains_key(&options.name) {
            let resolved = resolve_prop_value(def, options, None);
            props.insert(options.name.clone(), resolved);
        }
    }
    (props, attrs)
}

/// Default application and boolean casting, in order.
fn resolve_prop_value(
    _def: &ComponentDef,
    options: &PropOptions,
    value: Option<Value>,
) -> Value {
    let has_bool = options.types.contains(&PropType::Bool);
    match value {
        None | Some(Value::Null) => {
            if let Some(default) = &options.default {
                // Defaults evaluate without reactivity tracking.
                return untracked(|| default());
            }
            if has_bool {
                return Value::Bool(false);
            }
            Value::Null
        }
        Some(value) => {
            if has_bool {
                let bool_before_str = options
                    .types
                    .iter()
                    .position(|t| *t == PropType::Bool)
                    .zip(options.types.iter().position(|t| *t == PropType::Str))
                    .map(|(b, s)| b < s)
                    .unwrap_or(true);
                if let Value::Str(s) = &value {
                    if bool_before_str && (s.is_empty() || **s == *kebab(&options.name)) {
                        return Value::Bool(true);
                    }
                }
            }
            value
        }
    }
}

fn type_matches(t: PropType, value: &Value) -> bool {
    match t {
        PropType::Bool => matches!(value, Value::Bool(_)),
        PropType::Str => matches!(value, Value::Str(_)),
        PropType::Number => matches!(value, Value::Number(_)),
        PropType::Object => matches!(value, Value::Map(_)),
        PropType::Array => matches!(value, Value::List(_)),
        PropType::Func => matches!(value, Value::Function(_)),
    }
}

/// Whether a parent-initiated update must re-render the child: props
/// diff non-empty, slot children changed, or runtime directive set
/// changed.
pub fn should_update_component(prev: &VNode, next: &VNode) -> bool {
    let (prev_data, next_data) = (prev.borrow(), next.borrow());
    if next_data.patch_flag.contains(PatchFlags::DYNAMIC_SLOTS) {
        return true;
    }
    if prev_data.directives.len() != next_data.directives.len() {
        return true;
    }
    let has_slots = |children: &Children| !matches!(children, Children::None);
    if has_slots(&prev_data.children) || has_slots(&next_data.children) {
        return true;
    }
    match (&prev_data.props, &next_data.props) {
        (None, None) => false,
        (Some(prev_props), Some(next_props)) => {
            if next_data.patch_flag.contains(PatchFlags::PROPS) {
                if let Some(names) = &next_data.dynamic_props {
                    return names.iter().any(|name| {
                        let a = prev_props.get(name);
                        let b = next_props.get(name);
                        !matches!((a, b), (Some(a), Some(b)) if a.loose_eq(b))
                    });
                }
            }
            if prev_props.len() != next_props.len() {
                return true;
            }
            next_props.iter().any(|(key, value)| {
                !prev_props.get(key).map(|prev| prev.loose_eq(value)).unwrap_or(false)
            })
        }
        _ => true,
    }
}

fn invoke_handler_value(handler: &Value, args: &[Value]) {
    match handler {
        Value::Function(f) => {
            f.call(args);
        }
        Value::List(handlers) => {
            for h in handlers.peek_vec() {
                invoke_handler_value(&h, args);
            }
        }
        _ => {}
    }
}

fn to_handler_name(event: &str) -> String {
    let camel = camelize(event);
    let mut chars = camel.chars();
    match chars.next() {
        Some(first) => format!("on{}{}", first.to_uppercase(), chars.as_str()),
        None => "on".to_string(),
    }
}

pub(crate) fn camelize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for c in s.chars() {
        if c == '-' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

pub(crate) fn kebab(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// =============================================================================
// Asset resolution
// =============================================================================

/// Component lookup: local registry first (exact, camel, capitalized),
/// then the app registry.
pub fn resolve_component(instance: &Instance, name: &str) -> Option<Rc<ComponentDef>> {
    let def = instance.def();
    lookup_asset(&def.components, name)
        .or_else(|| instance.app().component(name))
}

pub fn resolve_directive(instance: &Instance, name: &str) -> Option<Rc<Directive>> {
    let def = instance.def();
    lookup_asset(&def.directives, name).or_else(|| instance.app().directive(name))
}

fn lookup_asset<T: Clone>(registry: &HashMap<String, T>, name: &str) -> Option<T> {
    if let Some(found) = registry.get(name) {
        return Some(found.clone());
    }
    let camel = camelize(name);
    if let Some(found) = registry.get(&camel) {
        return Some(found.clone());
    }
    let capitalized: String = {
        let mut chars = camel.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    };
    registry.get(&capitalized).cloned()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppContext;
    use crate::reactivity::reset_reactivity;

    fn test_instance(def: ComponentDef) -> Instance {
        Instance::new(def.build(), None, AppContext::new())
    }

    #[test]
    fn test_props_split_and_attrs() {
        reset_reactivity();
        let def = ComponentDef::named("X").with_props(vec![PropOptions::new("label")]);
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert("label".to_string(), Value::from("hi"));
        raw.insert("data-x".to_string(), Value::from("y"));
        instance.init_props(&raw);

        assert_eq!(instance.props().get("label"), Value::from("hi"));
        assert_eq!(instance.attrs().get("data-x"), Some(&Value::from("y")));
        assert!(instance.props().peek("data-x").is_null());
    }

    #[test]
    fn test_boolean_casting() {
        reset_reactivity();
        // E6: {flag: Boolean, name: [Boolean, String]}, passed
        // {flag: undefined, name: ""} resolves to {flag: false, name: true}.
        let def = ComponentDef::named("X").with_props(vec![
            PropOptions::typed("flag", &[PropType::Bool]),
            PropOptions::typed("name", &[PropType::Bool, PropType::Str]),
        ]);
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert("name".to_string(), Value::from(""));
        instance.init_props(&raw);

        assert_eq!(instance.props().get("flag"), Value::Bool(false));
        assert_eq!(instance.props().get("name"), Value::Bool(true));
    }

    #[test]
    fn test_string_before_bool_not_cast() {
        reset_reactivity();
        let def = ComponentDef::named("X")
            .with_props(vec![PropOptions::typed("name", &[PropType::Str, PropType::Bool])]);
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert("name".to_string(), Value::from(""));
        instance.init_props(&raw);
        assert_eq!(instance.props().get("name"), Value::from(""));
    }

    #[test]
    fn test_default_applied_when_absent() {
        reset_reactivity();
        let def = ComponentDef::named("X").with_props(vec![
            PropOptions::new("count").with_default(|| Value::from(42)),
        ]);
        let instance = test_instance(def);
        instance.init_props(&IndexMap::new());
        assert_eq!(instance.props().get("count"), Value::from(42));
    }

    #[test]
    fn test_update_props_removes_stale_and_restores_default() {
        reset_reactivity();
        let def = ComponentDef::named("X").with_props(vec![
            PropOptions::new("a").with_default(|| Value::from("dflt")),
            PropOptions::new("b"),
        ]);
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert("a".to_string(), Value::from("x"));
        raw.insert("b".to_string(), Value::from("y"));
        instance.init_props(&raw);

        let mut next = IndexMap::new();
        next.insert("b".to_string(), Value::from("z"));
        instance.update_props(&next, PatchFlags::FULL_PROPS, None);

        assert_eq!(instance.props().get("a"), Value::from("dflt"));
        assert_eq!(instance.props().get("b"), Value::from("z"));
    }

    #[test]
    fn test_optimized_props_update_touches_only_listed() {
        reset_reactivity();
        let def = ComponentDef::named("X")
            .with_props(vec![PropOptions::new("a"), PropOptions::new("b")]);
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert("a".to_string(), Value::from(1));
        raw.insert("b".to_string(), Value::from(2));
        instance.init_props(&raw);

        let mut next = IndexMap::new();
        next.insert("a".to_string(), Value::from(10));
        next.insert("b".to_string(), Value::from(99));
        let names = vec!["a".to_string()];
        instance.update_props(&next, PatchFlags::PROPS, Some(&names));

        assert_eq!(instance.props().get("a"), Value::from(10));
        assert_eq!(instance.props().get("b"), Value::from(2), "b was not in dynamicProps");
    }

    #[test]
    fn test_resolution_chain_priority() {
        reset_reactivity();
        let def = ComponentDef::named("X").with_props(vec![PropOptions::new("shadowed")]);
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert("shadowed".to_string(), Value::from("prop"));
        instance.init_props(&raw);

        // Setup state wins over props.
        let state = Store::new();
        state.set("shadowed", Value::from("setup"));
        instance.set_setup_state(state);
        assert_eq!(instance.resolve_name("shadowed"), Value::from("setup"));

        // Missing resolves null.
        assert!(instance.resolve_name("nope").is_null());
    }

    #[test]
    fn test_write_routes_to_setup_and_rejects_props() {
        reset_reactivity();
        let def = ComponentDef::named("X").with_props(vec![PropOptions::new("p")]);
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert("p".to_string(), Value::from(1));
        instance.init_props(&raw);
        let state = Store::new();
        state.set("x", Value::from(1));
        instance.set_setup_state(state.clone());

        instance.write_name("x", Value::from(2));
        assert_eq!(state.peek("x"), Value::from(2));

        instance.write_name("p", Value::from(9));
        assert_eq!(instance.props().get("p"), Value::from(1), "props are read-only");
    }

    #[test]
    fn test_emit_resolves_handlers() {
        reset_reactivity();
        use std::cell::RefCell as StdRefCell;
        let seen: Rc<StdRefCell<Vec<Value>>> = Rc::new(StdRefCell::new(Vec::new()));
        let s = seen.clone();
        let def = ComponentDef::named("X");
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert(
            "onSave".to_string(),
            Value::Function(NativeFn::handler(move |args| {
                s.borrow_mut().push(args.first().cloned().unwrap_or(Value::Null));
            })),
        );
        instance.init_props(&raw);

        instance.emit("save", &[Value::from(7)]);
        assert_eq!(*seen.borrow(), vec![Value::from(7)]);
    }

    #[test]
    fn test_emit_once_deduplicates() {
        reset_reactivity();
        use std::cell::Cell as StdCell;
        let count = Rc::new(StdCell::new(0));
        let c = count.clone();
        let def = ComponentDef::named("X");
        let instance = test_instance(def);
        let mut raw = IndexMap::new();
        raw.insert(
            "onPingOnce".to_string(),
            Value::Function(NativeFn::handler(move |_| c.set(c.get() + 1))),
        );
        instance.init_props(&raw);

        instance.emit("ping", &[]);
        instance.emit("ping", &[]);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_provide_inject_chain() {
        reset_reactivity();
        let app = AppContext::new();
        let p1 = Instance::new(ComponentDef::named("P1").build(), None, app.clone());
        p1.provide("foo", Value::from("a"));
        p1.provide("bar", Value::from("b"));
        let p2 = Instance::new(ComponentDef::named("P2").build(), Some(&p1), app.clone());
        p2.provide("foo", Value::from("a2"));
        let child = Instance::new(ComponentDef::named("C").build(), Some(&p2), app);

        // E5: nearest provider wins per key.
        assert_eq!(child.inject("foo", None), Value::from("a2"));
        assert_eq!(child.inject("bar", None), Value::from("b"));
    }

    #[test]
    fn test_inject_does_not_see_own_provides() {
        reset_reactivity();
        let app = AppContext::new();
        let solo = Instance::new(ComponentDef::named("S").build(), None, app);
        solo.provide("k", Value::from(1));
        assert_eq!(
            solo.inject("k", Some(Value::from("fallback"))),
            Value::from("fallback")
        );
    }

    #[test]
    fn test_inject_default_factory() {
        reset_reactivity();
        let app = AppContext::new();
        let solo = Instance::new(ComponentDef::named("S").build(), None, app);
        let value = solo.inject(
            "missing",
            Some(Value::Function(NativeFn::new(|_| Value::from(123)))),
        );
        assert_eq!(value, Value::from(123));
    }

    #[test]
    fn test_lifecycle_hook_registration_order() {
        reset_reactivity();
        use std::cell::RefCell as StdRefCell;
        let order: Rc<StdRefCell<Vec<i32>>> = Rc::new(StdRefCell::new(Vec::new()));
        let instance = test_instance(ComponentDef::named("X"));
        for i in 0..3 {
            let o = order.clone();
            instance.add_hook(Hook::Mounted, move || o.borrow_mut().push(i));
        }
        instance.invoke_hooks(Hook::Mounted);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_kebab_camel() {
        assert_eq!(camelize("model-value"), "modelValue");
        assert_eq!(kebab("modelValue"), "model-value");
    }

    #[test]
    fn test_template_compiles_once() {
        reset_reactivity();
        let def = ComponentDef::named("X").with_template("<p>{{ a }}</p>").build();
        let first = def.resolve_render();
        let second = def.resolve_render();
        match (first, second) {
            (Some(RenderFn::Program(a)), Some(RenderFn::Program(b))) => {
                assert!(Rc::ptr_eq(&a, &b), "template compile must be cached");
            }
            other => panic!("expected compiled programs, got {:?}", other.0.is_some()),
        }
    }
}
