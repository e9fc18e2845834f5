//! Renderer / reconciler.
//!
//! A closure of polymorphic operations over a host backend: `patch`
//! dispatches on the vnode variant, elements and components mount and
//! update through the compile-time hints (patch flags, dynamic props,
//! block children), and each stateful component drives itself with one
//! render effect whose scheduler is the job queue.

mod children;
mod suspense;
mod teleport;

pub use suspense::SuspenseBoundary;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::app::AppContext;
use crate::component::{
    pop_current_instance, push_current_instance, should_update_component, Hook, Instance,
    SetupResult,
};
use crate::error::{handle_error, ErrorSource, RuntimeError};
use crate::host::{HostBackend, HostId};
use crate::reactivity::{create_effect, run_effect, stop_effect, EffectOptions};
use crate::runtime::render_component_root;
use crate::scheduler::{invalidate_job, queue_job, queue_post_flush_cb, Job};
use crate::value::Value;
use crate::vnode::{
    Children, DirectiveKind, DirectiveUse, PatchFlags, RefBinding, VNode, VNodeType,
};

/// Traversal environment threaded through every patch call.
#[derive(Clone, Default)]
pub(crate) struct PatchEnv {
    pub parent: Option<Instance>,
    pub suspense: Option<SuspenseBoundary>,
    pub is_svg: bool,
    pub optimized: bool,
}

impl PatchEnv {
    fn for_children(&self, optimized: bool) -> PatchEnv {
        PatchEnv { optimized, ..self.clone() }
    }
}

/// Hook point for adopting server-rendered markup: receives the freshly
/// rendered subtree and the container holding existing host nodes, and
/// returns true if it claimed the mount. The traversal itself is not part
/// of this crate.
pub type HydrateFn = Rc<dyn Fn(&VNode, HostId) -> bool>;

pub struct Renderer<H: HostBackend> {
    host: RefCell<H>,
    roots: RefCell<HashMap<HostId, VNode>>,
    default_app: AppContext,
    hydrate: RefCell<Option<HydrateFn>>,
}

impl<H: HostBackend + 'static> Renderer<H> {
    pub fn new(host: H) -> Rc<Self> {
        Rc::new(Self {
            host: RefCell::new(host),
            roots: RefCell::new(HashMap::new()),
            default_app: AppContext::new(),
            hydrate: RefCell::new(None),
        })
    }

    /// Install the hydration hand-off used on first mount.
    pub fn set_hydrate_hook(&self, f: impl Fn(&VNode, HostId) -> bool + 'static) {
        *self.hydrate.borrow_mut() = Some(Rc::new(f));
    }

    /// Short-lived host access; never call back into the renderer from
    /// inside.
    pub fn with_host<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.host.borrow_mut())
    }

    /// Render (or clear, with `None`) a vnode into a container.
    pub fn render(self: &Rc<Self>, vnode: Option<VNode>, container: HostId) {
        let app = self.default_app.clone();
        self.render_with_context(vnode, container, app);
    }

    pub fn render_with_context(
        self: &Rc<Self>,
        vnode: Option<VNode>,
        container: HostId,
        app: AppContext,
    ) {
        let previous = self.roots.borrow().get(&container).cloned();
        match vnode {
            Some(vnode) => {
                let env = PatchEnv::default();
                self.app_stack_patch(previous, &vnode, container, None, &env, app);
                self.roots.borrow_mut().insert(container, vnode);
            }
            None => {
                if let Some(previous) = previous {
                    self.unmount(&previous, &PatchEnv::default(), true);
                }
                self.roots.borrow_mut().remove(&container);
            }
        }
        crate::scheduler::flush_jobs();
    }

    fn app_stack_patch(
        self: &Rc<Self>,
        n1: Option<VNode>,
        n2: &VNode,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
        app: AppContext,
    ) {
        // Root mounts carry the app context through a synthetic env.
        APP_FOR_ROOT.with(|cell| *cell.borrow_mut() = Some(app));
        self.patch(n1, n2, container, anchor, env);
        APP_FOR_ROOT.with(|cell| *cell.borrow_mut() = None);
    }

    // =========================================================================
    // patch dispatch
    // =========================================================================

    pub(crate) fn patch(
        self: &Rc<Self>,
        mut n1: Option<VNode>,
        n2: &VNode,
        container: HostId,
        mut anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        if let Some(old) = &n1 {
            if old.ptr_eq(n2) {
                return;
            }
            if !old.same_vnode_type(n2) {
                // Replace: remember where the old node sat, then unmount.
                anchor = self.next_host_node(old);
                self.unmount(old, env, true);
                n1 = None;
            }
        }

        if n2.patch_flag().contains(PatchFlags::BAIL) {
            let mut env = env.clone();
            env.optimized = false;
            return self.patch_inner(n1, n2, container, anchor, &env);
        }
        self.patch_inner(n1, n2, container, anchor, env);
    }

    fn patch_inner(
        self: &Rc<Self>,
        n1: Option<VNode>,
        n2: &VNode,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        let kind = n2.borrow().kind.clone();
        match kind {
            VNodeType::Text => self.process_text(n1, n2, container, anchor),
            VNodeType::Comment => self.process_comment(n1, n2, container, anchor),
            VNodeType::Static(content) => {
                self.process_static(n1, n2, &content, container, anchor, env)
            }
            VNodeType::Fragment => self.process_fragment(n1, n2, container, anchor, env),
            VNodeType::Element(tag) => {
                self.process_element(n1, n2, &tag, container, anchor, env)
            }
            VNodeType::Component(def) => {
                self.process_component(n1, n2, def, container, anchor, env)
            }
            VNodeType::Teleport => {
                teleport::process(self, n1, n2, container, anchor, env);
            }
            VNodeType::Suspense => {
                suspense::process(self, n1, n2, container, anchor, env);
            }
        }

        self.resolve_ref(n2, env);
    }

    // =========================================================================
    // text / comment / static
    // =========================================================================

    fn process_text(
        self: &Rc<Self>,
        n1: Option<VNode>,
        n2: &VNode,
        container: HostId,
        anchor: Option<HostId>,
    ) {
        match n1 {
            None => {
                let text = match &n2.borrow().children {
                    Children::Text(t) => t.clone(),
                    _ => String::new(),
                };
                let node = self.with_host(|h| h.create_text(&text));
                n2.borrow_mut().el = Some(node);
                self.with_host(|h| h.insert(node, container, anchor));
            }
            Some(old) => {
                let el = old.el();
                n2.borrow_mut().el = el;
                let (old_text, new_text) = {
                    let get = |n: &VNode| match &n.borrow().children {
                        Children::Text(t) => t.clone(),
                        _ => String::new(),
                    };
                    (get(&old), get(n2))
                };
                if old_text != new_text {
                    if let Some(el) = el {
                        self.with_host(|h| h.set_text(el, &new_text));
                    }
                }
            }
        }
    }

    fn process_comment(
        self: &Rc<Self>,
        n1: Option<VNode>,
        n2: &VNode,
        container: HostId,
        anchor: Option<HostId>,
    ) {
        match n1 {
            None => {
                let text = match &n2.borrow().children {
                    Children::Text(t) => t.clone(),
                    _ => String::new(),
                };
                let node = self.with_host(|h| h.create_comment(&text));
                n2.borrow_mut().el = Some(node);
                self.with_host(|h| h.insert(node, container, anchor));
            }
            Some(old) => {
                // Comments never update in place.
                n2.borrow_mut().el = old.el();
            }
        }
    }

    fn process_static(
        self: &Rc<Self>,
        n1: Option<VNode>,
        n2: &VNode,
        content: &str,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        match n1 {
            None => {
                let (first, last) =
                    self.with_host(|h| h.insert_static_content(content, container, anchor, env.is_svg));
                let mut data = n2.borrow_mut();
                data.el = Some(first);
                data.anchor = Some(last);
            }
            Some(old) => {
                // Same content guaranteed by same_vnode_type.
                let (el, end) = {
                    let data = old.borrow();
                    (data.el, data.anchor)
                };
                let mut data = n2.borrow_mut();
                data.el = el;
                data.anchor = end;
            }
        }
    }

    // =========================================================================
    // fragment
    // =========================================================================

    fn process_fragment(
        self: &Rc<Self>,
        n1: Option<VNode>,
        n2: &VNode,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        match n1 {
            None => {
                // Boundary anchors on the host.
                let start = self.with_host(|h| h.create_text(""));
                let end = self.with_host(|h| h.create_text(""));
                {
                    let mut data = n2.borrow_mut();
                    data.el = Some(start);
                    data.anchor = Some(end);
                }
                self.with_host(|h| {
                    h.insert(start, container, anchor);
                    h.insert(end, container, anchor);
                });
                let children = match &n2.borrow().children {
                    Children::Nodes(nodes) => nodes.clone(),
                    _ => Vec::new(),
                };
                self.mount_children(&children, container, Some(end), env);
            }
            Some(old) => {
                let (start, end) = {
                    let data = old.borrow();
                    (data.el, data.anchor)
                };
                {
                    let mut data = n2.borrow_mut();
                    data.el = start;
                    data.anchor = end;
                }
                let stable = n2.patch_flag().contains(PatchFlags::STABLE_FRAGMENT);
                let has_blocks =
                    n2.borrow().dynamic_children.is_some() && old.borrow().dynamic_children.is_some();
                if stable && has_blocks && env.optimized {
                    self.patch_block_children(&old, n2, container, env);
                } else {
                    self.patch_children(&old, n2, container, end, env);
                }
            }
        }
    }

    // =========================================================================
    // element mount / update
    // =========================================================================

    fn process_element(
        self: &Rc<Self>,
        n1: Option<VNode>,
        n2: &VNode,
        tag: &str,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        let is_svg = env.is_svg || tag == "svg";
        let env = PatchEnv { is_svg, ..env.clone() };
        match n1 {
            None => self.mount_element(n2, tag, container, anchor, &env),
            Some(old) => self.patch_element(&old, n2, &env),
        }
    }

    fn mount_element(
        self: &Rc<Self>,
        vnode: &VNode,
        tag: &str,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        if vnode.el().is_some() {
            // Precondition violation: a vnode mounts at most once.
            tracing::warn!(tag, "mounting an already-mounted vnode; use a fresh clone");
        }
        let el = self.with_host(|h| h.create_element(tag, env.is_svg, false));
        vnode.borrow_mut().el = Some(el);

        // Props.
        let props = vnode.borrow().props.clone();
        if let Some(props) = &props {
            for (key, value) in props {
                if key == "key" || key == "ref" {
                    continue;
                }
                self.with_host(|h| h.patch_prop(el, key, None, Some(value), env.is_svg));
            }
        }

        self.invoke_directive_hooks(vnode, el, DirectivePhase::Created);
        self.invoke_directive_hooks(vnode, el, DirectivePhase::BeforeMount);

        // Children.
        let children = vnode.borrow().children.clone();
        match children {
            Children::Text(text) => {
                self.with_host(|h| h.set_element_text(el, &text));
            }
            Children::Nodes(nodes) => {
                self.mount_children(&nodes, el, None, &env.for_children(env.optimized));
            }
            _ => {}
        }

        self.apply_show_directive(vnode, el);
        self.with_host(|h| h.insert(el, container, anchor));

        let node = vnode.clone();
        let renderer = self.clone();
        queue_post_flush_cb(Job::new(None, move || {
            if let Some(el) = node.el() {
                renderer.invoke_directive_hooks(&node, el, DirectivePhase::Mounted);
            }
        }));
    }

    fn patch_element(self: &Rc<Self>, n1: &VNode, n2: &VNode, env: &PatchEnv) {
        let el = match n1.el() {
            Some(el) => el,
            None => return,
        };
        n2.borrow_mut().el = Some(el);

        let patch_flag = n2.patch_flag();
        let old_props = n1.borrow().props.clone().unwrap_or_default();
        let new_props = n2.borrow().props.clone().unwrap_or_default();

        self.invoke_directive_hooks_update(n1, n2, el, DirectivePhase::BeforeUpdate);

        if env.optimized && patch_flag.has_fast_path() {
            // Fast path: the compiler guarantees structural alignment.
            if patch_flag.contains(PatchFlags::FULL_PROPS) {
                self.patch_props_full(el, &old_props, &new_props, env.is_svg);
            } else {
                if patch_flag.contains(PatchFlags::CLASS) {
                    self.patch_single_prop(el, "class", &old_props, &new_props, env.is_svg);
                }
                if patch_flag.contains(PatchFlags::STYLE) {
                    self.patch_single_prop(el, "style", &old_props, &new_props, env.is_svg);
                }
                if patch_flag.contains(PatchFlags::PROPS) {
                    let names = n2.borrow().dynamic_props.clone().unwrap_or_default();
                    for name in &names {
                        self.patch_single_prop(el, name, &old_props, &new_props, env.is_svg);
                    }
                }
            }
            if patch_flag.contains(PatchFlags::TEXT) {
                let (old_text, new_text) = (text_children(n1), text_children(n2));
                if old_text != new_text {
                    self.with_host(|h| h.set_element_text(el, &new_text.unwrap_or_default()));
                }
            }
        } else if !env.optimized {
            self.patch_props_full(el, &old_props, &new_props, env.is_svg);
        } else if patch_flag.is_empty() && n2.borrow().dynamic_children.is_none() {
            // No hints at all: full diff.
            self.patch_props_full(el, &old_props, &new_props, env.is_svg);
        }

        let has_blocks =
            n1.borrow().dynamic_children.is_some() && n2.borrow().dynamic_children.is_some();
        if has_blocks && env.optimized {
            self.patch_block_children(n1, n2, el, env);
        } else if !patch_flag.has_fast_path() || !env.optimized {
            self.patch_children(n1, n2, el, None, env);
        } else if patch_flag.contains(PatchFlags::TEXT) {
            // Text handled above.
        } else if matches!(n2.borrow().children, Children::Nodes(_)) && !has_blocks {
            self.patch_children(n1, n2, el, None, env);
        }

        self.apply_show_directive(n2, el);
        let (n1c, n2c) = (n1.clone(), n2.clone());
        let renderer = self.clone();
        queue_post_flush_cb(Job::new(None, move || {
            renderer.invoke_directive_hooks_update(&n1c, &n2c, el, DirectivePhase::Updated);
        }));
    }

    fn patch_single_prop(
        self: &Rc<Self>,
        el: HostId,
        key: &str,
        old_props: &IndexMap<String, Value>,
        new_props: &IndexMap<String, Value>,
        is_svg: bool,
    ) {
        let old = old_props.get(key);
        let new = new_props.get(key);
        let changed = match (old, new) {
            (Some(a), Some(b)) => !a.loose_eq(b),
            (None, None) => false,
            _ => true,
        };
        if changed {
            self.with_host(|h| h.patch_prop(el, key, old, new, is_svg));
        }
    }

    fn patch_props_full(
        self: &Rc<Self>,
        el: HostId,
        old_props: &IndexMap<String, Value>,
        new_props: &IndexMap<String, Value>,
        is_svg: bool,
    ) {
        for (key, new_value) in new_props {
            if key == "key" || key == "ref" {
                continue;
            }
            let old_value = old_props.get(key);
            if old_value.map(|o| !o.loose_eq(new_value)).unwrap_or(true) {
                self.with_host(|h| h.patch_prop(el, key, old_value, Some(new_value), is_svg));
            }
        }
        for (key, old_value) in old_props {
            if key == "key" || key == "ref" {
                continue;
            }
            if !new_props.contains_key(key) {
                self.with_host(|h| h.patch_prop(el, key, Some(old_value), None, is_svg));
            }
        }
    }

    pub(crate) fn mount_children(
        self: &Rc<Self>,
        children: &[VNode],
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        for child in children {
            self.patch(None, child, container, anchor, env);
        }
    }

    // =========================================================================
    // block fast path
    // =========================================================================

    pub(crate) fn patch_block_children(
        self: &Rc<Self>,
        n1: &VNode,
        n2: &VNode,
        fallback_container: HostId,
        env: &PatchEnv,
    ) {
        let old_children = n1.borrow().dynamic_children.clone().unwrap_or_default();
        let new_children = n2.borrow().dynamic_children.clone().unwrap_or_default();
        let count = old_children.len().min(new_children.len());
        for i in 0..count {
            let old = &old_children[i];
            let new = &new_children[i];
            // The right container: fragments and moved nodes patch
            // against their real parent, everything else can take the
            // fallback.
            let container = {
                let needs_real_parent = matches!(
                    old.borrow().kind,
                    VNodeType::Fragment | VNodeType::Component(_)
                ) || !old.same_vnode_type(new);
                if needs_real_parent {
                    old.el()
                        .and_then(|el| self.with_host(|h| h.parent_node(el)))
                        .unwrap_or(fallback_container)
                } else {
                    fallback_container
                }
            };
            self.patch(Some(old.clone()), new, container, None, &env.for_children(true));
        }
    }

    // =========================================================================
    // component mount / update
    // =========================================================================

    fn process_component(
        self: &Rc<Self>,
        n1: Option<VNode>,
        n2: &VNode,
        def: Rc<crate::component::ComponentDef>,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        match n1 {
            None => self.mount_component(n2, def, container, anchor, env),
            Some(old) => self.update_component(&old, n2),
        }
    }

    fn mount_component(
        self: &Rc<Self>,
        vnode: &VNode,
        def: Rc<crate::component::ComponentDef>,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        let app = APP_FOR_ROOT
            .with(|cell| cell.borrow().clone())
            .or_else(|| env.parent.as_ref().map(|p| p.app()))
            .unwrap_or_else(|| self.default_app.clone());

        let instance = Instance::new(def.clone(), env.parent.as_ref(), app);
        vnode.borrow_mut().instance = Some(instance.clone());
        *instance.inner().vnode.borrow_mut() = Some(vnode.clone());

        // Props and slots from the vnode.
        let raw_props = vnode.borrow().props.clone().unwrap_or_default();
        instance.init_props(&raw_props);
        match &vnode.borrow().children {
            Children::Slots(slots) => instance.set_slots(slots.clone()),
            Children::Nodes(nodes) => {
                instance.set_slots(crate::vnode::Slots::single_default(nodes.clone()))
            }
            _ => {}
        }

        // Setup.
        let setup_result = def.setup.clone().map(|setup| {
            push_current_instance(&instance);
            let result = instance.inner().scope.run(|| setup(&instance));
            pop_current_instance();
            result
        });

        match setup_result {
            Some(SetupResult::Pending(pending)) => {
                // Async setup: placeholder now, real mount on resolve.
                let placeholder = VNode::comment("async setup");
                self.patch(None, &placeholder, container, anchor, env);
                *instance.inner().subtree.borrow_mut() = Some(placeholder.clone());
                vnode.borrow_mut().el = placeholder.el();

                if let Some(boundary) = &env.suspense {
                    boundary.register_dep();
                }
                let renderer = self.clone();
                let inst = instance.clone();
                let env = env.clone();
                pending.on_resolve(move |result| {
                    renderer.finish_setup(&inst, result);
                    renderer.install_render_fn(&inst);
                    renderer.setup_render_effect(&inst, container, anchor, &env);
                    if let Some(boundary) = &env.suspense {
                        boundary.resolve_dep();
                    }
                });
                return;
            }
            Some(result) => self.finish_setup(&instance, result),
            None => {}
        }

        if let Some(hook) = def.created.clone() {
            hook(&instance);
        }
        self.install_render_fn(&instance);
        self.setup_render_effect(&instance, container, anchor, env);
    }

    fn finish_setup(self: &Rc<Self>, instance: &Instance, result: SetupResult) {
        match result {
            SetupResult::Bindings(state) => instance.set_setup_state(state),
            SetupResult::Render(render) => {
                *instance.inner().render_fn.borrow_mut() = Some(render);
            }
            SetupResult::Pending(_) => {
                handle_error(
                    Some(instance),
                    RuntimeError::new(ErrorSource::Setup, "nested async setup is not supported"),
                );
            }
        }
    }

    fn install_render_fn(self: &Rc<Self>, instance: &Instance) {
        if instance.inner().render_fn.borrow().is_some() {
            return;
        }
        match instance.def().resolve_render() {
            Some(render) => *instance.inner().render_fn.borrow_mut() = Some(render),
            None => handle_error(
                Some(instance),
                RuntimeError::new(
                    ErrorSource::Render,
                    "component has no render function and no template",
                ),
            ),
        }
    }

    /// One render effect per stateful component. Its scheduler is the
    /// job queue, so re-renders coalesce per tick.
    fn setup_render_effect(
        self: &Rc<Self>,
        instance: &Instance,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        let renderer = self.clone();
        let inst = instance.clone();
        let child_env = PatchEnv {
            parent: Some(instance.clone()),
            suspense: env.suspense.clone(),
            is_svg: env.is_svg,
            optimized: true,
        };

        let mut options = EffectOptions::lazy();
        if instance.has_hooks(Hook::RenderTracked) {
            let inst = instance.clone();
            options.on_track = Some(Rc::new(move |_event| inst.invoke_hooks(Hook::RenderTracked)));
        }
        if instance.has_hooks(Hook::RenderTriggered) {
            let inst = instance.clone();
            options.on_trigger =
                Some(Rc::new(move |_event| inst.invoke_hooks(Hook::RenderTriggered)));
        }

        let effect = instance.inner().scope.run(|| {
            create_effect(
                move || {
                    if inst.inner().is_unmounted.get() {
                        return;
                    }
                    if !inst.inner().is_mounted.get() {
                        renderer.component_mount_pass(&inst, container, anchor, &child_env);
                    } else {
                        renderer.component_update_pass(&inst, &child_env);
                    }
                },
                options,
            )
        });

        let job = Job::new(crate::reactivity::effect_ord(effect), move || run_effect(effect));
        *instance.inner().update_effect.borrow_mut() = Some(effect);
        *instance.inner().update_job.borrow_mut() = Some(job.clone());

        // Scheduler wiring happens after the job exists: re-register the
        // effect with a scheduler that queues the job.
        let job_for_scheduler = job;
        if let Some(effect_id) = *instance.inner().update_effect.borrow() {
            crate::reactivity::set_effect_scheduler(effect_id, move |_| {
                queue_job(job_for_scheduler.clone());
            });
        }

        run_effect(effect);
    }

    fn component_mount_pass(
        self: &Rc<Self>,
        instance: &Instance,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        instance.invoke_hooks(Hook::BeforeMount);

        // Replace the async placeholder if one was mounted.
        let placeholder = instance.inner().subtree.borrow().clone();
        let subtree = render_component_root(instance);
        let hydrator = if instance.parent().is_none() {
            self.hydrate.borrow().clone()
        } else {
            None
        };
        match placeholder {
            Some(placeholder) => {
                let real_anchor = self.next_host_node(&placeholder);
                let parent = placeholder
                    .el()
                    .and_then(|el| self.with_host(|h| h.parent_node(el)))
                    .unwrap_or(container);
                self.unmount(&placeholder, env, true);
                self.patch(None, &subtree, parent, real_anchor, env);
            }
            None => {
                // Server-rendered markup hands off to the hydrator.
                let hydrated = hydrator.map(|h| h(&subtree, container)).unwrap_or(false);
                if !hydrated {
                    self.patch(None, &subtree, container, anchor, env);
                }
            }
        }

        if let Some(vnode) = instance.inner().vnode.borrow().as_ref() {
            vnode.borrow_mut().el = subtree.el();
        }
        *instance.inner().subtree.borrow_mut() = Some(subtree);
        instance.inner().is_mounted.set(true);

        let inst = instance.clone();
        queue_post_flush_cb(Job::new(None, move || {
            inst.invoke_hooks(Hook::Mounted);
            if let Some(vnode) = inst.inner().vnode.borrow().as_ref() {
                if let Some(Value::Function(hook)) =
                    vnode.borrow().props.as_ref().and_then(|p| p.get("onVnodeMounted")).cloned()
                {
                    hook.call(&[]);
                }
            }
        }));
    }

    fn component_update_pass(self: &Rc<Self>, instance: &Instance, env: &PatchEnv) {
        // Parent-initiated: adopt the pending vnode, refresh props/slots.
        let next = instance.inner().next.borrow_mut().take();
        if let Some(next_vnode) = &next {
            next_vnode.borrow_mut().instance = Some(instance.clone());
            let raw_props = next_vnode.borrow().props.clone().unwrap_or_default();
            let (patch_flag, dynamic_props) = {
                let data = next_vnode.borrow();
                (data.patch_flag, data.dynamic_props.clone())
            };
            instance.update_props(&raw_props, patch_flag, dynamic_props.as_deref());
            match &next_vnode.borrow().children {
                Children::Slots(slots) => instance.set_slots(slots.clone()),
                Children::Nodes(nodes) => {
                    instance.set_slots(crate::vnode::Slots::single_default(nodes.clone()))
                }
                _ => {}
            }
            *instance.inner().vnode.borrow_mut() = Some(next_vnode.clone());
        }

        instance.invoke_hooks(Hook::BeforeUpdate);

        let prev_tree = instance.inner().subtree.borrow().clone();
        let next_tree = render_component_root(instance);
        match prev_tree {
            Some(prev) => {
                let parent = prev
                    .el()
                    .and_then(|el| self.with_host(|h| h.parent_node(el)))
                    .unwrap_or(HostId(0));
                let anchor = self.next_host_node(&prev);
                self.patch(Some(prev), &next_tree, parent, anchor, env);
            }
            None => {}
        }

        if let Some(vnode) = instance.inner().vnode.borrow().as_ref() {
            vnode.borrow_mut().el = next_tree.el();
        }
        // Propagate the host element up through wrapper components whose
        // subtree root is this component's vnode.
        let mut current = instance.clone();
        while let Some(parent) = current.parent() {
            let wraps = parent
                .inner()
                .subtree
                .borrow()
                .as_ref()
                .zip(current.inner().vnode.borrow().as_ref())
                .map(|(subtree, vnode)| subtree.ptr_eq(vnode))
                .unwrap_or(false);
            if !wraps {
                break;
            }
            if let Some(parent_vnode) = parent.inner().vnode.borrow().as_ref() {
                parent_vnode.borrow_mut().el = next_tree.el();
            }
            current = parent;
        }
        *instance.inner().subtree.borrow_mut() = Some(next_tree);

        let inst = instance.clone();
        queue_post_flush_cb(Job::new(None, move || {
            inst.invoke_hooks(Hook::Updated);
        }));
    }

    fn update_component(self: &Rc<Self>, n1: &VNode, n2: &VNode) {
        let instance = match n1.borrow().instance.clone() {
            Some(instance) => instance,
            None => return,
        };
        n2.borrow_mut().instance = Some(instance.clone());

        if should_update_component(n1, n2) {
            *instance.inner().next.borrow_mut() = Some(n2.clone());
            // Avoid double-render: a self-queued update is superseded.
            if let Some(job) = instance.inner().update_job.borrow().clone() {
                invalidate_job(&job);
            }
            if let Some(effect) = *instance.inner().update_effect.borrow() {
                run_effect(effect);
            }
        } else {
            // Cheap bail: carry over mounted state.
            n2.borrow_mut().el = n1.el();
            *instance.inner().vnode.borrow_mut() = Some(n2.clone());
        }
    }

    // =========================================================================
    // unmount
    // =========================================================================

    pub(crate) fn unmount(self: &Rc<Self>, vnode: &VNode, env: &PatchEnv, do_remove: bool) {
        let kind = vnode.borrow().kind.clone();
        self.unset_ref(vnode);
        match kind {
            VNodeType::Component(_) => {
                let instance = vnode.borrow().instance.clone();
                if let Some(instance) = instance {
                    instance.invoke_hooks(Hook::BeforeUnmount);
                    if let Some(effect) = instance.inner().update_effect.borrow_mut().take() {
                        stop_effect(effect);
                    }
                    if let Some(job) = instance.inner().update_job.borrow_mut().take() {
                        invalidate_job(&job);
                    }
                    instance.inner().scope.stop();
                    let subtree = instance.inner().subtree.borrow_mut().take();
                    if let Some(subtree) = subtree {
                        self.unmount(&subtree, env, do_remove);
                    }
                    instance.inner().is_unmounted.set(true);
                    let inst = instance.clone();
                    queue_post_flush_cb(Job::new(None, move || {
                        inst.invoke_hooks(Hook::Unmounted);
                    }));
                }
            }
            VNodeType::Fragment => {
                let children = match &vnode.borrow().children {
                    Children::Nodes(nodes) => nodes.clone(),
                    _ => Vec::new(),
                };
                for child in &children {
                    self.unmount(child, env, do_remove);
                }
                if do_remove {
                    let (start, end) = {
                        let data = vnode.borrow();
                        (data.el, data.anchor)
                    };
                    self.with_host(|h| {
                        if let Some(start) = start {
                            h.remove(start);
                        }
                        if let Some(end) = end {
                            h.remove(end);
                        }
                    });
                }
            }
            VNodeType::Teleport => {
                teleport::unmount(self, vnode, env, do_remove);
            }
            VNodeType::Suspense => {
                suspense::unmount(self, vnode, env);
            }
            _ => {
                if let Some(el) = vnode.el() {
                    self.invoke_directive_hooks(vnode, el, DirectivePhase::BeforeUnmount);
                }
                let children = match &vnode.borrow().children {
                    Children::Nodes(nodes) => nodes.clone(),
                    _ => Vec::new(),
                };
                // Children hold components/directives that need teardown;
                // host detach happens once at this node.
                for child in &children {
                    self.unmount(child, env, false);
                }
                if do_remove {
                    if let Some(el) = vnode.el() {
                        self.with_host(|h| h.remove(el));
                    }
                }
                if let Some(el) = vnode.el() {
                    let node = vnode.clone();
                    let renderer = self.clone();
                    queue_post_flush_cb(Job::new(None, move || {
                        renderer.invoke_directive_hooks(&node, el, DirectivePhase::Unmounted);
                    }));
                }
            }
        }
    }

    pub(crate) fn unmount_children(self: &Rc<Self>, children: &[VNode], env: &PatchEnv) {
        for child in children {
            self.unmount(child, env, true);
        }
    }

    // =========================================================================
    // move / navigation
    // =========================================================================

    pub(crate) fn move_vnode(
        self: &Rc<Self>,
        vnode: &VNode,
        container: HostId,
        anchor: Option<HostId>,
    ) {
        let kind = vnode.borrow().kind.clone();
        match kind {
            VNodeType::Component(_) => {
                let subtree = vnode
                    .borrow()
                    .instance
                    .as_ref()
                    .and_then(|i| i.inner().subtree.borrow().clone());
                if let Some(subtree) = subtree {
                    self.move_vnode(&subtree, container, anchor);
                }
            }
            VNodeType::Fragment => {
                let (start, end, children) = {
                    let data = vnode.borrow();
                    let children = match &data.children {
                        Children::Nodes(nodes) => nodes.clone(),
                        _ => Vec::new(),
                    };
                    (data.el, data.anchor, children)
                };
                if let Some(start) = start {
                    self.with_host(|h| h.insert(start, container, anchor));
                }
                for child in &children {
                    self.move_vnode(child, container, anchor);
                }
                if let Some(end) = end {
                    self.with_host(|h| h.insert(end, container, anchor));
                }
            }
            _ => {
                if let Some(el) = vnode.el() {
                    self.with_host(|h| h.insert(el, container, anchor));
                }
            }
        }
    }

    pub(crate) fn next_host_node(self: &Rc<Self>, vnode: &VNode) -> Option<HostId> {
        let data = vnode.borrow();
        if matches!(data.kind, VNodeType::Component(_)) {
            let subtree = data.instance.as_ref().and_then(|i| i.inner().subtree.borrow().clone());
            drop(data);
            return subtree.and_then(|s| self.next_host_node(&s));
        }
        let node = data.anchor.or(data.el)?;
        drop(data);
        self.with_host(|h| h.next_sibling(node))
    }

    // =========================================================================
    // refs
    // =========================================================================

    fn resolve_ref(self: &Rc<Self>, vnode: &VNode, env: &PatchEnv) {
        let binding = vnode.borrow().ref_binding.clone();
        let Some(binding) = binding else { return };
        let el_value = match vnode.el() {
            Some(HostId(id)) => Value::Number(id as f64),
            None => Value::Null,
        };
        match binding {
            RefBinding::Named(name) => {
                if let Some(parent) = &env.parent {
                    parent.inner().refs.set(&name, el_value);
                }
            }
            RefBinding::Cell(signal) => signal.set(el_value),
            RefBinding::Func(f) => {
                f.call(&[el_value]);
            }
        }
    }

    fn unset_ref(self: &Rc<Self>, vnode: &VNode) {
        let binding = vnode.borrow().ref_binding.clone();
        match binding {
            Some(RefBinding::Cell(signal)) => signal.set(Value::Null),
            Some(RefBinding::Func(f)) => {
                f.call(&[Value::Null]);
            }
            _ => {}
        }
    }

    // =========================================================================
    // runtime directives
    // =========================================================================

    fn invoke_directive_hooks(self: &Rc<Self>, vnode: &VNode, el: HostId, phase: DirectivePhase) {
        let directives = vnode.borrow().directives.clone();
        for dir in &directives {
            if let DirectiveKind::Custom(custom) = &dir.kind {
                let hook = match phase {
                    DirectivePhase::Created => custom.created.clone(),
                    DirectivePhase::BeforeMount => custom.before_mount.clone(),
                    DirectivePhase::Mounted => custom.mounted.clone(),
                    DirectivePhase::BeforeUpdate => custom.before_update.clone(),
                    DirectivePhase::Updated => custom.updated.clone(),
                    DirectivePhase::BeforeUnmount => custom.before_unmount.clone(),
                    DirectivePhase::Unmounted => custom.unmounted.clone(),
                };
                if let Some(hook) = hook {
                    hook(el, &binding_of(dir));
                }
            }
        }
    }

    fn invoke_directive_hooks_update(
        self: &Rc<Self>,
        n1: &VNode,
        n2: &VNode,
        el: HostId,
        phase: DirectivePhase,
    ) {
        // Carry old values across for update hooks.
        let old_values: Vec<Value> =
            n1.borrow().directives.iter().map(|d| d.value.clone()).collect();
        for (i, dir) in n2.borrow().directives.iter().enumerate() {
            if let Some(old) = old_values.get(i) {
                *dir.old_value.borrow_mut() = old.clone();
            }
        }
        self.invoke_directive_hooks(n2, el, phase);
    }

    /// Built-in `v-show`: toggle display through the style prop, keeping
    /// the element in the tree.
    fn apply_show_directive(self: &Rc<Self>, vnode: &VNode, el: HostId) {
        let show = vnode
            .borrow()
            .directives
            .iter()
            .find(|d| matches!(d.kind, DirectiveKind::Show))
            .map(|d| d.value.clone());
        let Some(value) = show else { return };
        let base_style = vnode
            .borrow()
            .props
            .as_ref()
            .and_then(|p| p.get("style").cloned())
            .map(|v| v.to_display_string())
            .unwrap_or_default();
        let style = if value.is_truthy() {
            if base_style.is_empty() {
                None
            } else {
                Some(Value::string(base_style))
            }
        } else if base_style.is_empty() {
            Some(Value::string("display:none"))
        } else {
            Some(Value::string(format!("{base_style};display:none")))
        };
        self.with_host(|h| h.patch_prop(el, "style", None, style.as_ref(), false));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectivePhase {
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
}

fn binding_of(dir: &DirectiveUse) -> crate::component::DirectiveBinding {
    crate::component::DirectiveBinding {
        value: dir.value.clone(),
        old_value: dir.old_value.borrow().clone(),
        arg: dir.arg.clone(),
        modifiers: dir.modifiers.clone(),
    }
}

fn text_children(vnode: &VNode) -> Option<String> {
    match &vnode.borrow().children {
        Children::Text(t) => Some(t.clone()),
        _ => None,
    }
}

thread_local! {
    /// App context for the root mount currently in progress.
    static APP_FOR_ROOT: RefCell<Option<AppContext>> = RefCell::new(None);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_host::TestHost;
    use crate::reactivity::reset_reactivity;
    use crate::scheduler::reset_scheduler;
    use crate::vnode::Children;
    use indexmap::IndexMap;

    fn reset() {
        reset_reactivity();
        reset_scheduler();
    }

    fn setup_renderer() -> (Rc<Renderer<TestHost>>, HostId) {
        let renderer = Renderer::new(TestHost::new());
        let container = renderer.with_host(|h| h.create_element("div", false, false));
        (renderer, container)
    }

    fn props(entries: &[(&str, Value)]) -> Option<IndexMap<String, Value>> {
        let mut map = IndexMap::new();
        for (key, value) in entries {
            map.insert(key.to_string(), value.clone());
        }
        Some(map)
    }

    #[test]
    fn test_mount_element_with_props_and_text() {
        reset();
        let (renderer, container) = setup_renderer();
        let node = VNode::element(
            "p",
            props(&[("class", Value::from("note"))]),
            Children::Text("hi".into()),
        );
        renderer.render(Some(node), container);
        assert_eq!(
            renderer.with_host(|h| h.to_markup(container)),
            "<div><p class=\"note\">hi</p></div>"
        );
    }

    #[test]
    fn test_patch_text_in_place() {
        reset();
        let (renderer, container) = setup_renderer();
        renderer.render(Some(VNode::text("a")), container);
        let before = renderer.with_host(|h| h.ops);

        renderer.render(Some(VNode::text("b")), container);
        let after = renderer.with_host(|h| h.ops);
        assert_eq!(renderer.with_host(|h| h.text_content(container)), "b");
        assert_eq!(after.creates, before.creates, "text patches in place");
    }

    #[test]
    fn test_replace_on_type_mismatch() {
        reset();
        let (renderer, container) = setup_renderer();
        renderer.render(Some(VNode::element("p", None, Children::Text("x".into()))), container);
        renderer.render(Some(VNode::element("span", None, Children::Text("y".into()))), container);
        let children = renderer.with_host(|h| h.children_of(container).to_vec());
        assert_eq!(children.len(), 1);
        assert_eq!(renderer.with_host(|h| h.tag(children[0]).map(String::from)), Some("span".into()));
    }

    #[test]
    fn test_props_diff_removes_stale_keys() {
        reset();
        let (renderer, container) = setup_renderer();
        renderer.render(
            Some(VNode::element("p", props(&[("id", Value::from("a"))]), Children::None)),
            container,
        );
        renderer.render(
            Some(VNode::element("p", props(&[("title", Value::from("t"))]), Children::None)),
            container,
        );
        let p = renderer.with_host(|h| h.children_of(container)[0]);
        assert!(renderer.with_host(|h| h.prop(p, "id").is_none()), "stale prop removed");
        assert_eq!(renderer.with_host(|h| h.prop(p, "title").cloned()), Some(Value::from("t")));
    }

    #[test]
    fn test_children_text_to_nodes_and_back() {
        reset();
        let (renderer, container) = setup_renderer();
        renderer.render(Some(VNode::element("p", None, Children::Text("t".into()))), container);
        renderer.render(
            Some(VNode::element(
                "p",
                None,
                Children::Nodes(vec![VNode::text("a"), VNode::text("b")]),
            )),
            container,
        );
        assert_eq!(renderer.with_host(|h| h.text_content(container)), "ab");

        renderer.render(Some(VNode::element("p", None, Children::Text("t2".into()))), container);
        assert_eq!(renderer.with_host(|h| h.text_content(container)), "t2");
    }

    #[test]
    fn test_fragment_anchors_survive_unmount_of_children() {
        reset();
        let (renderer, container) = setup_renderer();
        let fragment = VNode::fragment(vec![VNode::text("a"), VNode::text("b")]);
        renderer.render(Some(fragment), container);
        assert_eq!(renderer.with_host(|h| h.text_content(container)), "ab");

        renderer.render(Some(VNode::fragment(vec![])), container);
        assert_eq!(renderer.with_host(|h| h.text_content(container)), "");
        // Boundary markers remain.
        assert_eq!(renderer.with_host(|h| h.children_of(container).len()), 2);
    }

    #[test]
    fn test_render_none_unmounts_everything() {
        reset();
        let (renderer, container) = setup_renderer();
        renderer.render(
            Some(VNode::fragment(vec![
                VNode::element("p", None, Children::Text("x".into())),
                VNode::text("y"),
            ])),
            container,
        );
        renderer.render(None, container);
        assert!(renderer.with_host(|h| h.children_of(container).is_empty()));
    }

    #[test]
    fn test_unkeyed_children_patch_by_index() {
        reset();
        let (renderer, container) = setup_renderer();
        let list = |texts: &[&str]| {
            VNode::fragment(texts.iter().map(|t| VNode::element("li", None, Children::Text(t.to_string().into()))).collect())
        };
        renderer.render(Some(list(&["a", "b"])), container);
        let before = renderer.with_host(|h| h.ops);

        renderer.render(Some(list(&["a", "b", "c"])), container);
        let after = renderer.with_host(|h| h.ops);
        assert_eq!(renderer.with_host(|h| h.text_content(container)), "abc");
        // One new element plus its text node.
        assert_eq!(after.creates - before.creates, 2);
    }
}
