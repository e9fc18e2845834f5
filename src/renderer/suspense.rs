//! Suspense integration.
//!
//! Implemented to the integration depth the reconciler requires: a
//! boundary tracks the async setups mounted beneath it, shows the
//! fallback slot while the count is nonzero, and swaps the content in
//! (firing its resolve hook exactly once) when the count drains to zero.
//! Content renders into a detached staging container until then.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{PatchEnv, Renderer};
use crate::host::{HostBackend, HostId};
use crate::value::Value;
use crate::vnode::{Children, VNode};

struct BoundaryInner {
    deps: Cell<usize>,
    resolved: Cell<bool>,
    container: Cell<HostId>,
    anchor_marker: Cell<Option<HostId>>,
    staging: Cell<HostId>,
    content: RefCell<Option<VNode>>,
    fallback: RefCell<Option<VNode>>,
    on_resolve: RefCell<Option<Value>>,
    /// Deferred swap, installed by the renderer.
    swap: RefCell<Option<Box<dyn Fn()>>>,
}

#[derive(Clone)]
pub struct SuspenseBoundary {
    inner: Rc<BoundaryInner>,
}

impl SuspenseBoundary {
    fn new(container: HostId, staging: HostId) -> Self {
        Self {
            inner: Rc::new(BoundaryInner {
                deps: Cell::new(0),
                resolved: Cell::new(false),
                container: Cell::new(container),
                anchor_marker: Cell::new(None),
                staging: Cell::new(staging),
                content: RefCell::new(None),
                fallback: RefCell::new(None),
                on_resolve: RefCell::new(None),
                swap: RefCell::new(None),
            }),
        }
    }

    /// An async setup below this boundary began.
    pub fn register_dep(&self) {
        self.inner.deps.set(self.inner.deps.get() + 1);
    }

    /// An async setup finished; the last one resolves the boundary.
    pub fn resolve_dep(&self) {
        let remaining = self.inner.deps.get().saturating_sub(1);
        self.inner.deps.set(remaining);
        if remaining == 0 {
            self.resolve();
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.get()
    }

    fn resolve(&self) {
        if self.inner.resolved.replace(true) {
            return;
        }
        if let Some(swap) = self.inner.swap.borrow().as_ref() {
            swap();
        }
        if let Some(Value::Function(hook)) = self.inner.on_resolve.borrow().clone() {
            hook.call(&[]);
        }
    }
}

pub(crate) fn process<H: HostBackend + 'static>(
    renderer: &Rc<Renderer<H>>,
    n1: Option<VNode>,
    n2: &VNode,
    container: HostId,
    anchor: Option<HostId>,
    env: &PatchEnv,
) {
    match n1 {
        None => mount(renderer, n2, container, anchor, env),
        Some(old) => patch_existing(renderer, &old, n2, env),
    }
}

fn slot_children(vnode: &VNode, name: &str) -> Vec<VNode> {
    match &vnode.borrow().children {
        Children::Slots(slots) => slots
            .get(name)
            .map(|f| f(&Value::Null))
            .unwrap_or_default(),
        Children::Nodes(nodes) if name == "default" => {
            nodes.iter().map(VNode::clone_vnode).collect()
        }
        _ => Vec::new(),
    }
}

fn mount<H: HostBackend + 'static>(
    renderer: &Rc<Renderer<H>>,
    vnode: &VNode,
    container: HostId,
    anchor: Option<HostId>,
    env: &PatchEnv,
) {
    // Position marker in the real tree.
    let marker = renderer.with_host(|h| {
        let marker = h.create_text("");
        h.insert(marker, container, anchor);
        marker
    });
    // Detached staging container for the content while pending.
    let staging = renderer.with_host(|h| h.create_element("div", false, false));

    let boundary = SuspenseBoundary::new(container, staging);
    boundary.inner.anchor_marker.set(Some(marker));
    *boundary.inner.on_resolve.borrow_mut() = vnode
        .borrow()
        .props
        .as_ref()
        .and_then(|p| p.get("onResolve"))
        .cloned();
    vnode.borrow_mut().el = Some(marker);
    vnode.borrow_mut().boundary = Some(boundary.clone());

    // Mount content into staging with this boundary active.
    let content = VNode::fragment(slot_children(vnode, "default"));
    let content_env = PatchEnv { suspense: Some(boundary.clone()), ..env.clone() };
    renderer.patch(None, &content, staging, None, &content_env);
    *boundary.inner.content.borrow_mut() = Some(content);

    if boundary.inner.deps.get() == 0 {
        // Nothing suspended: promote immediately.
        promote_content(renderer, &boundary);
        boundary.inner.resolved.set(true);
        if let Some(Value::Function(hook)) = boundary.inner.on_resolve.borrow().clone() {
            hook.call(&[]);
        }
        return;
    }

    // Fallback until the dependency count drains.
    let fallback = VNode::fragment(slot_children(vnode, "fallback"));
    renderer.patch(None, &fallback, container, Some(marker), env);
    *boundary.inner.fallback.borrow_mut() = Some(fallback);

    let swap_renderer = renderer.clone();
    let swap_boundary = boundary.clone();
    let swap_env = env.clone();
    *boundary.inner.swap.borrow_mut() = Some(Box::new(move || {
        let fallback = swap_boundary.inner.fallback.borrow_mut().take();
        if let Some(fallback) = fallback {
            swap_renderer.unmount(&fallback, &swap_env, true);
        }
        promote_content(&swap_renderer, &swap_boundary);
    }));
}

/// Move the staged content into the real container before the marker.
fn promote_content<H: HostBackend + 'static>(
    renderer: &Rc<Renderer<H>>,
    boundary: &SuspenseBoundary,
) {
    let content = boundary.inner.content.borrow().clone();
    if let Some(content) = content {
        renderer.move_vnode(
            &content,
            boundary.inner.container.get(),
            boundary.inner.anchor_marker.get(),
        );
    }
}

fn patch_existing<H: HostBackend + 'static>(
    renderer: &Rc<Renderer<H>>,
    n1: &VNode,
    n2: &VNode,
    env: &PatchEnv,
) {
    let boundary = n1.borrow().boundary.clone();
    {
        let mut data = n2.borrow_mut();
        data.el = n1.el();
        data.boundary = boundary.clone();
    }
    let Some(boundary) = boundary else { return };

    let new_content = VNode::fragment(slot_children(n2, "default"));
    let old_content = boundary.inner.content.borrow().clone();
    let container = if boundary.is_resolved() {
        boundary.inner.container.get()
    } else {
        boundary.inner.staging.get()
    };
    let content_env = PatchEnv { suspense: Some(boundary.clone()), ..env.clone() };
    renderer.patch(old_content, &new_content, container, None, &content_env);
    *boundary.inner.content.borrow_mut() = Some(new_content);

    if !boundary.is_resolved() {
        let new_fallback = VNode::fragment(slot_children(n2, "fallback"));
        let old_fallback = boundary.inner.fallback.borrow().clone();
        renderer.patch(
            old_fallback,
            &new_fallback,
            boundary.inner.container.get(),
            boundary.inner.anchor_marker.get(),
            env,
        );
        *boundary.inner.fallback.borrow_mut() = Some(new_fallback);
    }
}

pub(crate) fn unmount<H: HostBackend + 'static>(
    renderer: &Rc<Renderer<H>>,
    vnode: &VNode,
    env: &PatchEnv,
) {
    let boundary = vnode.borrow().boundary.clone();
    if let Some(boundary) = boundary {
        let content = boundary.inner.content.borrow_mut().take();
        if let Some(content) = content {
            renderer.unmount(&content, env, true);
        }
        let fallback = boundary.inner.fallback.borrow_mut().take();
        if let Some(fallback) = fallback {
            renderer.unmount(&fallback, env, true);
        }
        if let Some(marker) = boundary.inner.anchor_marker.get() {
            renderer.with_host(|h| h.remove(marker));
        }
    }
}
