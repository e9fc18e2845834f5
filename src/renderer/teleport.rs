//! Teleport integration.
//!
//! The main tree keeps a placeholder comment at the teleport's source
//! position; children mount into the resolved target container and move
//! when the target changes.

use std::rc::Rc;

use tracing::warn;

use super::{PatchEnv, Renderer};
use crate::host::{HostBackend, HostId};
use crate::value::Value;
use crate::vnode::{Children, VNode};

fn resolve_target<H: HostBackend + 'static>(
    renderer: &Rc<Renderer<H>>,
    vnode: &VNode,
) -> Option<HostId> {
    let to = vnode.borrow().props.as_ref().and_then(|p| p.get("to").cloned());
    match to {
        Some(Value::Str(selector)) => {
            let target = renderer.with_host(|h| h.query_selector(&selector));
            if target.is_none() {
                warn!(selector = &*selector, "teleport target not found");
            }
            target
        }
        Some(Value::Number(id)) if id >= 0.0 => Some(HostId(id as usize)),
        _ => {
            warn!("teleport has no resolvable `to` target");
            None
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
    let children = match &n2.borrow().children {
        Children::Nodes(nodes) => nodes.clone(),
        _ => Vec::new(),
    };
    match n1 {
        None => {
            // Placeholder keeps the source position addressable.
            let placeholder = renderer.with_host(|h| h.create_comment("teleport"));
            renderer.with_host(|h| h.insert(placeholder, container, anchor));
            n2.borrow_mut().el = Some(placeholder);

            let Some(target) = resolve_target(renderer, n2) else { return };
            n2.borrow_mut().target = Some(target);
            renderer.mount_children(&children, target, None, env);
        }
        Some(old) => {
            let old_target = old.borrow().target;
            {
                let mut data = n2.borrow_mut();
                data.el = old.el();
                data.target = old_target;
            }
            let target = match old_target {
                Some(target) => target,
                None => return,
            };
            renderer.patch_children(&old, n2, target, None, env);

            // Target changed: move every child over.
            let new_target = resolve_target(renderer, n2);
            if let Some(new_target) = new_target {
                if new_target != target {
                    n2.borrow_mut().target = Some(new_target);
                    let children = match &n2.borrow().children {
                        Children::Nodes(nodes) => nodes.clone(),
                        _ => Vec::new(),
                    };
                    for child in &children {
                        renderer.move_vnode(child, new_target, None);
                    }
                }
            }
        }
    }
}

pub(crate) fn unmount<H: HostBackend + 'static>(
    renderer: &Rc<Renderer<H>>,
    vnode: &VNode,
    env: &PatchEnv,
    do_remove: bool,
) {
    let children = match &vnode.borrow().children {
        Children::Nodes(nodes) => nodes.clone(),
        _ => Vec::new(),
    };
    for child in &children {
        renderer.unmount(child, env, do_remove);
    }
    if do_remove {
        if let Some(placeholder) = vnode.el() {
            renderer.with_host(|h| h.remove(placeholder));
        }
    }
}
