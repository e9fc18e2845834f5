//! Static hoisting.
//!
//! After transform, fully static subtrees are extracted into the hoist
//! table so they are constructed once per program instead of once per
//! render; an otherwise dynamic node whose props are all constant gets
//! just its props object hoisted. Block roots (the program root, `v-if`
//! branches, `v-for` fragments) are never hoisted.

use super::transform::TransformContext;
use crate::program::{HoistEntry, IrChildren, IrNode, IrTag, PropsIr, TextPart, VNodeCall};

pub fn hoist_static(body: &mut IrNode, ctx: &mut TransformContext) {
    walk(body, ctx, true);
}

fn walk(node: &mut IrNode, ctx: &mut TransformContext, is_root: bool) {
    if matches!(node, IrNode::VNode(_)) {
        if !is_root && hoistable(node) {
            let index = ctx.hoist(HoistEntry::Node(node.clone()));
            *node = IrNode::Hoisted(index);
            return;
        }
        if let IrNode::VNode(call) = node {
            hoist_props_if_static(call, ctx);
            walk_children(call, ctx);
        }
        return;
    }
    match node {
        IrNode::Conditional { consequent, alternate, .. } => {
            // Branch roots stay blocks; only descend.
            walk(consequent, ctx, true);
            walk(alternate, ctx, true);
        }
        IrNode::RenderList { body, .. } => walk(body, ctx, true),
        IrNode::Cache { body, .. } => walk(body, ctx, true),
        IrNode::RenderSlot { fallback, .. } => {
            for child in fallback {
                walk(child, ctx, false);
            }
        }
        _ => {}
    }
}

fn walk_children(call: &mut VNodeCall, ctx: &mut TransformContext) {
    match &mut call.children {
        IrChildren::Nodes(children) => {
            for child in children {
                walk(child, ctx, false);
            }
        }
        IrChildren::Slots(slots) => {
            for entry in &mut slots.entries {
                for child in &mut entry.body {
                    walk(child, ctx, false);
                }
            }
        }
        IrChildren::Text(_) | IrChildren::None => {}
    }
}

fn hoist_props_if_static(call: &mut VNodeCall, ctx: &mut TransformContext) {
    let Some(PropsIr::Object(entries)) = &call.props else { return };
    if entries.is_empty() {
        return;
    }
    let all_static = entries.iter().all(|p| {
        matches!(p.key, crate::program::NameSource::Static(_)) && p.value.is_constant()
    });
    if all_static {
        let index = ctx.hoist(HoistEntry::Props(entries.clone()));
        call.props = Some(PropsIr::Hoisted(index));
    }
}

/// A subtree is fully static iff every element is a plain element with a
/// zero patch flag, no retained directives, constant props, and static
/// children all the way down.
fn hoistable(node: &IrNode) -> bool {
    match node {
        IrNode::Text { dynamic, .. } => !dynamic,
        IrNode::VNode(call) => {
            if !matches!(call.tag, IrTag::Element(_)) {
                return false;
            }
            if call.is_block || call.patch_flag != 0 || !call.directives.is_empty() {
                return false;
            }
            let props_static = match &call.props {
                None => true,
                Some(PropsIr::Object(entries)) => entries.iter().all(|p| {
                    matches!(p.key, crate::program::NameSource::Static(_))
                        && p.value.is_constant()
                        && !matches!(&p.key, crate::program::NameSource::Static(k) if k == "ref")
                }),
                Some(_) => false,
            };
            if !props_static {
                return false;
            }
            match &call.children {
                IrChildren::None => true,
                IrChildren::Text(parts) => {
                    parts.iter().all(|p| matches!(p, TextPart::Static(_)))
                }
                IrChildren::Nodes(children) => children.iter().all(hoistable),
                IrChildren::Slots(_) => false,
            }
        }
        _ => false,
    }
}
