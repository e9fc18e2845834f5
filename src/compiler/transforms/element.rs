//! Element codegen construction.
//!
//! The central transform: on exit (children fully transformed) each
//! element produces its vnode call — tag resolution, props expression,
//! patch-flag computation, children shape, runtime directive retention,
//! and the block decision.

use super::super::ast::{AttrOrDirective, DirectiveNode, ElementNode, ElementType, TemplateNode};
use super::super::errors::ErrorCode;
use super::super::expr::Expr;
use super::super::transform::{
    child_codegen, compound_parts, merge_text_runs, traverse_node, TransformContext,
};
use crate::program::{
    DirectiveCallIr, IrChildren, IrNode, IrTag, NameSource, PropIr, PropsIr, PropsMergeArg,
    SlotEntryIr, SlotsIr, TextPart, VNodeCall,
};
use crate::vnode::PatchFlags;

/// Directives consumed by other transforms; never dispatched here.
const STRUCTURAL: &[&str] = &["if", "else", "else-if", "for", "slot", "once", "pre", "is"];

pub fn build_element(el: &mut ElementNode, ctx: &mut TransformContext) -> IrNode {
    // v-once wraps whatever the element compiles to in a cache slot.
    let once = take_directive_node(el, "once").is_some();
    let ir = match el.tag_type {
        ElementType::Slot => build_slot_outlet(el, ctx),
        ElementType::Component => build_component(el, ctx),
        ElementType::Template => build_template(el, ctx),
        ElementType::Plain => build_plain(el, ctx),
    };
    if once {
        IrNode::Cache { index: ctx.next_cache_slot(), body: Box::new(ir) }
    } else {
        ir
    }
}

fn take_directive_node(el: &mut ElementNode, name: &str) -> Option<DirectiveNode> {
    let index = el.props.iter().position(
        |p| matches!(p, AttrOrDirective::Directive(d) if d.name == name),
    )?;
    match el.props.remove(index) {
        AttrOrDirective::Directive(d) => Some(d),
        _ => None,
    }
}

// =============================================================================
// Plain elements
// =============================================================================

fn build_plain(el: &mut ElementNode, ctx: &mut TransformContext) -> IrNode {
    let mut build = build_props(el, ctx, false);

    // Children shape; a single text run is written via textContent.
    let children = build_element_children(el, &mut build.patch_flag);

    // SVG roots propagate namespace; dynamic keys force structural
    // realignment. Both need a block scope of their own.
    let is_block = el.tag == "svg" || el.tag == "foreignObject" || build.has_dynamic_key;

    IrNode::vnode(VNodeCall {
        tag: IrTag::Element(el.tag.clone()),
        props: build.props,
        children,
        patch_flag: build.patch_flag.bits(),
        dynamic_props: if build.dynamic_prop_names.is_empty() {
            None
        } else {
            Some(build.dynamic_prop_names)
        },
        directives: build.directives,
        is_block,
        is_for_block: false,
    })
}

fn build_element_children(el: &ElementNode, patch_flag: &mut PatchFlags) -> IrChildren {
    if el.children.is_empty() {
        return IrChildren::None;
    }
    if el.children.len() == 1 {
        match &el.children[0] {
            TemplateNode::Text(t) => {
                return IrChildren::Text(vec![TextPart::Static(t.content.clone())]);
            }
            TemplateNode::CompoundText(compound) => {
                let parts = compound_parts(compound);
                if parts.iter().any(|p| matches!(p, TextPart::Expr(_))) {
                    *patch_flag |= PatchFlags::TEXT;
                }
                return IrChildren::Text(parts);
            }
            _ => {}
        }
    }
    IrChildren::Nodes(el.children.iter().map(child_codegen).collect())
}

// =============================================================================
// Components
// =============================================================================

fn build_component(el: &mut ElementNode, ctx: &mut TransformContext) -> IrNode {
    let tag = resolve_component_tag(el, ctx);
    let is_keep_alive = matches!(tag, IrTag::KeepAlive);
    let is_dynamic = matches!(tag, IrTag::DynamicComponent(_));

    let mut build = build_props(el, ctx, true);

    // Children: keep-alive and teleport take raw children; everything
    // else compiles slot functions.
    let children = if matches!(tag, IrTag::KeepAlive | IrTag::Teleport) {
        if is_keep_alive {
            // Raw children bypass slot tracking entirely.
            build.patch_flag |= PatchFlags::DYNAMIC_SLOTS;
        }
        for child in &mut el.children {
            traverse_node(child, ctx);
        }
        merge_text_runs(&mut el.children);
        if el.children.is_empty() {
            IrChildren::None
        } else {
            IrChildren::Nodes(el.children.iter().map(child_codegen).collect())
        }
    } else {
        let slots = build_component_slots(el, ctx);
        if slots.dynamic || is_keep_alive {
            build.patch_flag |= PatchFlags::DYNAMIC_SLOTS;
        }
        if slots.entries.is_empty() {
            IrChildren::None
        } else {
            IrChildren::Slots(slots)
        }
    };

    // Raw children bypass slot tracking entirely.
    let is_block = is_dynamic || is_keep_alive;

    IrNode::vnode(VNodeCall {
        tag,
        props: build.props,
        children,
        patch_flag: build.patch_flag.bits(),
        dynamic_props: if build.dynamic_prop_names.is_empty() {
            None
        } else {
            Some(build.dynamic_prop_names)
        },
        directives: build.directives,
        is_block,
        is_for_block: false,
    })
}

fn resolve_component_tag(el: &mut ElementNode, ctx: &mut TransformContext) -> IrTag {
    // `<component :is="...">`, `<anything is="...">`.
    let is_attr = el.find_attr("is").map(|a| a.value.clone().unwrap_or_default());
    let is_bind = el
        .props
        .iter()
        .find_map(|p| match p {
            AttrOrDirective::Directive(d)
                if (d.name == "bind"
                    && d.arg.as_ref().map(|a| a.content == "is").unwrap_or(false))
                    || d.name == "is" =>
            {
                d.exp.clone()
            }
            _ => None,
        });
    if el.tag == "component" || is_attr.is_some() || is_bind.is_some() {
        el.props.retain(|p| !is_is_prop(p));
        if let Some(mut exp) = is_bind {
            ctx.process_expression(&mut exp);
            return IrTag::DynamicComponent(exp.ast.unwrap_or(Expr::Null));
        }
        if let Some(name) = is_attr {
            return IrTag::DynamicComponent(Expr::Str(name));
        }
        // `<component>` with no `is` falls through as a plain resolve.
    }
    match el.tag.to_ascii_lowercase().as_str() {
        "teleport" => IrTag::Teleport,
        "suspense" => IrTag::Suspense,
        "keep-alive" | "keepalive" => IrTag::KeepAlive,
        _ => {
            ctx.components.insert(el.tag.clone());
            IrTag::Component(el.tag.clone())
        }
    }
}

fn is_is_prop(p: &AttrOrDirective) -> bool {
    match p {
        AttrOrDirective::Attr(a) => a.name == "is",
        AttrOrDirective::Directive(d) => {
            d.name == "is"
                || (d.name == "bind" && d.arg.as_ref().map(|a| a.content == "is").unwrap_or(false))
        }
    }
}

/// Collect named and scoped slots from a component's children: `v-slot`
/// on the component itself, `<template v-slot:name>` children, implicit
/// default content, and conditional slot templates (already fused into
/// `If` nodes).
fn build_component_slots(el: &mut ElementNode, ctx: &mut TransformContext) -> SlotsIr {
    let mut slots = SlotsIr { entries: Vec::new(), dynamic: false };

    // `v-slot` on the component: the entire children are the default slot.
    if let Some(dir) = take_directive_node(el, "slot") {
        let entry = build_slot_entry(dir, std::mem::take(&mut el.children), None, ctx);
        push_slot(&mut slots, entry, ctx);
        return slots;
    }

    let children = std::mem::take(&mut el.children);
    let mut implicit_default: Vec<TemplateNode> = Vec::new();

    for mut child in children {
        match &mut child {
            TemplateNode::Element(template)
                if template.tag_type == ElementType::Template
                    && template.find_directive("slot").is_some() =>
            {
                let dir = take_directive_node(template, "slot")
                    .unwrap_or_else(|| unreachable_directive());
                let body = std::mem::take(&mut template.children);
                let entry = build_slot_entry(dir, body, None, ctx);
                push_slot(&mut slots, entry, ctx);
            }
            TemplateNode::If(if_node) => {
                // Conditional slot templates.
                let mut handled = false;
                for branch in &mut if_node.branches {
                    if branch.children.len() == 1 {
                        if let TemplateNode::Element(template) = &mut branch.children[0] {
                            if template.tag_type == ElementType::Template
                                && template.find_directive("slot").is_some()
                            {
                                let dir = take_directive_node(template, "slot")
                                    .unwrap_or_else(|| unreachable_directive());
                                let body = std::mem::take(&mut template.children);
                                let condition = branch.condition.as_mut().map(|c| {
                                    ctx.process_expression(c);
                                    c.ast.clone().unwrap_or(Expr::Bool(true))
                                });
                                let entry = build_slot_entry(dir, body, condition, ctx);
                                push_slot(&mut slots, entry, ctx);
                                slots.dynamic = true;
                                handled = true;
                            }
                        }
                    }
                }
                if !handled {
                    implicit_default.push(child);
                }
            }
            TemplateNode::For(for_node) => {
                let iterated_slot = for_node.children.iter().any(|c| {
                    matches!(c, TemplateNode::Element(t)
                        if t.tag_type == ElementType::Template
                            && t.find_directive("slot").is_some())
                });
                if iterated_slot {
                    // Iterated slots are dynamic by construction.
                    ctx.error(ErrorCode::MisplacedVSlot, for_node.loc);
                    slots.dynamic = true;
                } else {
                    implicit_default.push(child);
                }
            }
            _ => implicit_default.push(child),
        }
    }

    let has_content = implicit_default.iter().any(|c| match c {
        TemplateNode::Text(t) => !t.content.trim().is_empty(),
        TemplateNode::Comment(_) => false,
        _ => true,
    });
    if has_content {
        let has_named_default = slots.entries.iter().any(
            |s| matches!(&s.name, NameSource::Static(n) if n == "default"),
        );
        if has_named_default {
            ctx.error(ErrorCode::DuplicateSlotName, el.loc);
        } else {
            let body = transform_slot_body(implicit_default, ctx);
            slots.entries.push(SlotEntryIr {
                name: NameSource::Static("default".to_string()),
                param: None,
                condition: None,
                body,
            });
        }
    }
    slots
}

fn unreachable_directive() -> DirectiveNode {
    DirectiveNode {
        name: String::new(),
        arg: None,
        exp: None,
        modifiers: Vec::new(),
        loc: Default::default(),
    }
}

fn build_slot_entry(
    dir: DirectiveNode,
    body: Vec<TemplateNode>,
    condition: Option<Expr>,
    ctx: &mut TransformContext,
) -> SlotEntryIr {
    let name = match &dir.arg {
        Some(arg) if arg.is_static => NameSource::Static(arg.content.clone()),
        Some(arg) => {
            let mut arg = arg.clone();
            ctx.process_expression(&mut arg);
            NameSource::Dynamic(arg.ast.unwrap_or(Expr::Null))
        }
        None => NameSource::Static("default".to_string()),
    };
    let param = dir.exp.as_ref().map(|e| e.content.clone());

    if let Some(param) = &param {
        ctx.add_identifier(param);
    }
    let body = transform_slot_body(body, ctx);
    if let Some(param) = &param {
        ctx.remove_identifier(param);
    }

    SlotEntryIr { name, param, condition, body }
}

fn transform_slot_body(mut body: Vec<TemplateNode>, ctx: &mut TransformContext) -> Vec<IrNode> {
    for child in &mut body {
        traverse_node(child, ctx);
    }
    merge_text_runs(&mut body);
    body.iter().map(child_codegen).collect()
}

fn push_slot(slots: &mut SlotsIr, entry: SlotEntryIr, ctx: &mut TransformContext) {
    if let NameSource::Dynamic(_) = entry.name {
        slots.dynamic = true;
    }
    let duplicate = entry.condition.is_none()
        && slots.entries.iter().any(|existing| {
            existing.condition.is_none()
                && matches!(
                    (&existing.name, &entry.name),
                    (NameSource::Static(a), NameSource::Static(b)) if a == b
                )
        });
    if duplicate {
        ctx.error(ErrorCode::DuplicateSlotName, Default::default());
        return;
    }
    slots.entries.push(entry);
}

// =============================================================================
// Slot outlets
// =============================================================================

fn build_slot_outlet(el: &mut ElementNode, ctx: &mut TransformContext) -> IrNode {
    let mut name = NameSource::Static("default".to_string());
    let mut props: Vec<PropIr> = Vec::new();

    let raw_props = std::mem::take(&mut el.props);
    for prop in raw_props {
        match prop {
            AttrOrDirective::Attr(attr) => {
                if attr.name == "name" {
                    name = NameSource::Static(attr.value.unwrap_or_default());
                } else {
                    props.push(PropIr {
                        key: NameSource::Static(attr.name),
                        value: Expr::Str(attr.value.unwrap_or_default()),
                    });
                }
            }
            AttrOrDirective::Directive(dir) if dir.name == "bind" => {
                let Some(arg) = &dir.arg else { continue };
                let Some(exp) = &dir.exp else {
                    ctx.error(ErrorCode::MissingExpression, dir.loc);
                    continue;
                };
                let mut exp = exp.clone();
                ctx.process_expression(&mut exp);
                let value = exp.ast.unwrap_or(Expr::Null);
                if arg.is_static && arg.content == "name" {
                    name = NameSource::Dynamic(value);
                } else if arg.is_static {
                    props.push(PropIr { key: NameSource::Static(arg.content.clone()), value });
                } else {
                    let mut arg = arg.clone();
                    ctx.process_expression(&mut arg);
                    props.push(PropIr {
                        key: NameSource::Dynamic(arg.ast.unwrap_or(Expr::Null)),
                        value,
                    });
                }
            }
            AttrOrDirective::Directive(dir) => {
                ctx.error(ErrorCode::UnexpectedDirectiveOnSlotOutlet, dir.loc);
            }
        }
    }

    for child in &mut el.children {
        traverse_node(child, ctx);
    }
    merge_text_runs(&mut el.children);
    let fallback: Vec<IrNode> = el.children.iter().map(child_codegen).collect();

    IrNode::RenderSlot { name, props, fallback }
}

// =============================================================================
// Templates that survive structuring (v-slot handled above)
// =============================================================================

fn build_template(el: &mut ElementNode, ctx: &mut TransformContext) -> IrNode {
    if el.find_directive("slot").is_some() {
        ctx.error(ErrorCode::MisplacedVSlot, el.loc);
        return IrNode::Comment(String::new());
    }
    let children: Vec<IrNode> = el.children.iter().map(child_codegen).collect();
    IrNode::vnode(VNodeCall {
        tag: IrTag::Fragment,
        props: None,
        children: IrChildren::Nodes(children),
        patch_flag: PatchFlags::STABLE_FRAGMENT.bits(),
        dynamic_props: None,
        directives: Vec::new(),
        is_block: false,
        is_for_block: false,
    })
}

// =============================================================================
// Props
// =============================================================================

pub(crate) struct PropsBuild {
    pub props: Option<PropsIr>,
    pub patch_flag: PatchFlags,
    pub dynamic_prop_names: Vec<String>,
    pub directives: Vec<DirectiveCallIr>,
    pub has_dynamic_key: bool,
}

/// Iterate raw props: static attributes become literal entries, directive
/// transforms contribute computed entries, no-argument `v-bind`/`v-on`
/// become merge arguments, and everything feeds the patch-flag analysis.
pub(crate) fn build_props(
    el: &mut ElementNode,
    ctx: &mut TransformContext,
    is_component: bool,
) -> PropsBuild {
    let mut entries: Vec<PropIr> = Vec::new();
    let mut merge_args: Vec<PropsMergeArg> = Vec::new();
    let mut directives: Vec<DirectiveCallIr> = Vec::new();

    let mut has_class_binding = false;
    let mut has_style_binding = false;
    let mut has_hydration_event = false;
    let mut has_dynamic_keys = false;
    let mut has_ref = false;
    let mut dynamic_prop_names: Vec<String> = Vec::new();
    let mut has_dynamic_key = false;

    let raw_props = std::mem::take(&mut el.props);
    for prop in raw_props {
        match prop {
            AttrOrDirective::Attr(attr) => {
                if attr.name == "ref" {
                    has_ref = true;
                }
                push_prop(
                    &mut entries,
                    PropIr {
                        key: NameSource::Static(attr.name.clone()),
                        value: Expr::Str(attr.value.unwrap_or_default()),
                    },
                );
            }
            AttrOrDirective::Directive(dir) => {
                if STRUCTURAL.contains(&dir.name.as_str()) {
                    continue;
                }
                // No-argument bind/on merge whole objects.
                if dir.arg.is_none() && (dir.name == "bind" || dir.name == "on") {
                    let Some(exp) = &dir.exp else {
                        ctx.error(ErrorCode::MissingExpression, dir.loc);
                        continue;
                    };
                    let mut exp = exp.clone();
                    ctx.process_expression(&mut exp);
                    let value = exp.ast.unwrap_or(Expr::Null);
                    if !entries.is_empty() {
                        merge_args.push(PropsMergeArg::Object(std::mem::take(&mut entries)));
                    }
                    merge_args.push(if dir.name == "bind" {
                        PropsMergeArg::Spread(value)
                    } else {
                        PropsMergeArg::Handlers(value)
                    });
                    has_dynamic_keys = true;
                    continue;
                }

                match ctx.directive_transforms.get(&dir.name).cloned() {
                    Some(transform) => {
                        let result = transform(&dir, el, ctx);
                        for prop in &result.props {
                            analyze_prop(
                                prop,
                                is_component,
                                &mut has_class_binding,
                                &mut has_style_binding,
                                &mut has_hydration_event,
                                &mut has_dynamic_keys,
                                &mut has_ref,
                                &mut has_dynamic_key,
                                &mut dynamic_prop_names,
                            );
                        }
                        for prop in result.props {
                            push_prop(&mut entries, prop);
                        }
                        if result.need_runtime {
                            directives.push(directive_call(&dir, ctx));
                        }
                    }
                    None => {
                        // User directive: resolve at render time and keep
                        // for the runtime directive call.
                        ctx.directives.insert(dir.name.clone());
                        directives.push(directive_call(&dir, ctx));
                    }
                }
            }
        }
    }

    // Patch-flag synthesis.
    let mut patch_flag = PatchFlags::empty();
    if has_dynamic_keys {
        patch_flag |= PatchFlags::FULL_PROPS;
    } else {
        if has_class_binding && !is_component {
            patch_flag |= PatchFlags::CLASS;
        }
        if has_style_binding && !is_component {
            patch_flag |= PatchFlags::STYLE;
        }
        if !dynamic_prop_names.is_empty() {
            patch_flag |= PatchFlags::PROPS;
        }
        if has_hydration_event {
            patch_flag |= PatchFlags::HYDRATE_EVENTS;
        }
    }
    if has_ref {
        patch_flag |= PatchFlags::NEED_PATCH;
    }
    if !directives.is_empty() && patch_flag.is_empty() {
        patch_flag |= PatchFlags::NEED_PATCH;
    }

    let props = if merge_args.is_empty() {
        if entries.is_empty() {
            None
        } else {
            Some(PropsIr::Object(entries))
        }
    } else {
        if !entries.is_empty() {
            merge_args.push(PropsMergeArg::Object(entries));
        }
        if merge_args.len() == 1 {
            // A lone v-bind object needs no merge call.
            match merge_args.pop() {
                Some(PropsMergeArg::Object(entries)) => Some(PropsIr::Object(entries)),
                Some(other) => Some(PropsIr::Merge(vec![other])),
                None => None,
            }
        } else {
            Some(PropsIr::Merge(merge_args))
        }
    };

    PropsBuild {
        props,
        patch_flag,
        dynamic_prop_names: if has_dynamic_keys { Vec::new() } else { dynamic_prop_names },
        directives,
        has_dynamic_key,
    }
}

#[allow(clippy::too_many_arguments)]
fn analyze_prop(
    prop: &PropIr,
    is_component: bool,
    has_class_binding: &mut bool,
    has_style_binding: &mut bool,
    has_hydration_event: &mut bool,
    has_dynamic_keys: &mut bool,
    has_ref: &mut bool,
    has_dynamic_key: &mut bool,
    dynamic_prop_names: &mut Vec<String>,
) {
    let name = match &prop.key {
        NameSource::Static(name) => name,
        NameSource::Dynamic(_) => {
            *has_dynamic_keys = true;
            return;
        }
    };
    if prop.value.is_constant() {
        return;
    }
    if name.starts_with("on") && name != "onClick" && name != "onUpdate:modelValue" {
        *has_hydration_event = true;
    }
    match name.as_str() {
        "ref" => *has_ref = true,
        "key" => *has_dynamic_key = true,
        "class" if !is_component => *has_class_binding = true,
        "style" if !is_component => *has_style_binding = true,
        other => {
            if !dynamic_prop_names.iter().any(|n| n == other) {
                dynamic_prop_names.push(other.to_string());
            }
        }
    }
}

/// Duplicate `class`/`style`/`onX` entries merge into arrays; other
/// duplicates keep the last value (the parser already warned).
fn push_prop(entries: &mut Vec<PropIr>, prop: PropIr) {
    let NameSource::Static(name) = &prop.key else {
        entries.push(prop);
        return;
    };
    let mergeable = name == "class" || name == "style" || name.starts_with("on");
    if let Some(existing) = entries
        .iter_mut()
        .find(|p| matches!(&p.key, NameSource::Static(n) if n == name))
    {
        if mergeable {
            let previous = existing.value.clone();
            existing.value = match previous {
                Expr::ArrayLit(mut items) => {
                    items.push(prop.value);
                    Expr::ArrayLit(items)
                }
                other => Expr::ArrayLit(vec![other, prop.value]),
            };
        } else {
            existing.value = prop.value;
        }
        return;
    }
    entries.push(prop);
}

fn directive_call(dir: &DirectiveNode, ctx: &mut TransformContext) -> DirectiveCallIr {
    let value = dir.exp.as_ref().map(|e| {
        let mut e = e.clone();
        ctx.process_expression(&mut e);
        e.ast.unwrap_or(Expr::Null)
    });
    let arg = dir.arg.as_ref().map(|a| {
        if a.is_static {
            NameSource::Static(a.content.clone())
        } else {
            let mut a = a.clone();
            ctx.process_expression(&mut a);
            NameSource::Dynamic(a.ast.unwrap_or(Expr::Null))
        }
    });
    DirectiveCallIr {
        name: dir.name.clone(),
        value,
        arg,
        modifiers: dir.modifiers.clone(),
    }
}
