//! Built-in directive transforms.
//!
//! Each transform receives the directive and its host element and returns
//! props to merge into the element's vnode call, plus whether the
//! directive must be retained for a runtime directive call.

use std::collections::HashMap;
use std::rc::Rc;

use super::super::ast::{DirectiveNode, ElementNode};
use super::super::errors::ErrorCode;
use super::super::expr::{AssignOp, Expr};
use super::super::transform::{DirectiveTransform, DirectiveTransformResult, TransformContext};
use crate::program::{NameSource, PropIr};

pub fn builtin_table() -> HashMap<String, DirectiveTransform> {
    let mut table: HashMap<String, DirectiveTransform> = HashMap::new();
    table.insert("bind".to_string(), Rc::new(transform_bind));
    table.insert("on".to_string(), Rc::new(transform_on));
    table.insert("model".to_string(), Rc::new(transform_model));
    table.insert("show".to_string(), Rc::new(transform_show));
    table.insert("text".to_string(), Rc::new(transform_text));
    table.insert("html".to_string(), Rc::new(transform_html));
    table.insert("cloak".to_string(), Rc::new(transform_cloak));
    table
}

fn empty() -> DirectiveTransformResult {
    DirectiveTransformResult { props: Vec::new(), need_runtime: false }
}

/// `v-bind:arg` / `:arg` with `.camel` and `.prop` modifiers. The
/// no-argument form is handled by the element transform (props merge).
fn transform_bind(
    dir: &DirectiveNode,
    _el: &ElementNode,
    ctx: &mut TransformContext,
) -> DirectiveTransformResult {
    let Some(arg) = &dir.arg else { return empty() };
    let Some(exp) = &dir.exp else {
        ctx.error(ErrorCode::MissingExpression, dir.loc);
        return empty();
    };
    let mut exp = exp.clone();
    ctx.process_expression(&mut exp);
    let value = exp.ast.clone().unwrap_or(Expr::Null);

    let key = if arg.is_static {
        let mut name = arg.content.clone();
        if dir.modifiers.iter().any(|m| m == "camel") {
            name = camelize(&name);
        }
        if dir.modifiers.iter().any(|m| m == "prop") {
            name = format!(".{name}");
        }
        NameSource::Static(name)
    } else {
        let mut arg_exp = arg.clone();
        arg_exp.is_static = false;
        ctx.process_expression(&mut arg_exp);
        NameSource::Dynamic(arg_exp.ast.clone().unwrap_or(Expr::Null))
    };

    DirectiveTransformResult { props: vec![PropIr { key, value }], need_runtime: false }
}

/// `v-on:event` / `@event`. Inline statements wrap into a handler; the
/// `.stop` / `.prevent` / `.self` and key modifiers compile into the
/// handler-name suffix convention the host backend understands; `.once`,
/// `.capture`, `.passive` become handler-name prefixes.
fn transform_on(
    dir: &DirectiveNode,
    _el: &ElementNode,
    ctx: &mut TransformContext,
) -> DirectiveTransformResult {
    let Some(arg) = &dir.arg else { return empty() };
    let Some(exp) = &dir.exp else {
        ctx.error(ErrorCode::MissingExpression, dir.loc);
        return empty();
    };
    let mut exp = exp.clone();
    ctx.process_expression(&mut exp);
    let value = exp.ast.clone().unwrap_or(Expr::Null);

    // A bare method/path reference is the handler itself; an inline
    // statement wraps into a `$event` handler so it runs on dispatch,
    // not on render.
    let is_fn_reference = matches!(
        value,
        Expr::Ident(_) | Expr::CtxAccess(_) | Expr::Member { .. } | Expr::Index { .. }
            | Expr::Arrow { .. }
    );
    let value = if is_fn_reference {
        value
    } else {
        Expr::Arrow { params: vec!["$event".to_string()], body: Box::new(value) }
    };

    let key = if arg.is_static {
        NameSource::Static(to_handler_key(&arg.content, &dir.modifiers))
    } else {
        let mut arg_exp = arg.clone();
        ctx.process_expression(&mut arg_exp);
        NameSource::Dynamic(arg_exp.ast.clone().unwrap_or(Expr::Null))
    };

    // Behavioral modifiers ride along for the runtime wrapper.
    let guards: Vec<String> = dir
        .modifiers
        .iter()
        .filter(|m| !matches!(m.as_str(), "once" | "capture" | "passive"))
        .cloned()
        .collect();
    let value = if guards.is_empty() {
        value
    } else {
        // withModifiers(handler, [...]) equivalent, encoded structurally.
        Expr::Call {
            callee: Box::new(Expr::Ident("__withModifiers".to_string())),
            args: std::iter::once(value)
                .chain(guards.into_iter().map(Expr::Str))
                .collect(),
        }
    };

    DirectiveTransformResult { props: vec![PropIr { key, value }], need_runtime: false }
}

/// Event prop name: `click` → `onClick`, with `.once`/`.capture`/
/// `.passive` folded into the name.
fn to_handler_key(event: &str, modifiers: &[String]) -> String {
    let mut name = format!("on{}", capitalize(&camelize(event)));
    if modifiers.iter().any(|m| m == "capture") {
        name.push_str("Capture");
    }
    if modifiers.iter().any(|m| m == "once") {
        name.push_str("Once");
    }
    if modifiers.iter().any(|m| m == "passive") {
        name.push_str("Passive");
    }
    name
}

/// `v-model="target"`: a `modelValue` prop plus an `onUpdate:modelValue`
/// handler assigning back into the target. A static argument renames the
/// prop pair.
fn transform_model(
    dir: &DirectiveNode,
    el: &ElementNode,
    ctx: &mut TransformContext,
) -> DirectiveTransformResult {
    let Some(exp) = &dir.exp else {
        ctx.error(ErrorCode::MissingExpression, dir.loc);
        return empty();
    };
    let mut exp = exp.clone();
    ctx.process_expression(&mut exp);
    let target = exp.ast.clone().unwrap_or(Expr::Null);
    if !is_assignable(&target) {
        ctx.error(ErrorCode::InvalidModelTarget, exp.loc);
        return empty();
    }

    let prop_name = match &dir.arg {
        Some(arg) if arg.is_static => arg.content.clone(),
        _ => "modelValue".to_string(),
    };
    let handler_name = format!("onUpdate:{prop_name}");

    let assign = Expr::Arrow {
        params: vec!["$value".to_string()],
        body: Box::new(Expr::Assign {
            target: Box::new(target.clone()),
            op: AssignOp::Assign,
            value: Box::new(Expr::Ident("$value".to_string())),
        }),
    };

    let props = vec![
        PropIr { key: NameSource::Static(prop_name), value: target },
        PropIr { key: NameSource::Static(handler_name), value: assign },
    ];
    // Native form elements need the runtime directive to wire host events;
    // components consume the prop pair directly.
    let need_runtime = el.tag_type == super::super::ast::ElementType::Plain;
    DirectiveTransformResult { props, need_runtime }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident(_) | Expr::CtxAccess(_) | Expr::Member { .. } | Expr::Index { .. }
    )
}

/// `v-show`: retained as a runtime directive; display toggling happens in
/// the directive hooks against the host backend.
fn transform_show(
    dir: &DirectiveNode,
    _el: &ElementNode,
    ctx: &mut TransformContext,
) -> DirectiveTransformResult {
    if dir.exp.is_none() {
        ctx.error(ErrorCode::MissingExpression, dir.loc);
        return empty();
    }
    DirectiveTransformResult { props: Vec::new(), need_runtime: true }
}

/// `v-text="expr"`: a TEXT-flagged textContent write.
fn transform_text(
    dir: &DirectiveNode,
    _el: &ElementNode,
    ctx: &mut TransformContext,
) -> DirectiveTransformResult {
    let Some(exp) = &dir.exp else {
        ctx.error(ErrorCode::MissingExpression, dir.loc);
        return empty();
    };
    let mut exp = exp.clone();
    ctx.process_expression(&mut exp);
    DirectiveTransformResult {
        props: vec![PropIr {
            key: NameSource::Static("textContent".to_string()),
            value: exp.ast.clone().unwrap_or(Expr::Null),
        }],
        need_runtime: false,
    }
}

/// `v-html="expr"`: raw markup through the host's static-content path.
fn transform_html(
    dir: &DirectiveNode,
    _el: &ElementNode,
    ctx: &mut TransformContext,
) -> DirectiveTransformResult {
    let Some(exp) = &dir.exp else {
        ctx.error(ErrorCode::MissingExpression, dir.loc);
        return empty();
    };
    let mut exp = exp.clone();
    ctx.process_expression(&mut exp);
    DirectiveTransformResult {
        props: vec![PropIr {
            key: NameSource::Static("innerHTML".to_string()),
            value: exp.ast.clone().unwrap_or(Expr::Null),
        }],
        need_runtime: false,
    }
}

/// `v-cloak` is a no-op at runtime; it only exists as a styling hook
/// before mount.
fn transform_cloak(
    _dir: &DirectiveNode,
    _el: &ElementNode,
    _ctx: &mut TransformContext,
) -> DirectiveTransformResult {
    empty()
}

fn camelize(s: &str) -> String {
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

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_key() {
        assert_eq!(to_handler_key("click", &[]), "onClick");
        assert_eq!(to_handler_key("update:model-value", &[]), "onUpdate:modelValue");
        assert_eq!(to_handler_key("click", &["once".into()]), "onClickOnce");
        assert_eq!(
            to_handler_key("scroll", &["capture".into(), "passive".into()]),
            "onScrollCapturePassive"
        );
    }

    #[test]
    fn test_camelize() {
        assert_eq!(camelize("some-attr"), "someAttr");
        assert_eq!(camelize("plain"), "plain");
    }
}
