//! Render-program evaluator.
//!
//! Walks the portable IR against a component instance and produces the
//! virtual tree: vnode calls open block scopes that collect dynamic
//! descendants, `renderList` expands iterations, `renderSlot` invokes the
//! parent-supplied slot functions, and cache slots back `v-once`.
//!
//! Expressions evaluate over [`Value`] with a local scope chain (iteration
//! aliases, slot props, arrow params) in front of the instance's
//! render-context resolution.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::warn;

use crate::component::{resolve_component, resolve_directive, Instance, RenderFn};
use crate::error::{handle_error, ErrorSource, RuntimeError};
use crate::compiler::expr::{AssignOp, BinaryOp, Expr, UnaryOp};
use crate::program::{
    DirectiveCallIr, HoistEntry, IrChildren, IrNode, IrTag, NameSource, PropIr, PropsIr,
    PropsMergeArg, RenderProgram, SlotEntryIr, SlotsIr, TextPart, VNodeCall,
};
use crate::value::{NativeFn, Value};
use crate::vnode::{
    Children, DirectiveKind, DirectiveUse, PatchFlags, ShapeFlags, SlotFn, Slots, VNode, VNodeType,
};

// =============================================================================
// Entry
// =============================================================================

/// Evaluate a component's render function into its subtree root.
pub fn render_component_root(instance: &Instance) -> VNode {
    let render_fn = instance.inner().render_fn.borrow().clone();
    match render_fn {
        Some(RenderFn::Program(program)) => render_program(instance, &program),
        Some(RenderFn::Native(f)) => f(instance),
        None => {
            handle_error(
                Some(instance),
                RuntimeError::new(
                    ErrorSource::Render,
                    "component has no render function and no template",
                ),
            );
            VNode::comment("")
        }
    }
}

fn render_program(instance: &Instance, program: &Rc<RenderProgram>) -> VNode {
    let mut ev = Evaluator {
        instance: instance.clone(),
        program: program.clone(),
        blocks: Vec::new(),
    };
    let scope = Scope::root(instance.clone());
    let mut nodes = ev.eval_node(&program.body, &scope);
    match nodes.len() {
        1 => nodes.pop().unwrap_or_else(|| VNode::comment("")),
        0 => VNode::comment(""),
        _ => VNode::fragment(nodes),
    }
}

// =============================================================================
// Scope
// =============================================================================

/// Local evaluation scope: immutable frames in front of the instance's
/// render context.
#[derive(Clone)]
pub struct Scope {
    instance: Instance,
    frames: Vec<Rc<HashMap<String, Value>>>,
}

impl Scope {
    pub fn root(instance: Instance) -> Self {
        Self { instance, frames: Vec::new() }
    }

    pub fn with_frame(&self, frame: HashMap<String, Value>) -> Scope {
        let mut frames = self.frames.clone();
        frames.push(Rc::new(frame));
        Scope { instance: self.instance.clone(), frames }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Some(value.clone());
            }
        }
        None
    }
}

// =============================================================================
// IR evaluation
// =============================================================================

struct Evaluator {
    instance: Instance,
    program: Rc<RenderProgram>,
    /// Open block scopes; dynamic vnodes collect into the innermost.
    blocks: Vec<Vec<VNode>>,
}

impl Evaluator {
    fn eval_nodes(&mut self, irs: &[IrNode], scope: &Scope) -> Vec<VNode> {
        let mut out = Vec::with_capacity(irs.len());
        for ir in irs {
            out.extend(self.eval_node(ir, scope));
        }
        out
    }

    fn eval_node(&mut self, ir: &IrNode, scope: &Scope) -> Vec<VNode> {
        match ir {
            IrNode::VNode(call) => vec![self.eval_vnode_call(call, scope)],
            IrNode::Hoisted(index) => vec![self.materialize_hoist(*index)],
            IrNode::Text { parts, dynamic } => {
                let text = self.eval_text_parts(parts, scope);
                let node = VNode::text(text);
                if *dynamic {
                    node.borrow_mut().patch_flag = PatchFlags::TEXT;
                    self.track_in_block(&node);
                }
                vec![node]
            }
            IrNode::Comment(content) => vec![VNode::comment(content.clone())],
            IrNode::Conditional { test, consequent, alternate } => {
                let branch = if self.eval(test, scope).is_truthy() {
                    consequent
                } else {
                    alternate
                };
                self.eval_node(branch, scope)
            }
            IrNode::RenderList { source, value_alias, key_alias, index_alias, body, .. } => self
                .eval_render_list(
                    source,
                    value_alias.as_deref(),
                    key_alias.as_deref(),
                    index_alias.as_deref(),
                    body,
                    scope,
                ),
            IrNode::RenderSlot { name, props, fallback } => {
                vec![self.eval_render_slot(name, props, fallback, scope)]
            }
            IrNode::Cache { index, body } => vec![self.eval_cache(*index, body, scope)],
        }
    }

    fn eval_vnode_call(&mut self, call: &VNodeCall, scope: &Scope) -> VNode {
        if call.is_block {
            self.blocks.push(Vec::new());
        }

        let props = call.props.as_ref().map(|p| self.eval_props(p, scope));
        let patch_flag = PatchFlags::from_bits_truncate(call.patch_flag);

        // Tag resolution decides the vnode variant.
        let kind = match &call.tag {
            IrTag::Element(tag) => VNodeType::Element(Rc::from(tag.as_str())),
            IrTag::Fragment => VNodeType::Fragment,
            IrTag::Teleport => VNodeType::Teleport,
            IrTag::Suspense => VNodeType::Suspense,
            IrTag::KeepAlive => {
                // Keep-alive internals are out of scope; render children
                // through a fragment so the tree stays correct.
                VNodeType::Fragment
            }
            IrTag::Component(name) => match resolve_component(&self.instance, name) {
                Some(def) => VNodeType::Component(def),
                None => {
                    warn!(component = name.as_str(), "failed to resolve component");
                    VNodeType::Element(Rc::from(name.as_str()))
                }
            },
            IrTag::DynamicComponent(exp) => {
                let resolved = self.eval(exp, scope);
                match resolved {
                    Value::Str(name) => match resolve_component(&self.instance, &name) {
                        Some(def) => VNodeType::Component(def),
                        None => VNodeType::Element(Rc::from(&*name)),
                    },
                    _ => {
                        warn!("dynamic component expression did not resolve to a name");
                        VNodeType::Comment
                    }
                }
            }
        };

        // Suspense keeps named slots (default/fallback); anything else
        // that is not a component flattens them.
        let slot_consumer = matches!(kind, VNodeType::Component(_) | VNodeType::Suspense);
        let children = match &call.children {
            IrChildren::None => Children::None,
            IrChildren::Text(parts) => Children::Text(self.eval_text_parts(parts, scope)),
            IrChildren::Nodes(nodes) => Children::Nodes(self.eval_nodes(nodes, scope)),
            IrChildren::Slots(slots) => {
                if slot_consumer {
                    Children::Slots(self.eval_slots(slots, scope))
                } else {
                    Children::Nodes(self.eval_slots_flat(slots, scope))
                }
            }
        };

        let node = VNode::new(kind, props, children);
        {
            let mut data = node.borrow_mut();
            data.patch_flag |= patch_flag;
            data.dynamic_props = call.dynamic_props.clone();
        }
        for directive in &call.directives {
            if let Some(applied) = self.eval_directive(directive, scope) {
                node.borrow_mut().directives.push(applied);
            }
        }

        if call.is_block {
            let collected = self.blocks.pop().unwrap_or_default();
            node.borrow_mut().dynamic_children = Some(collected);
            // The block itself participates in the parent block.
            self.force_track(&node);
        } else {
            self.track_in_block(&node);
        }
        node
    }

    /// Collect a vnode into the innermost open block if it needs
    /// per-update attention.
    fn track_in_block(&mut self, node: &VNode) {
        let data = node.borrow();
        let tracked = data.patch_flag.has_fast_path()
            || data.shape_flag.intersects(
                ShapeFlags::COMPONENT | ShapeFlags::TELEPORT | ShapeFlags::SUSPENSE,
            );
        drop(data);
        if tracked {
            self.force_track(node);
        }
    }

    fn force_track(&mut self, node: &VNode) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(node.clone());
        }
    }

    fn materialize_hoist(&mut self, index: usize) -> VNode {
        if let Some(cached) = self.instance.inner().hoist_cache.borrow().get(&index) {
            return cached.clone();
        }
        let entry = self.program.hoists.get(index).cloned();
        let node = match entry {
            Some(HoistEntry::Node(ir)) => {
                let scope = Scope::root(self.instance.clone());
                let mut nodes = self.eval_node(&ir, &scope);
                nodes.pop().unwrap_or_else(|| VNode::comment(""))
            }
            Some(HoistEntry::Props(_)) | None => {
                warn!(index, "hoist slot is not a node");
                VNode::comment("")
            }
        };
        node.borrow_mut().patch_flag |= PatchFlags::HOISTED;
        self.instance
            .inner()
            .hoist_cache
            .borrow_mut()
            .insert(index, node.clone());
        node
    }

    fn eval_cache(&mut self, index: usize, body: &IrNode, scope: &Scope) -> VNode {
        if let Some(Some(cached)) = self.instance.inner().render_cache.borrow().get(index) {
            return cached.clone();
        }
        let mut nodes = self.eval_node(body, scope);
        let node = nodes.pop().unwrap_or_else(|| VNode::comment(""));
        let mut cache = self.instance.inner().render_cache.borrow_mut();
        if cache.len() <= index {
            cache.resize(index + 1, None);
        }
        cache[index] = Some(node.clone());
        node
    }

    fn eval_render_list(
        &mut self,
        source: &Expr,
        value_alias: Option<&str>,
        key_alias: Option<&str>,
        index_alias: Option<&str>,
        body: &IrNode,
        scope: &Scope,
    ) -> Vec<VNode> {
        let source = self.eval(source, scope);
        let entries: Vec<(Value, Value, usize)> = match source {
            Value::List(list) => list
                .to_vec()
                .into_iter()
                .enumerate()
                .map(|(i, v)| (v, Value::Number(i as f64), i))
                .collect(),
            Value::Number(n) => (1..=(n.max(0.0) as i64))
                .enumerate()
                .map(|(i, v)| (Value::Number(v as f64), Value::Number(i as f64), i))
                .collect(),
            Value::Map(store) => store
                .entries()
                .into_iter()
                .enumerate()
                .map(|(i, (k, v))| (v, Value::string(k), i))
                .collect(),
            Value::Str(s) => s
                .chars()
                .enumerate()
                .map(|(i, c)| (Value::string(c.to_string()), Value::Number(i as f64), i))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                warn!(?other, "v-for source is not iterable");
                Vec::new()
            }
        };

        let mut out = Vec::with_capacity(entries.len());
        for (value, key, index) in entries {
            let mut frame = HashMap::new();
            if let Some(alias) = value_alias {
                frame.insert(alias.to_string(), value);
            }
            if let Some(alias) = key_alias {
                frame.insert(alias.to_string(), key);
            }
            if let Some(alias) = index_alias {
                frame.insert(alias.to_string(), Value::Number(index as f64));
            }
            let item_scope = scope.with_frame(frame);
            out.extend(self.eval_node(body, &item_scope));
        }
        out
    }

    fn eval_render_slot(
        &mut self,
        name: &NameSource,
        props: &[PropIr],
        fallback: &[IrNode],
        scope: &Scope,
    ) -> VNode {
        let slot_name = match name {
            NameSource::Static(n) => n.clone(),
            NameSource::Dynamic(exp) => self.eval(exp, scope).to_display_string(),
        };
        let slot_props = {
            let store = crate::reactivity::Store::new();
            for prop in props {
                let key = match &prop.key {
                    NameSource::Static(k) => k.clone(),
                    NameSource::Dynamic(exp) => self.eval(exp, scope).to_display_string(),
                };
                let value = self.eval(&prop.value, scope);
                store.set(&key, value);
            }
            Value::Map(store)
        };

        let slots = self.instance.slots();
        let children = match slots.get(&slot_name) {
            Some(slot_fn) => slot_fn(&slot_props),
            None => self.eval_nodes(fallback, scope),
        };
        let node = VNode::fragment(children);
        node.borrow_mut().patch_flag = PatchFlags::STABLE_FRAGMENT;
        self.track_in_block(&node);
        node
    }

    fn eval_slots(&mut self, slots_ir: &SlotsIr, scope: &Scope) -> Slots {
        let mut slots = Slots { entries: IndexMap::new(), dynamic: slots_ir.dynamic };
        for entry in &slots_ir.entries {
            if let Some(condition) = &entry.condition {
                if !self.eval(condition, scope).is_truthy() {
                    continue;
                }
            }
            let name = match &entry.name {
                NameSource::Static(n) => n.clone(),
                NameSource::Dynamic(exp) => self.eval(exp, scope).to_display_string(),
            };
            slots.entries.insert(name, self.make_slot_fn(entry, scope));
        }
        slots
    }

    fn eval_slots_flat(&mut self, slots_ir: &SlotsIr, scope: &Scope) -> Vec<VNode> {
        let mut out = Vec::new();
        for entry in &slots_ir.entries {
            out.extend(self.eval_nodes(&entry.body, scope));
        }
        out
    }

    /// A compiled slot: a function from slot props to children, bound to
    /// the parent's scope at the time the component vnode was built.
    fn make_slot_fn(&self, entry: &SlotEntryIr, scope: &Scope) -> SlotFn {
        let instance = self.instance.clone();
        let program = self.program.clone();
        let body = entry.body.clone();
        let param = entry.param.clone();
        let captured = scope.clone();
        Rc::new(move |slot_props: &Value| {
            let mut ev = Evaluator {
                instance: instance.clone(),
                program: program.clone(),
                blocks: Vec::new(),
            };
            let scope = match &param {
                Some(param) => {
                    let mut frame = HashMap::new();
                    frame.insert(param.clone(), slot_props.clone());
                    captured.with_frame(frame)
                }
                None => captured.clone(),
            };
            ev.eval_nodes(&body, &scope)
        })
    }

    fn eval_directive(&mut self, ir: &DirectiveCallIr, scope: &Scope) -> Option<DirectiveUse> {
        let kind = if ir.name == "show" {
            DirectiveKind::Show
        } else {
            match resolve_directive(&self.instance, &ir.name) {
                Some(directive) => DirectiveKind::Custom(directive),
                None => {
                    warn!(directive = ir.name.as_str(), "failed to resolve directive");
                    return None;
                }
            }
        };
        let value = ir.value.as_ref().map(|e| self.eval(e, scope)).unwrap_or(Value::Null);
        let arg = ir.arg.as_ref().map(|a| match a {
            NameSource::Static(s) => s.clone(),
            NameSource::Dynamic(exp) => self.eval(exp, scope).to_display_string(),
        });
        Some(DirectiveUse {
            kind,
            value,
            old_value: std::cell::RefCell::new(Value::Null),
            arg,
            modifiers: ir.modifiers.clone(),
        })
    }

    fn eval_text_parts(&mut self, parts: &[TextPart], scope: &Scope) -> String {
        let mut out = String::new();
        for part in parts {
            match part {
                TextPart::Static(s) => out.push_str(s),
                TextPart::Expr(e) => out.push_str(&self.eval(e, scope).to_display_string()),
            }
        }
        out
    }

    // -- props ----------------------------------------------------------------

    fn eval_props(&mut self, props: &PropsIr, scope: &Scope) -> IndexMap<String, Value> {
        match props {
            PropsIr::Object(entries) => self.eval_prop_entries(entries, scope),
            PropsIr::Hoisted(index) => {
                let entry = self.program.hoists.get(*index).cloned();
                match entry {
                    Some(HoistEntry::Props(entries)) => self.eval_prop_entries(&entries, scope),
                    _ => {
                        warn!(index, "hoist slot is not a props object");
                        IndexMap::new()
                    }
                }
            }
            PropsIr::Merge(args) => {
                let mut merged: IndexMap<String, Value> = IndexMap::new();
                for arg in args {
                    match arg {
                        PropsMergeArg::Object(entries) => {
                            let entries = self.eval_prop_entries(entries, scope);
                            for (key, value) in entries {
                                merge_prop(&mut merged, key, value);
                            }
                        }
                        PropsMergeArg::Spread(exp) => {
                            if let Value::Map(store) = self.eval(exp, scope) {
                                for (key, value) in store.entries() {
                                    merge_prop(&mut merged, key, value);
                                }
                            }
                        }
                        PropsMergeArg::Handlers(exp) => {
                            if let Value::Map(store) = self.eval(exp, scope) {
                                for (key, value) in store.entries() {
                                    merge_prop(&mut merged, to_handler_key(&key), value);
                                }
                            }
                        }
                    }
                }
                merged
            }
        }
    }

    fn eval_prop_entries(&mut self, entries: &[PropIr], scope: &Scope) -> IndexMap<String, Value> {
        let mut out = IndexMap::new();
        for entry in entries {
            let key = match &entry.key {
                NameSource::Static(k) => k.clone(),
                NameSource::Dynamic(exp) => self.eval(exp, scope).to_display_string(),
            };
            let value = normalize_class_style(&key, self.eval(&entry.value, scope));
            merge_prop(&mut out, key, value);
        }
        out
    }

    fn eval(&self, expr: &Expr, scope: &Scope) -> Value {
        match eval_expr(expr, scope) {
            Ok(value) => value,
            Err(message) => {
                handle_error(
                    Some(&self.instance),
                    RuntimeError::new(ErrorSource::Expression, message),
                );
                Value::Null
            }
        }
    }
}

/// `mergeProps` semantics: `class`/`style` combine, `onX` handlers chain,
/// later keys otherwise win.
fn merge_prop(out: &mut IndexMap<String, Value>, key: String, value: Value) {
    let existing = out.get(&key).cloned();
    let Some(existing) = existing else {
        out.insert(key, value);
        return;
    };
    if key == "class" {
        let combined =
            format!("{} {}", existing.to_display_string(), value.to_display_string());
        out.insert(key, Value::string(combined.trim().to_string()));
    } else if key == "style" {
        let combined =
            format!("{};{}", existing.to_display_string(), value.to_display_string());
        out.insert(key, Value::string(combined));
    } else if key.starts_with("on") {
        match existing {
            Value::List(list) => {
                list.push(value);
            }
            other => {
                let list = crate::reactivity::ListStore::from_values([other, value]);
                out.insert(key, Value::List(list));
            }
        }
    } else {
        out.insert(key, value);
    }
}

/// Class and style bindings accept lists (duplicate-prop merges); the
/// host sees a single joined string.
fn normalize_class_style(key: &str, value: Value) -> Value {
    let Value::List(list) = &value else { return value };
    match key {
        "class" => {
            let parts: Vec<String> = list
                .peek_vec()
                .iter()
                .map(Value::to_display_string)
                .filter(|s| !s.is_empty())
                .collect();
            Value::string(parts.join(" "))
        }
        "style" => {
            let parts: Vec<String> = list
                .peek_vec()
                .iter()
                .map(Value::to_display_string)
                .filter(|s| !s.is_empty())
                .collect();
            Value::string(parts.join(";"))
        }
        _ => value,
    }
}

fn to_handler_key(event: &str) -> String {
    let mut chars = event.chars();
    match chars.next() {
        Some(first) => format!("on{}{}", first.to_uppercase(), chars.as_str()),
        None => "on".to_string(),
    }
}

// =============================================================================
// Expression evaluation
// =============================================================================

/// Evaluate an expression against a scope. Errors are messages; the
/// caller funnels them through error handling.
pub fn eval_expr(expr: &Expr, scope: &Scope) -> Result<Value, String> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::string(s.clone())),
        Expr::Ident(name) => {
            if let Some(value) = scope.lookup(name) {
                return Ok(value.unref());
            }
            builtin_ident(name).ok_or_else(|| format!("unknown identifier `{name}`"))
        }
        Expr::CtxAccess(name) => Ok(scope.instance.resolve_name(name)),
        Expr::Member { object, property, optional } => {
            let object = eval_expr(object, scope)?;
            if object.is_null() {
                if *optional {
                    return Ok(Value::Null);
                }
                return Ok(Value::Null);
            }
            Ok(member_value(&object, property))
        }
        Expr::Index { object, index } => {
            let object = eval_expr(object, scope)?;
            let index = eval_expr(index, scope)?;
            Ok(match (&object, &index) {
                (Value::List(list), Value::Number(n)) if *n >= 0.0 => list.get(*n as usize),
                (Value::Map(store), key) => store.get(&key.to_display_string()),
                _ => Value::Null,
            })
        }
        Expr::Call { callee, args } => eval_call(callee, args, scope),
        Expr::Unary { op, operand } => {
            let operand = eval_expr(operand, scope)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!operand.is_truthy()),
                UnaryOp::Neg => match operand.as_number() {
                    Some(n) => Value::Number(-n),
                    None => Value::Number(f64::NAN),
                },
            })
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, scope),
        Expr::Conditional { test, consequent, alternate } => {
            if eval_expr(test, scope)?.is_truthy() {
                eval_expr(consequent, scope)
            } else {
                eval_expr(alternate, scope)
            }
        }
        Expr::Assign { target, op, value } => {
            let mut new_value = eval_expr(value, scope)?;
            if *op != AssignOp::Assign {
                let current = eval_expr(target, scope)?;
                new_value = numeric_op(&current, &new_value, *op)?;
            }
            write_target(target, new_value.clone(), scope)?;
            Ok(new_value)
        }
        Expr::ArrayLit(items) => {
            let values: Result<Vec<Value>, String> =
                items.iter().map(|i| eval_expr(i, scope)).collect();
            Ok(Value::List(crate::reactivity::ListStore::from_values(values?)))
        }
        Expr::ObjectLit(entries) => {
            let store = crate::reactivity::Store::new();
            for (key, value) in entries {
                store.set(key, eval_expr(value, scope)?);
            }
            Ok(Value::Map(store))
        }
        Expr::Arrow { params, body } => {
            let params = params.clone();
            let body = (**body).clone();
            let captured = scope.clone();
            Ok(Value::Function(NativeFn::new(move |args| {
                let mut frame = HashMap::new();
                for (i, param) in params.iter().enumerate() {
                    frame.insert(param.clone(), args.get(i).cloned().unwrap_or(Value::Null));
                }
                let scope = captured.with_frame(frame);
                eval_expr(&body, &scope).unwrap_or(Value::Null)
            })))
        }
        Expr::Seq(statements) => {
            let mut last = Value::Null;
            for statement in statements {
                last = eval_expr(statement, scope)?;
            }
            Ok(last)
        }
    }
}

fn eval_call(callee: &Expr, args: &[Expr], scope: &Scope) -> Result<Value, String> {
    // withModifiers wrapper emitted by the v-on transform.
    if let Expr::Ident(name) = callee {
        if name == "__withModifiers" {
            let handler = eval_expr(args.first().ok_or("missing handler")?, scope)?;
            let guards: Vec<String> = args[1..]
                .iter()
                .filter_map(|a| match a {
                    Expr::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .collect();
            return Ok(Value::Function(with_modifiers(handler, guards)));
        }
    }
    let callee_value = eval_expr(callee, scope)?;
    let mut evaluated = Vec::with_capacity(args.len());
    for arg in args {
        evaluated.push(eval_expr(arg, scope)?);
    }
    match callee_value {
        Value::Function(f) => Ok(f.call(&evaluated)),
        other => Err(format!("`{}` is not callable", other.to_display_string())),
    }
}

/// Event-guard wrapper for `.stop` / `.prevent` / `.self` and key
/// modifiers. The event argument is duck-typed as a map.
fn with_modifiers(handler: Value, guards: Vec<String>) -> NativeFn {
    NativeFn::new(move |args| {
        let event = args.first();
        for guard in &guards {
            match guard.as_str() {
                "stop" => call_event_method(event, "stopPropagation"),
                "prevent" => call_event_method(event, "preventDefault"),
                "self" => {
                    if let Some(Value::Map(e)) = event {
                        if !e.peek("target").loose_eq(&e.peek("currentTarget")) {
                            return Value::Null;
                        }
                    }
                }
                key => {
                    if let Some(Value::Map(e)) = event {
                        if let Value::Str(pressed) = e.peek("key") {
                            if !key_matches(key, &pressed) {
                                return Value::Null;
                            }
                        }
                    }
                }
            }
        }
        match &handler {
            Value::Function(f) => f.call(args),
            _ => Value::Null,
        }
    })
}

fn call_event_method(event: Option<&Value>, method: &str) {
    if let Some(Value::Map(e)) = event {
        if let Value::Function(f) = e.peek(method) {
            f.call(&[]);
        }
    }
}

fn key_matches(guard: &str, pressed: &str) -> bool {
    let pressed = pressed.to_ascii_lowercase();
    match guard {
        "enter" => pressed == "enter",
        "tab" => pressed == "tab",
        "esc" | "escape" => pressed == "escape",
        "space" => pressed == " " || pressed == "space",
        "up" | "down" | "left" | "right" => pressed == format!("arrow{guard}"),
        "delete" => pressed == "delete" || pressed == "backspace",
        other => pressed == other,
    }
}

fn member_value(object: &Value, property: &str) -> Value {
    match object {
        Value::Map(store) => store.get(property),
        Value::List(list) => match property {
            "length" => Value::Number(list.len() as f64),
            _ => Value::Null,
        },
        Value::Str(s) => match property {
            "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Null,
        },
        Value::Signal(signal) => member_value(&signal.get(), property),
        Value::Computed(computed) => member_value(&computed.get(), property),
        _ => Value::Null,
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &Scope) -> Result<Value, String> {
    // Short-circuiting forms first.
    match op {
        BinaryOp::And => {
            let left = eval_expr(lhs, scope)?;
            return if left.is_truthy() { eval_expr(rhs, scope) } else { Ok(left) };
        }
        BinaryOp::Or => {
            let left = eval_expr(lhs, scope)?;
            return if left.is_truthy() { Ok(left) } else { eval_expr(rhs, scope) };
        }
        BinaryOp::NullishCoalesce => {
            let left = eval_expr(lhs, scope)?;
            return if left.is_null() { eval_expr(rhs, scope) } else { Ok(left) };
        }
        _ => {}
    }

    let left = eval_expr(lhs, scope)?;
    let right = eval_expr(rhs, scope)?;
    Ok(match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::string(format!(
                "{}{}",
                left.to_display_string(),
                right.to_display_string()
            )),
            _ => numeric(&left, &right, |a, b| a + b)?,
        },
        BinaryOp::Sub => numeric(&left, &right, |a, b| a - b)?,
        BinaryOp::Mul => numeric(&left, &right, |a, b| a * b)?,
        BinaryOp::Div => numeric(&left, &right, |a, b| a / b)?,
        BinaryOp::Rem => numeric(&left, &right, |a, b| a % b)?,
        BinaryOp::Eq => Value::Bool(left.loose_eq(&right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_eq(&right)),
        BinaryOp::Lt => compare(&left, &right, |o| o == std::cmp::Ordering::Less)?,
        BinaryOp::LtEq => compare(&left, &right, |o| o != std::cmp::Ordering::Greater)?,
        BinaryOp::Gt => compare(&left, &right, |o| o == std::cmp::Ordering::Greater)?,
        BinaryOp::GtEq => compare(&left, &right, |o| o != std::cmp::Ordering::Less)?,
        BinaryOp::And | BinaryOp::Or | BinaryOp::NullishCoalesce => unreachable!(),
    })
}

fn numeric(left: &Value, right: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, String> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Number(f(a, b))),
        _ => Err("arithmetic on non-numeric values".to_string()),
    }
}

fn compare(
    left: &Value,
    right: &Value,
    f: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, String> {
    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        _ => {
            let (a, b) = (left.as_number(), right.as_number());
            match (a, b) {
                (Some(a), Some(b)) => {
                    a.partial_cmp(&b).ok_or("comparison with NaN".to_string())?
                }
                _ => return Err("comparison of incompatible values".to_string()),
            }
        }
    };
    Ok(Value::Bool(f(ordering)))
}

fn numeric_op(current: &Value, delta: &Value, op: AssignOp) -> Result<Value, String> {
    match op {
        AssignOp::Assign => Ok(delta.clone()),
        AssignOp::Add => match (&current, &delta) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::string(format!(
                "{}{}",
                current.to_display_string(),
                delta.to_display_string()
            ))),
            _ => numeric(current, delta, |a, b| a + b),
        },
        AssignOp::Sub => numeric(current, delta, |a, b| a - b),
    }
}

fn write_target(target: &Expr, value: Value, scope: &Scope) -> Result<(), String> {
    match target {
        Expr::CtxAccess(name) => {
            scope.instance.write_name(name, value);
            Ok(())
        }
        Expr::Ident(name) => {
            // Scope locals are snapshots of iteration values; writing
            // through them cannot reach the source.
            Err(format!("cannot assign to scope binding `{name}`"))
        }
        Expr::Member { object, property, .. } => {
            let object = eval_expr(object, scope)?;
            match object {
                Value::Map(store) => {
                    store.set(property, value);
                    Ok(())
                }
                Value::Signal(signal) => {
                    // Writing a member of a signal-wrapped map.
                    if let Value::Map(store) = signal.peek() {
                        store.set(property, value);
                        Ok(())
                    } else {
                        Err("assignment target is not an object".to_string())
                    }
                }
                _ => Err("assignment target is not an object".to_string()),
            }
        }
        Expr::Index { object, index } => {
            let object = eval_expr(object, scope)?;
            let index = eval_expr(index, scope)?;
            match (object, index) {
                (Value::List(list), Value::Number(n)) if n >= 0.0 => {
                    list.set(n as usize, value);
                    Ok(())
                }
                (Value::Map(store), key) => {
                    store.set(&key.to_display_string(), value);
                    Ok(())
                }
                _ => Err("invalid indexed assignment target".to_string()),
            }
        }
        _ => Err("invalid assignment target".to_string()),
    }
}

fn builtin_ident(name: &str) -> Option<Value> {
    match name {
        "Infinity" => Some(Value::Number(f64::INFINITY)),
        "NaN" => Some(Value::Number(f64::NAN)),
        "Math" => Some(math_object()),
        "parseInt" => Some(Value::Function(NativeFn::new(|args| {
            match args.first().and_then(|v| v.as_str().map(str::trim)) {
                Some(s) => {
                    let digits: String = s
                        .chars()
                        .take_while(|c| c.is_ascii_digit() || *c == '-')
                        .collect();
                    digits.parse::<i64>().map(Value::from).unwrap_or(Value::Number(f64::NAN))
                }
                None => args.first().and_then(Value::as_number).map(|n| Value::Number(n.trunc()))
                    .unwrap_or(Value::Number(f64::NAN)),
            }
        }))),
        "parseFloat" => Some(Value::Function(NativeFn::new(|args| {
            args.first()
                .and_then(Value::as_number)
                .map(Value::Number)
                .unwrap_or(Value::Number(f64::NAN))
        }))),
        "isNaN" => Some(Value::Function(NativeFn::new(|args| {
            Value::Bool(args.first().and_then(Value::as_number).map(f64::is_nan).unwrap_or(true))
        }))),
        "console" => {
            let store = crate::reactivity::Store::new();
            store.set(
                "log",
                Value::Function(NativeFn::new(|args| {
                    let parts: Vec<String> =
                        args.iter().map(Value::to_display_string).collect();
                    tracing::debug!(target: "template", "{}", parts.join(" "));
                    Value::Null
                })),
            );
            Some(Value::Map(store))
        }
        _ => None,
    }
}

fn math_object() -> Value {
    let store = crate::reactivity::Store::new();
    let unary = |f: fn(f64) -> f64| {
        Value::Function(NativeFn::new(move |args| {
            args.first()
                .and_then(Value::as_number)
                .map(|n| Value::Number(f(n)))
                .unwrap_or(Value::Number(f64::NAN))
        }))
    };
    store.set("floor", unary(f64::floor));
    store.set("ceil", unary(f64::ceil));
    store.set("round", unary(f64::round));
    store.set("abs", unary(f64::abs));
    store.set("sqrt", unary(f64::sqrt));
    store.set(
        "max",
        Value::Function(NativeFn::new(|args| {
            args.iter()
                .filter_map(Value::as_number)
                .fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.max(n))))
                .map(Value::Number)
                .unwrap_or(Value::Number(f64::NEG_INFINITY))
        })),
    );
    store.set(
        "min",
        Value::Function(NativeFn::new(|args| {
            args.iter()
                .filter_map(Value::as_number)
                .fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.min(n))))
                .map(Value::Number)
                .unwrap_or(Value::Number(f64::INFINITY))
        })),
    );
    Value::Map(store)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppContext;
    use crate::compiler::expr::parse_expr;
    use crate::component::ComponentDef;
    use crate::reactivity::{reset_reactivity, Signal, Store};

    fn scope_with(entries: Vec<(&str, Value)>) -> Scope {
        let instance =
            Instance::new(ComponentDef::named("T").build(), None, AppContext::new());
        let state = Store::new();
        for (k, v) in entries {
            state.set(k, v);
        }
        instance.set_setup_state(state);
        Scope::root(instance)
    }

    fn eval_src(src: &str, scope: &Scope) -> Value {
        let parsed = parse_expr(src).unwrap_or_else(|e| panic!("parse `{src}`: {e:?}"));
        let rewritten = crate::compiler::expr::rewrite_free_idents(parsed, &|_| false);
        eval_expr(&rewritten, scope).unwrap_or_else(|e| panic!("eval `{src}`: {e}"))
    }

    #[test]
    fn test_arithmetic_and_strings() {
        reset_reactivity();
        let scope = scope_with(vec![("a", Value::from(2)), ("s", Value::from("x"))]);
        assert_eq!(eval_src("a + 3", &scope), Value::from(5));
        assert_eq!(eval_src("s + a", &scope), Value::from("x2"));
        assert_eq!(eval_src("a * 2 + 1", &scope), Value::from(5));
    }

    #[test]
    fn test_member_and_index() {
        reset_reactivity();
        let nested = Store::new();
        nested.set("b", Value::from(7));
        let list = crate::reactivity::ListStore::from_values([Value::from(10), Value::from(20)]);
        let scope = scope_with(vec![
            ("obj", Value::Map(nested)),
            ("items", Value::List(list)),
        ]);
        assert_eq!(eval_src("obj.b", &scope), Value::from(7));
        assert_eq!(eval_src("items[1]", &scope), Value::from(20));
        assert_eq!(eval_src("items.length", &scope), Value::from(2));
        assert_eq!(eval_src("missing?.x", &scope), Value::Null);
    }

    #[test]
    fn test_signal_unwrap_through_ctx() {
        reset_reactivity();
        let scope = scope_with(vec![("count", Value::Signal(Signal::new(Value::from(4))))]);
        assert_eq!(eval_src("count + 1", &scope), Value::from(5));
    }

    #[test]
    fn test_assignment_writes_through_ctx() {
        reset_reactivity();
        let count = Signal::new(Value::from(0));
        let scope = scope_with(vec![("count", Value::Signal(count.clone()))]);
        eval_src("count++", &scope);
        assert_eq!(count.peek(), Value::from(1));
        eval_src("count = 10", &scope);
        assert_eq!(count.peek(), Value::from(10));
    }

    #[test]
    fn test_conditional_and_logic() {
        reset_reactivity();
        let scope = scope_with(vec![("ok", Value::Bool(true))]);
        assert_eq!(eval_src("ok ? 'y' : 'n'", &scope), Value::from("y"));
        assert_eq!(eval_src("!ok", &scope), Value::Bool(false));
        assert_eq!(eval_src("false || 'fallback'", &scope), Value::from("fallback"));
        assert_eq!(eval_src("null ?? 'dflt'", &scope), Value::from("dflt"));
    }

    #[test]
    fn test_arrow_and_call() {
        reset_reactivity();
        let scope = scope_with(vec![]);
        let double = eval_src("x => x * 2", &scope);
        let Value::Function(f) = double else { panic!("expected function") };
        assert_eq!(f.call(&[Value::from(21)]), Value::from(42));
    }

    #[test]
    fn test_math_builtin() {
        reset_reactivity();
        let scope = scope_with(vec![]);
        assert_eq!(eval_src("Math.max(1, 5, 3)", &scope), Value::from(5));
        assert_eq!(eval_src("Math.floor(1.9)", &scope), Value::from(1));
    }

    #[test]
    fn test_with_modifiers_key_guard() {
        reset_reactivity();
        use std::cell::Cell;
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        let handler = Value::Function(NativeFn::handler(move |_| f.set(f.get() + 1)));
        let guarded = with_modifiers(handler, vec!["enter".to_string()]);

        let event = Store::new();
        event.set("key", Value::from("a"));
        guarded.call(&[Value::Map(event.clone())]);
        assert_eq!(fired.get(), 0);

        event.set("key", Value::from("Enter"));
        guarded.call(&[Value::Map(event)]);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_render_program_counter() {
        reset_reactivity();
        let def = ComponentDef::named("Counter")
            .with_template("<p>{{ count + 1 }}</p>")
            .build();
        let instance = Instance::new(def.clone(), None, AppContext::new());
        let state = Store::new();
        state.set("count", Value::Signal(Signal::new(Value::from(0))));
        instance.set_setup_state(state);
        *instance.inner().render_fn.borrow_mut() = def.resolve_render();

        let root = render_component_root(&instance);
        let data = root.borrow();
        assert!(matches!(&data.kind, VNodeType::Element(t) if &**t == "p"));
        assert!(matches!(&data.children, Children::Text(t) if t == "1"));
        assert!(data.patch_flag.contains(PatchFlags::TEXT));
    }

    #[test]
    fn test_block_collects_dynamic_descendants() {
        reset_reactivity();
        let def = ComponentDef::named("X")
            .with_template(r#"<div><p>static</p><p :class="c">{{ t }}</p></div>"#)
            .build();
        let instance = Instance::new(def.clone(), None, AppContext::new());
        let state = Store::new();
        state.set("c", Value::from("on"));
        state.set("t", Value::from("text"));
        instance.set_setup_state(state);
        *instance.inner().render_fn.borrow_mut() = def.resolve_render();

        let root = render_component_root(&instance);
        let data = root.borrow();
        let dynamic = data.dynamic_children.as_ref().expect("root block");
        // Only the dynamic <p> is collected; the static (hoisted) one is
        // skipped.
        assert_eq!(dynamic.len(), 1);
    }

    #[test]
    fn test_hoisted_nodes_keep_identity_across_renders() {
        reset_reactivity();
        let def = ComponentDef::named("X")
            .with_template(r#"<div><p>static</p><span>{{ t }}</span></div>"#)
            .build();
        let instance = Instance::new(def.clone(), None, AppContext::new());
        let state = Store::new();
        state.set("t", Value::from("a"));
        instance.set_setup_state(state);
        *instance.inner().render_fn.borrow_mut() = def.resolve_render();

        let first = render_component_root(&instance);
        let second = render_component_root(&instance);
        let get_first_child = |node: &VNode| match &node.borrow().children {
            Children::Nodes(children) => children[0].clone(),
            _ => panic!("expected children"),
        };
        assert!(get_first_child(&first).ptr_eq(&get_first_child(&second)));
    }

    #[test]
    fn test_render_list_expansion() {
        reset_reactivity();
        let def = ComponentDef::named("X")
            .with_template(r#"<ul><li v-for="(item, i) in items" :key="item">{{ i }}:{{ item }}</li></ul>"#)
            .build();
        let instance = Instance::new(def.clone(), None, AppContext::new());
        let state = Store::new();
        state.set(
            "items",
            Value::List(crate::reactivity::ListStore::from_values([
                Value::from("a"),
                Value::from("b"),
            ])),
        );
        instance.set_setup_state(state);
        *instance.inner().render_fn.borrow_mut() = def.resolve_render();

        let root = render_component_root(&instance);
        let data = root.borrow();
        let Children::Nodes(children) = &data.children else { panic!("expected ul children") };
        let fragment = &children[0];
        let fragment_data = fragment.borrow();
        let Children::Nodes(items) = &fragment_data.children else { panic!("expected items") };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key(), Some(Value::from("a")));
        let item = items[1].borrow();
        assert!(matches!(&item.children, Children::Text(t) if t == "1:b"));
    }
}
