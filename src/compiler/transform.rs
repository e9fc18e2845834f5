//! AST transform pipeline.
//!
//! Two stages over the parsed tree:
//!
//! 1. a structural pass that fuses `v-if`/`v-else-if`/`v-else` sibling
//!    chains into a single conditional node and rewrites `v-for` elements
//!    into iteration nodes, and
//! 2. a depth-first walk that processes embedded expressions (with scope
//!    tracking for iteration aliases and slot props), merges text runs,
//!    and builds each node's codegen IR on the way back up — so element
//!    codegen always sees fully-transformed children.

use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexSet;

use super::ast::{
    AttrOrDirective, CompoundTextNode, DirectiveNode, ElementNode, ElementType, ForNode, IfBranch,
    IfNode, RootNode, SimpleExpr, SourceLocation, TemplateNode, TextLikePart,
};
use super::errors::{CompileError, ErrorCode};
use super::expr::{parse_expr, rewrite_free_idents, Expr};
use super::parser::OnError;
use super::transforms::element;
use crate::program::{HoistEntry, IrChildren, IrNode, IrTag, NameSource, PropIr, TextPart, VNodeCall};
use crate::vnode::PatchFlags;

/// Result of one directive transform.
pub struct DirectiveTransformResult {
    pub props: Vec<PropIr>,
    /// Retain the directive for a runtime directive call.
    pub need_runtime: bool,
}

pub type DirectiveTransform =
    Rc<dyn Fn(&DirectiveNode, &ElementNode, &mut TransformContext) -> DirectiveTransformResult>;

#[derive(Clone, Default)]
pub struct TransformOptions {
    pub on_error: Option<OnError>,
    /// Extra or overriding directive transforms, merged over the built-in
    /// table (`bind`, `on`, `model`, `show`, `text`, `html`, `cloak`).
    pub directive_transforms: HashMap<String, DirectiveTransform>,
    /// Extract fully static subtrees into the hoist table.
    pub hoist_static: bool,
}

impl TransformOptions {
    pub fn standard() -> Self {
        Self { hoist_static: true, ..Default::default() }
    }
}

pub struct TransformContext {
    pub errors: Vec<CompileError>,
    pub components: IndexSet<String>,
    pub directives: IndexSet<String>,
    pub hoists: Vec<HoistEntry>,
    pub cache_slots: usize,
    pub(crate) directive_transforms: HashMap<String, DirectiveTransform>,
    on_error: Option<OnError>,
    /// Scope-reference counts for in-scope identifiers (v-for aliases,
    /// slot props).
    identifiers: HashMap<String, usize>,
}

impl TransformContext {
    fn new(options: &TransformOptions) -> Self {
        let mut directive_transforms = super::transforms::directives::builtin_table();
        for (name, transform) in &options.directive_transforms {
            directive_transforms.insert(name.clone(), transform.clone());
        }
        Self {
            errors: Vec::new(),
            components: IndexSet::new(),
            directives: IndexSet::new(),
            hoists: Vec::new(),
            cache_slots: 0,
            directive_transforms,
            on_error: options.on_error.clone(),
            identifiers: HashMap::new(),
        }
    }

    pub fn error(&mut self, code: ErrorCode, loc: SourceLocation) {
        let err = CompileError::new(code, loc);
        if let Some(hook) = &self.on_error {
            hook(&err);
        }
        self.errors.push(err);
    }

    pub fn error_with_detail(&mut self, code: ErrorCode, loc: SourceLocation, detail: &str) {
        let err = CompileError::with_detail(code, loc, detail);
        if let Some(hook) = &self.on_error {
            hook(&err);
        }
        self.errors.push(err);
    }

    pub fn add_identifier(&mut self, name: &str) {
        *self.identifiers.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn remove_identifier(&mut self, name: &str) {
        if let Some(count) = self.identifiers.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                self.identifiers.remove(name);
            }
        }
    }

    pub fn in_scope(&self, name: &str) -> bool {
        self.identifiers.contains_key(name)
    }

    /// Parse an embedded expression and rewrite its free identifiers into
    /// render-context accesses. Malformed input is a diagnostic; the
    /// expression evaluates to null at runtime.
    pub fn process_expression(&mut self, exp: &mut SimpleExpr) {
        if exp.ast.is_some() || exp.is_static {
            return;
        }
        match parse_expr(&exp.content) {
            Ok(parsed) => {
                let scoped: Vec<String> = self.identifiers.keys().cloned().collect();
                let rewritten =
                    rewrite_free_idents(parsed, &move |name: &str| scoped.iter().any(|s| s == name));
                if rewritten.is_constant() {
                    exp.constant = super::ast::ConstantType::CanStringify;
                }
                exp.ast = Some(rewritten);
            }
            Err(err) => {
                self.error_with_detail(ErrorCode::InvalidExpression, exp.loc, &err.message);
                exp.ast = Some(Expr::Null);
            }
        }
    }

    pub fn next_cache_slot(&mut self) -> usize {
        let slot = self.cache_slots;
        self.cache_slots += 1;
        slot
    }

    pub fn hoist(&mut self, entry: HoistEntry) -> usize {
        self.hoists.push(entry);
        self.hoists.len() - 1
    }
}

/// Run the full transform over a parsed root.
pub fn transform(root: &mut RootNode, options: TransformOptions) -> Vec<CompileError> {
    let mut ctx = TransformContext::new(&options);

    structure_children(&mut root.children, &mut ctx);
    for child in &mut root.children {
        traverse_node(child, &mut ctx);
    }
    merge_text_runs(&mut root.children);

    let mut body = build_root_codegen(&root.children, &mut ctx);
    if options.hoist_static {
        super::hoist::hoist_static(&mut body, &mut ctx);
    }
    root.codegen = Some(body);

    root.components = ctx.components.iter().cloned().collect();
    root.directives = ctx.directives.iter().cloned().collect();
    root.hoists = std::mem::take(&mut ctx.hoists);
    root.cache_slots = ctx.cache_slots;
    ctx.errors
}

// =============================================================================
// Structural pass: v-if chains and v-for
// =============================================================================

fn take_directive(el: &mut ElementNode, name: &str) -> Option<DirectiveNode> {
    let index = el.props.iter().position(
        |p| matches!(p, AttrOrDirective::Directive(d) if d.name == name),
    )?;
    match el.props.remove(index) {
        AttrOrDirective::Directive(d) => Some(d),
        _ => None,
    }
}

fn structure_children(children: &mut Vec<TemplateNode>, ctx: &mut TransformContext) {
    let mut output: Vec<TemplateNode> = Vec::new();
    let input = std::mem::take(children);
    let mut iter = input.into_iter().peekable();

    while let Some(node) = iter.next() {
        match node {
            TemplateNode::Element(mut el) => {
                // v-if opens a branch chain over following siblings.
                if let Some(if_dir) = take_directive(&mut el, "if") {
                    let loc = el.loc;
                    let mut branches = vec![make_branch(el, Some(if_dir), ctx)];
                    loop {
                        // Comments between branches are dropped.
                        while matches!(iter.peek(), Some(TemplateNode::Comment(_))) {
                            iter.next();
                        }
                        let is_chain = matches!(iter.peek(), Some(TemplateNode::Element(next))
                            if next.find_directive("else-if").is_some()
                                || next.find_directive("else").is_some());
                        if !is_chain {
                            break;
                        }
                        let Some(TemplateNode::Element(mut next)) = iter.next() else { break };
                        if let Some(else_if) = take_directive(&mut next, "else-if") {
                            branches.push(make_branch(next, Some(else_if), ctx));
                        } else {
                            take_directive(&mut next, "else");
                            branches.push(make_branch(next, None, ctx));
                            break;
                        }
                    }
                    output.push(TemplateNode::If(IfNode { branches, loc, codegen: None }));
                    continue;
                }

                // Dangling v-else / v-else-if.
                if el.find_directive("else").is_some() || el.find_directive("else-if").is_some() {
                    ctx.error(ErrorCode::MisplacedVIf, el.loc);
                    continue;
                }

                if let Some(for_dir) = take_directive(&mut el, "for") {
                    let loc = el.loc;
                    if let Some(for_node) = make_for(el, for_dir, ctx, loc) {
                        output.push(TemplateNode::For(for_node));
                    }
                    continue;
                }

                structure_children(&mut el.children, ctx);
                output.push(TemplateNode::Element(el));
            }
            other => output.push(other),
        }
    }
    *children = output;
}

fn make_branch(
    mut el: ElementNode,
    condition_dir: Option<DirectiveNode>,
    ctx: &mut TransformContext,
) -> IfBranch {
    let loc = el.loc;
    let condition = match condition_dir {
        Some(dir) => match dir.exp {
            Some(exp) => Some(exp),
            None => {
                ctx.error(ErrorCode::MissingExpression, dir.loc);
                Some(SimpleExpr::new("true", dir.loc))
            }
        },
        None => None,
    };
    // v-for below v-if on the same element.
    let mut children = if let Some(for_dir) = take_directive(&mut el, "for") {
        match make_for(el, for_dir, ctx, loc) {
            Some(for_node) => vec![TemplateNode::For(for_node)],
            None => Vec::new(),
        }
    } else if el.tag_type == ElementType::Template && el.find_directive("slot").is_none() {
        // Branch templates unwrap into their children.
        el.children
    } else {
        vec![TemplateNode::Element(el)]
    };
    structure_children(&mut children, ctx);
    IfBranch { condition, children, loc }
}

fn make_for(
    mut el: ElementNode,
    dir: DirectiveNode,
    ctx: &mut TransformContext,
    loc: SourceLocation,
) -> Option<ForNode> {
    let Some(exp) = dir.exp else {
        ctx.error(ErrorCode::MissingExpression, dir.loc);
        return None;
    };
    let Some(parsed) = parse_for_expression(&exp.content) else {
        ctx.error(ErrorCode::MalformedForExpression, exp.loc);
        return None;
    };
    let (aliases, source) = parsed;
    let mut children = if el.tag_type == ElementType::Template && el.find_directive("slot").is_none()
    {
        el.children
    } else {
        vec![TemplateNode::Element(el)]
    };
    structure_children(&mut children, ctx);
    let mut alias_iter = aliases.into_iter();
    Some(ForNode {
        source: SimpleExpr::new(source, exp.loc),
        value_alias: alias_iter.next(),
        key_alias: alias_iter.next(),
        index_alias: alias_iter.next(),
        children,
        loc,
        codegen: None,
    })
}

/// Split `"(item, key, index) in source"` into aliases and source text.
fn parse_for_expression(content: &str) -> Option<(Vec<String>, String)> {
    let (lhs, rhs) = content
        .split_once(" in ")
        .or_else(|| content.split_once(" of "))?;
    let lhs = lhs.trim();
    let rhs = rhs.trim();
    if rhs.is_empty() {
        return None;
    }
    let inner = lhs.strip_prefix('(').and_then(|s| s.strip_suffix(')')).unwrap_or(lhs);
    let aliases: Vec<String> = inner
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if aliases.is_empty() || aliases.iter().any(|a| !is_simple_ident(a)) {
        return None;
    }
    Some((aliases, rhs.to_string()))
}

fn is_simple_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

// =============================================================================
// Main traversal
// =============================================================================

pub(crate) fn traverse_node(node: &mut TemplateNode, ctx: &mut TransformContext) {
    match node {
        TemplateNode::Text(_) | TemplateNode::Comment(_) | TemplateNode::CompoundText(_) => {}
        TemplateNode::Interpolation(interp) => ctx.process_expression(&mut interp.content),
        TemplateNode::If(if_node) => {
            for branch in &mut if_node.branches {
                if let Some(condition) = &mut branch.condition {
                    ctx.process_expression(condition);
                }
                for child in &mut branch.children {
                    traverse_node(child, ctx);
                }
                merge_text_runs(&mut branch.children);
            }
            if_node.codegen = Some(build_if_codegen(if_node, ctx));
        }
        TemplateNode::For(for_node) => {
            ctx.process_expression(&mut for_node.source);
            let aliases: Vec<String> = [
                for_node.value_alias.clone(),
                for_node.key_alias.clone(),
                for_node.index_alias.clone(),
            ]
            .into_iter()
            .flatten()
            .collect();
            for alias in &aliases {
                ctx.add_identifier(alias);
            }
            for child in &mut for_node.children {
                traverse_node(child, ctx);
            }
            merge_text_runs(&mut for_node.children);
            for_node.codegen = Some(build_for_codegen(for_node, ctx));
            for alias in &aliases {
                ctx.remove_identifier(alias);
            }
        }
        TemplateNode::Element(el) => {
            // Components traverse their children per slot, with slot
            // props in scope; everything else recurses here.
            if el.tag_type != ElementType::Component {
                for child in &mut el.children {
                    traverse_node(child, ctx);
                }
                merge_text_runs(&mut el.children);
            }
            let codegen = element::build_element(el, ctx);
            el.codegen = Some(codegen);
        }
    }
}

/// Merge contiguous runs of text and interpolations into a single
/// compound node. A run that is purely static text stays a text node.
pub(crate) fn merge_text_runs(children: &mut Vec<TemplateNode>) {
    let input = std::mem::take(children);
    let mut output: Vec<TemplateNode> = Vec::new();
    let mut run: Vec<TemplateNode> = Vec::new();

    fn flush(run: &mut Vec<TemplateNode>, output: &mut Vec<TemplateNode>) {
        if run.is_empty() {
            return;
        }
        let has_expr = run.iter().any(|n| matches!(n, TemplateNode::Interpolation(_)));
        if run.len() == 1 && !has_expr {
            output.push(run.pop().unwrap_or_else(|| unreachable!()));
            return;
        }
        if !has_expr {
            // Multiple static texts: concatenate.
            let loc = run[0].loc();
            let content: String = run
                .drain(..)
                .map(|n| match n {
                    TemplateNode::Text(t) => t.content,
                    _ => String::new(),
                })
                .collect();
            output.push(TemplateNode::Text(super::ast::TextNode { content, loc }));
            return;
        }
        let loc = run[0].loc();
        let parts: Vec<TextLikePart> = run
            .drain(..)
            .map(|n| match n {
                TemplateNode::Text(t) => TextLikePart::Static(t.content),
                TemplateNode::Interpolation(i) => TextLikePart::Expr(i.content),
                _ => TextLikePart::Static(String::new()),
            })
            .collect();
        output.push(TemplateNode::CompoundText(CompoundTextNode { parts, loc }));
    }

    for node in input {
        match node {
            TemplateNode::Text(_) | TemplateNode::Interpolation(_) => run.push(node),
            other => {
                flush(&mut run, &mut output);
                output.push(other);
            }
        }
    }
    flush(&mut run, &mut output);
    *children = output;
}

// =============================================================================
// Codegen glue shared by node kinds
// =============================================================================

/// The IR for one already-transformed child.
pub(crate) fn child_codegen(node: &TemplateNode) -> IrNode {
    match node {
        TemplateNode::Element(el) => el.codegen.clone().unwrap_or(IrNode::Comment(String::new())),
        TemplateNode::If(n) => n.codegen.clone().unwrap_or(IrNode::Comment(String::new())),
        TemplateNode::For(n) => n.codegen.clone().unwrap_or(IrNode::Comment(String::new())),
        TemplateNode::Text(t) => IrNode::Text {
            parts: vec![TextPart::Static(t.content.clone())],
            dynamic: false,
        },
        TemplateNode::Interpolation(i) => IrNode::Text {
            parts: vec![TextPart::Expr(i.content.ast.clone().unwrap_or(Expr::Null))],
            dynamic: true,
        },
        TemplateNode::CompoundText(compound) => {
            let parts = compound_parts(compound);
            let dynamic = parts.iter().any(|p| matches!(p, TextPart::Expr(_)));
            IrNode::Text { parts, dynamic }
        }
        TemplateNode::Comment(c) => IrNode::Comment(c.content.clone()),
    }
}

pub(crate) fn compound_parts(compound: &CompoundTextNode) -> Vec<TextPart> {
    compound
        .parts
        .iter()
        .map(|p| match p {
            TextLikePart::Static(s) => TextPart::Static(s.clone()),
            TextLikePart::Expr(e) => TextPart::Expr(e.ast.clone().unwrap_or(Expr::Null)),
        })
        .collect()
}

fn build_if_codegen(if_node: &IfNode, _ctx: &mut TransformContext) -> IrNode {
    // Fold right-to-left; a missing else branch is a placeholder comment.
    let mut result = IrNode::Comment("v-if".to_string());
    for (index, branch) in if_node.branches.iter().enumerate().rev() {
        let consequent = build_branch_codegen(branch, index);
        result = match &branch.condition {
            Some(cond) => IrNode::Conditional {
                test: cond.ast.clone().unwrap_or(Expr::Bool(true)),
                consequent: Box::new(consequent),
                alternate: Box::new(result),
            },
            None => consequent,
        };
    }
    result
}

fn build_branch_codegen(branch: &IfBranch, index: usize) -> IrNode {
    let renderable: Vec<&TemplateNode> = branch
        .children
        .iter()
        .filter(|c| !matches!(c, TemplateNode::Comment(_)))
        .collect();
    if renderable.len() == 1 {
        if let TemplateNode::Element(_) | TemplateNode::For(_) = renderable[0] {
            let mut ir = child_codegen(renderable[0]);
            // Branch roots stay blocks and carry a branch key so switching
            // branches never patches across them.
            if let IrNode::VNode(call) = &mut ir {
                call.is_block = true;
                ensure_branch_key(call, index);
            }
            return ir;
        }
    }
    let children: Vec<IrNode> =
        branch.children.iter().map(child_codegen).collect();
    let mut call = VNodeCall {
        tag: IrTag::Fragment,
        props: None,
        children: IrChildren::Nodes(children),
        patch_flag: PatchFlags::STABLE_FRAGMENT.bits(),
        dynamic_props: None,
        directives: Vec::new(),
        is_block: true,
        is_for_block: false,
    };
    ensure_branch_key(&mut call, index);
    IrNode::vnode(call)
}

fn ir_has_key(ir: &IrNode) -> bool {
    let IrNode::VNode(call) = ir else {
        if let IrNode::Cache { body, .. } = ir {
            return ir_has_key(body);
        }
        return false;
    };
    match &call.props {
        Some(crate::program::PropsIr::Object(entries)) => entries
            .iter()
            .any(|p| matches!(&p.key, NameSource::Static(k) if k == "key")),
        Some(crate::program::PropsIr::Merge(args)) => args.iter().any(|arg| match arg {
            crate::program::PropsMergeArg::Object(entries) => entries
                .iter()
                .any(|p| matches!(&p.key, NameSource::Static(k) if k == "key")),
            _ => false,
        }),
        _ => false,
    }
}

fn ensure_branch_key(call: &mut VNodeCall, index: usize) {
    let key_prop = PropIr {
        key: NameSource::Static("key".to_string()),
        value: Expr::Number(index as f64),
    };
    match &mut call.props {
        None => call.props = Some(crate::program::PropsIr::Object(vec![key_prop])),
        Some(crate::program::PropsIr::Object(entries)) => {
            let has_key = entries
                .iter()
                .any(|p| matches!(&p.key, NameSource::Static(k) if k == "key"));
            if !has_key {
                entries.push(key_prop);
            }
        }
        Some(_) => {}
    }
}

fn build_for_codegen(for_node: &ForNode, _ctx: &mut TransformContext) -> IrNode {
    let renderable: Vec<&TemplateNode> = for_node
        .children
        .iter()
        .filter(|c| !matches!(c, TemplateNode::Comment(_)))
        .collect();
    // Children codegen is already built; a key prop there makes the
    // fragment keyed.
    let keyed = renderable.iter().any(|c| match c {
        TemplateNode::Element(el) => el.codegen.as_ref().map(ir_has_key).unwrap_or(false),
        _ => false,
    });

    let body = if renderable.len() == 1 {
        let mut ir = child_codegen(renderable[0]);
        if let IrNode::VNode(call) = &mut ir {
            call.is_block = true;
        }
        ir
    } else {
        let children: Vec<IrNode> =
            for_node.children.iter().map(|c| child_codegen(c)).collect();
        IrNode::vnode(VNodeCall {
            tag: IrTag::Fragment,
            props: None,
            children: IrChildren::Nodes(children),
            patch_flag: PatchFlags::STABLE_FRAGMENT.bits(),
            dynamic_props: None,
            directives: Vec::new(),
            is_block: true,
            is_for_block: false,
        })
    };

    let fragment_flag = if keyed {
        PatchFlags::KEYED_FRAGMENT
    } else {
        PatchFlags::UNKEYED_FRAGMENT
    };
    IrNode::vnode(VNodeCall {
        tag: IrTag::Fragment,
        props: None,
        children: IrChildren::Nodes(vec![IrNode::RenderList {
            source: for_node.source.ast.clone().unwrap_or(Expr::Null),
            value_alias: for_node.value_alias.clone(),
            key_alias: for_node.key_alias.clone(),
            index_alias: for_node.index_alias.clone(),
            body: Box::new(body),
            keyed,
        }]),
        patch_flag: fragment_flag.bits(),
        dynamic_props: None,
        directives: Vec::new(),
        is_block: true,
        is_for_block: true,
    })
}

/// Root codegen: a single element/if/for child is the root block itself;
/// anything else wraps in a stable fragment block.
fn build_root_codegen(children: &[TemplateNode], _ctx: &mut TransformContext) -> IrNode {
    let renderable: Vec<&TemplateNode> = children
        .iter()
        .filter(|c| !matches!(c, TemplateNode::Comment(_)))
        .collect();
    if renderable.len() == 1 {
        match renderable[0] {
            TemplateNode::Element(_) | TemplateNode::If(_) | TemplateNode::For(_) => {
                let mut ir = child_codegen(renderable[0]);
                if let IrNode::VNode(call) = &mut ir {
                    call.is_block = true;
                }
                return ir;
            }
            _ => {}
        }
    }
    let nodes: Vec<IrNode> = children.iter().map(|c| child_codegen(c)).collect();
    IrNode::vnode(VNodeCall {
        tag: IrTag::Fragment,
        props: None,
        children: IrChildren::Nodes(nodes),
        patch_flag: PatchFlags::STABLE_FRAGMENT.bits(),
        dynamic_props: None,
        directives: Vec::new(),
        is_block: true,
        is_for_block: false,
    })
}
