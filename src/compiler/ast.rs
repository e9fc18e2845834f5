//! Template AST.
//!
//! Produced by the parser, rewritten in place by the transform pipeline
//! (structural directives replace element nodes with `If` / `For` nodes),
//! and annotated with codegen output consumed by the generator.

use serde::{Deserialize, Serialize};

use super::expr::Expr;
use crate::program::{HoistEntry, IrNode};

/// Position within the template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Byte offset from the start of the template.
    pub offset: usize,
    /// 1-indexed.
    pub line: usize,
    /// 1-indexed.
    pub column: usize,
}

impl Position {
    pub const fn start() -> Self {
        Self { offset: 0, line: 1, column: 1 }
    }
}

/// Half-open source range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start: Position,
    pub end: Position,
}

impl SourceLocation {
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Stub location for generated nodes.
    pub const fn stub() -> Self {
        Self { start: Position::start(), end: Position::start() }
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::stub()
    }
}

/// Element classification, decided at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ElementType {
    #[default]
    Plain,
    Component,
    Slot,
    Template,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Namespace {
    #[default]
    Html,
    Svg,
    MathMl,
}

/// How constant a subtree is, for hoisting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ConstantType {
    #[default]
    NotConstant,
    CanSkipPatch,
    CanCache,
    CanStringify,
}

/// An embedded expression, raw and (after transform) parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleExpr {
    pub content: String,
    pub is_static: bool,
    pub constant: ConstantType,
    /// Parsed and scope-rewritten form; filled by the expression
    /// transform.
    pub ast: Option<Expr>,
    pub loc: SourceLocation,
}

impl SimpleExpr {
    pub fn new(content: impl Into<String>, loc: SourceLocation) -> Self {
        Self {
            content: content.into(),
            is_static: false,
            constant: ConstantType::NotConstant,
            ast: None,
            loc,
        }
    }

    pub fn stat(content: impl Into<String>, loc: SourceLocation) -> Self {
        Self {
            content: content.into(),
            is_static: true,
            constant: ConstantType::CanStringify,
            ast: None,
            loc,
        }
    }
}

/// A plain attribute (`class="app"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticAttr {
    pub name: String,
    pub value: Option<String>,
    pub loc: SourceLocation,
}

/// A directive attribute (`v-bind:`, `:`, `@`, `#`, `v-if`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveNode {
    /// Canonical name without the `v-` prefix: `bind`, `on`, `if`, `for`,
    /// `slot`, `model`, `show`, `once`, `pre`, ...
    pub name: String,
    /// Static or dynamic (`[expr]`) argument.
    pub arg: Option<SimpleExpr>,
    pub exp: Option<SimpleExpr>,
    pub modifiers: Vec<String>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrOrDirective {
    Attr(StaticAttr),
    Directive(DirectiveNode),
}

impl AttrOrDirective {
    pub fn name(&self) -> &str {
        match self {
            AttrOrDirective::Attr(a) => &a.name,
            AttrOrDirective::Directive(d) => &d.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    pub tag_type: ElementType,
    pub ns: Namespace,
    pub self_closing: bool,
    pub props: Vec<AttrOrDirective>,
    pub children: Vec<TemplateNode>,
    pub loc: SourceLocation,
    #[serde(skip)]
    pub codegen: Option<IrNode>,
}

impl ElementNode {
    pub fn find_directive(&self, name: &str) -> Option<&DirectiveNode> {
        self.props.iter().find_map(|p| match p {
            AttrOrDirective::Directive(d) if d.name == name => Some(d),
            _ => None,
        })
    }

    pub fn find_attr(&self, name: &str) -> Option<&StaticAttr> {
        self.props.iter().find_map(|p| match p {
            AttrOrDirective::Attr(a) if a.name == name => Some(a),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub content: String,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNode {
    pub content: String,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpolationNode {
    pub content: SimpleExpr,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBranch {
    /// `None` for the `v-else` branch.
    pub condition: Option<SimpleExpr>,
    pub children: Vec<TemplateNode>,
    pub loc: SourceLocation,
}

/// A fused `v-if` / `v-else-if` / `v-else` chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfNode {
    pub branches: Vec<IfBranch>,
    pub loc: SourceLocation,
    #[serde(skip)]
    pub codegen: Option<IrNode>,
}

/// A `v-for` iteration wrapping its source element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForNode {
    pub source: SimpleExpr,
    pub value_alias: Option<String>,
    pub key_alias: Option<String>,
    pub index_alias: Option<String>,
    pub children: Vec<TemplateNode>,
    pub loc: SourceLocation,
    #[serde(skip)]
    pub codegen: Option<IrNode>,
}

/// A merged run of text and interpolations, produced by the text
/// transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundTextNode {
    pub parts: Vec<TextLikePart>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextLikePart {
    Static(String),
    Expr(SimpleExpr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateNode {
    Element(ElementNode),
    Text(TextNode),
    Comment(CommentNode),
    Interpolation(InterpolationNode),
    If(IfNode),
    For(ForNode),
    CompoundText(CompoundTextNode),
}

impl TemplateNode {
    pub fn loc(&self) -> SourceLocation {
        match self {
            TemplateNode::Element(n) => n.loc,
            TemplateNode::Text(n) => n.loc,
            TemplateNode::Comment(n) => n.loc,
            TemplateNode::Interpolation(n) => n.loc,
            TemplateNode::If(n) => n.loc,
            TemplateNode::For(n) => n.loc,
            TemplateNode::CompoundText(n) => n.loc,
        }
    }
}

/// The parse/transform root.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RootNode {
    pub children: Vec<TemplateNode>,
    pub loc: SourceLocation,
    /// Filled by the transform pipeline.
    pub components: Vec<String>,
    pub directives: Vec<String>,
    #[serde(skip)]
    pub hoists: Vec<HoistEntry>,
    pub cache_slots: usize,
    #[serde(skip)]
    pub codegen: Option<IrNode>,
}

/// Strip source locations (and transform annotations) for structural
/// comparison: two parses of the same template are equal up to location
/// metadata.
pub fn strip_locations(nodes: &mut Vec<TemplateNode>) {
    for node in nodes {
        match node {
            TemplateNode::Element(el) => {
                el.loc = SourceLocation::stub();
                for prop in &mut el.props {
                    match prop {
                        AttrOrDirective::Attr(a) => a.loc = SourceLocation::stub(),
                        AttrOrDirective::Directive(d) => {
                            d.loc = SourceLocation::stub();
                            if let Some(arg) = &mut d.arg {
                                arg.loc = SourceLocation::stub();
                            }
                            if let Some(exp) = &mut d.exp {
                                exp.loc = SourceLocation::stub();
                            }
                        }
                    }
                }
                strip_locations(&mut el.children);
            }
            TemplateNode::Text(t) => t.loc = SourceLocation::stub(),
            TemplateNode::Comment(c) => c.loc = SourceLocation::stub(),
            TemplateNode::Interpolation(i) => {
                i.loc = SourceLocation::stub();
                i.content.loc = SourceLocation::stub();
            }
            TemplateNode::If(n) => {
                n.loc = SourceLocation::stub();
                for branch in &mut n.branches {
                    branch.loc = SourceLocation::stub();
                    if let Some(cond) = &mut branch.condition {
                        cond.loc = SourceLocation::stub();
                    }
                    strip_locations(&mut branch.children);
                }
            }
            TemplateNode::For(n) => {
                n.loc = SourceLocation::stub();
                n.source.loc = SourceLocation::stub();
                strip_locations(&mut n.children);
            }
            TemplateNode::CompoundText(n) => {
                n.loc = SourceLocation::stub();
                for part in &mut n.parts {
                    if let TextLikePart::Expr(e) = part {
                        e.loc = SourceLocation::stub();
                    }
                }
            }
        }
    }
}
