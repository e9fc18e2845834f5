//! Portable render program.
//!
//! The compiler's output: a hoist table, an asset-resolution prelude, and
//! a render expression tree over a fixed operator set. The structure is
//! plain data (serde-serializable), so a build step can compile templates
//! ahead of time and ship programs instead of template source.

use serde::{Deserialize, Serialize};

use crate::compiler::expr::Expr;

/// One slot of the hoist table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HoistEntry {
    /// A fully static subtree.
    Node(IrNode),
    /// A static props object of an otherwise dynamic node.
    Props(Vec<PropIr>),
}

/// The complete output for one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderProgram {
    /// Positionally indexed static subtrees and props objects;
    /// constructed once per program.
    pub hoists: Vec<HoistEntry>,
    /// User component names to resolve from the app/component context.
    pub components: Vec<String>,
    /// User directive names to resolve the same way.
    pub directives: Vec<String>,
    /// Number of instance-owned cache slots (`v-once`).
    pub cache_slots: usize,
    /// The root expression; produces the root vnode.
    pub body: IrNode,
}

/// A name that is either static or computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NameSource {
    Static(String),
    Dynamic(Expr),
}

/// One piece of a text run: adjacent static text and interpolations are
/// merged into a single node with ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextPart {
    Static(String),
    Expr(Expr),
}

/// What a vnode call's tag resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrTag {
    Element(String),
    Fragment,
    /// Resolved from the asset prelude at render time.
    Component(String),
    /// `<component :is="...">`.
    DynamicComponent(Expr),
    Teleport,
    Suspense,
    KeepAlive,
}

/// A single props entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropIr {
    pub key: NameSource,
    pub value: Expr,
}

/// One argument to a runtime props merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropsMergeArg {
    Object(Vec<PropIr>),
    /// `v-bind="obj"`: spread into the props object.
    Spread(Expr),
    /// `v-on="obj"`: each entry becomes an `onX` handler.
    Handlers(Expr),
}

/// The props expression of a vnode call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropsIr {
    Object(Vec<PropIr>),
    Merge(Vec<PropsMergeArg>),
    /// Reference to a hoisted static props object.
    Hoisted(usize),
}

/// A runtime directive retained on the vnode (`withDirectives`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectiveCallIr {
    pub name: String,
    pub value: Option<Expr>,
    pub arg: Option<NameSource>,
    pub modifiers: Vec<String>,
}

/// One compiled slot function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEntryIr {
    pub name: NameSource,
    /// Slot-prop parameter name (`v-slot="slotProps"`).
    pub param: Option<String>,
    /// Conditional slot (`<template v-if v-slot>`): the entry exists only
    /// when the condition holds.
    pub condition: Option<Expr>,
    pub body: Vec<IrNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotsIr {
    pub entries: Vec<SlotEntryIr>,
    /// Conditional or iterated slots: disables stable-slot fast paths.
    pub dynamic: bool,
}

/// Children of a vnode call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum IrChildren {
    #[default]
    None,
    /// Single text child (static, or `TEXT`-flagged when any part is
    /// dynamic); written through `set_element_text` at runtime.
    Text(Vec<TextPart>),
    Nodes(Vec<IrNode>),
    Slots(SlotsIr),
}

/// A `createVNode` / `createBlock` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VNodeCall {
    pub tag: IrTag,
    pub props: Option<PropsIr>,
    pub children: IrChildren,
    /// `PatchFlags` bits.
    pub patch_flag: u32,
    pub dynamic_props: Option<Vec<String>>,
    pub directives: Vec<DirectiveCallIr>,
    /// Emits an `openBlock(); createBlock(...)` pair.
    pub is_block: bool,
    pub is_for_block: bool,
}

/// The render operator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrNode {
    VNode(Box<VNodeCall>),
    /// Reference into the hoist table.
    Hoisted(usize),
    /// `createTextVNode(...)`.
    Text {
        parts: Vec<TextPart>,
        /// True when any part is dynamic (`TEXT` patch flag).
        dynamic: bool,
    },
    /// `createCommentVNode(...)`; also the placeholder for an absent
    /// `v-else` branch.
    Comment(String),
    /// `renderSlot(slots, name, props, fallback)`.
    RenderSlot {
        name: NameSource,
        props: Vec<PropIr>,
        fallback: Vec<IrNode>,
    },
    /// Keyed iteration: `renderList(source, (value, key, index) => ...)`.
    RenderList {
        source: Expr,
        value_alias: Option<String>,
        key_alias: Option<String>,
        index_alias: Option<String>,
        body: Box<IrNode>,
        /// Children carry keys: `KEYED_FRAGMENT` vs `UNKEYED_FRAGMENT`.
        keyed: bool,
    },
    /// `v-if` chain: nested conditional expressions.
    Conditional {
        test: Expr,
        consequent: Box<IrNode>,
        alternate: Box<IrNode>,
    },
    /// `v-once`: evaluate once per instance, then reuse the cached vnode.
    Cache {
        index: usize,
        body: Box<IrNode>,
    },
}

impl IrNode {
    pub fn vnode(call: VNodeCall) -> IrNode {
        IrNode::VNode(Box::new(call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_roundtrips_through_serde() {
        let program = RenderProgram {
            hoists: vec![HoistEntry::Node(IrNode::vnode(VNodeCall {
                tag: IrTag::Element("p".into()),
                props: None,
                children: IrChildren::Text(vec![TextPart::Static("hi".into())]),
                patch_flag: 0,
                dynamic_props: None,
                directives: vec![],
                is_block: false,
                is_for_block: false,
            }))],
            components: vec!["MyButton".into()],
            directives: vec![],
            cache_slots: 1,
            body: IrNode::Hoisted(0),
        };
        let json = serde_json::to_string(&program).unwrap();
        let back: RenderProgram = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }
}
