//! Virtual node model.
//!
//! VNodes are `Rc`-backed handles: the reconciler mutates them in place
//! (host element backpointers, component instances) and a block's
//! `dynamic_children` holds references to descendants of `children` — a
//! view, not a separate tree.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use indexmap::IndexMap;
use tracing::warn;

use crate::component::{ComponentDef, Directive};
use crate::host::HostId;
use crate::reactivity::Signal;
use crate::value::{NativeFn, Value};

bitflags! {
    /// Compile-time bitset naming *what* about a node may have changed
    /// since the previous render of the same source position.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PatchFlags: u32 {
        /// Dynamic text content.
        const TEXT = 1;
        /// Dynamic `class` binding.
        const CLASS = 1 << 1;
        /// Dynamic `style` binding.
        const STYLE = 1 << 2;
        /// Dynamic non-class/style props; see `dynamic_props`.
        const PROPS = 1 << 3;
        /// Dynamic prop *keys*: fall back to a full props diff.
        const FULL_PROPS = 1 << 4;
        /// Event listeners needing attach during hydration.
        const HYDRATE_EVENTS = 1 << 5;
        /// Fragment whose children order never changes.
        const STABLE_FRAGMENT = 1 << 6;
        /// Fragment with keyed or partially keyed children.
        const KEYED_FRAGMENT = 1 << 7;
        /// Fragment with unkeyed children.
        const UNKEYED_FRAGMENT = 1 << 8;
        /// Only needs non-props patching (ref or directives).
        const NEED_PATCH = 1 << 9;
        /// Component with dynamic slot content.
        const DYNAMIC_SLOTS = 1 << 10;
        /// Hoisted static node: skip entirely.
        const HOISTED = 1 << 14;
        /// Diff optimization bail-out: full diff required.
        const BAIL = 1 << 15;
    }
}

impl PatchFlags {
    /// True when a targeted fast-path update is legal.
    pub fn has_fast_path(self) -> bool {
        !self.is_empty() && !self.intersects(Self::HOISTED | Self::BAIL)
    }
}

bitflags! {
    /// Classifies a node's kind and the shape of its children.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ShapeFlags: u32 {
        const ELEMENT = 1;
        const FUNCTIONAL_COMPONENT = 1 << 1;
        const STATEFUL_COMPONENT = 1 << 2;
        const TEXT_CHILDREN = 1 << 3;
        const ARRAY_CHILDREN = 1 << 4;
        const SLOTS_CHILDREN = 1 << 5;
        const TELEPORT = 1 << 6;
        const SUSPENSE = 1 << 7;
        const COMPONENT_SHOULD_KEEP_ALIVE = 1 << 8;
        const COMPONENT_KEPT_ALIVE = 1 << 9;
    }
}

impl ShapeFlags {
    pub const COMPONENT: ShapeFlags =
        Self::FUNCTIONAL_COMPONENT.union(Self::STATEFUL_COMPONENT);
}

/// The variant tag plus payload.
#[derive(Clone)]
pub enum VNodeType {
    Element(Rc<str>),
    Text,
    Comment,
    /// Opaque pre-rendered content.
    Static(Rc<str>),
    Fragment,
    Component(Rc<ComponentDef>),
    Teleport,
    Suspense,
}

impl VNodeType {
    fn same_type(&self, other: &VNodeType) -> bool {
        match (self, other) {
            (VNodeType::Element(a), VNodeType::Element(b)) => a == b,
            (VNodeType::Text, VNodeType::Text) => true,
            (VNodeType::Comment, VNodeType::Comment) => true,
            (VNodeType::Static(a), VNodeType::Static(b)) => a == b,
            (VNodeType::Fragment, VNodeType::Fragment) => true,
            (VNodeType::Component(a), VNodeType::Component(b)) => Rc::ptr_eq(a, b),
            (VNodeType::Teleport, VNodeType::Teleport) => true,
            (VNodeType::Suspense, VNodeType::Suspense) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for VNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VNodeType::Element(tag) => write!(f, "Element({tag})"),
            VNodeType::Text => write!(f, "Text"),
            VNodeType::Comment => write!(f, "Comment"),
            VNodeType::Static(_) => write!(f, "Static"),
            VNodeType::Fragment => write!(f, "Fragment"),
            VNodeType::Component(def) => {
                write!(f, "Component({})", def.name.as_deref().unwrap_or("anonymous"))
            }
            VNodeType::Teleport => write!(f, "Teleport"),
            VNodeType::Suspense => write!(f, "Suspense"),
        }
    }
}

/// Identity binding resolved after mount/update.
#[derive(Clone)]
pub enum RefBinding {
    /// Stored on the owner instance's refs map under this name.
    Named(String),
    /// Receives the host node id (or `Null` on unmount).
    Cell(Signal<Value>),
    /// Invoked with the host node id.
    Func(NativeFn),
}

/// A named slot: a function from slot props to children.
pub type SlotFn = Rc<dyn Fn(&Value) -> Vec<VNode>>;

#[derive(Clone, Default)]
pub struct Slots {
    pub entries: IndexMap<String, SlotFn>,
    /// Slots built from conditional/iterated sources; forces dynamic-slot
    /// updates on the child.
    pub dynamic: bool,
}

impl Slots {
    pub fn get(&self, name: &str) -> Option<&SlotFn> {
        self.entries.get(name)
    }

    pub fn single_default(children: Vec<VNode>) -> Slots {
        let mut entries: IndexMap<String, SlotFn> = IndexMap::new();
        entries.insert(
            "default".to_string(),
            Rc::new(move |_| children.iter().map(VNode::clone_vnode).collect()),
        );
        Slots { entries, dynamic: false }
    }
}

/// Children payload, discriminated by shape flags.
#[derive(Clone, Default)]
pub enum Children {
    #[default]
    None,
    Text(String),
    Nodes(Vec<VNode>),
    Slots(Slots),
}

/// Which runtime directive a vnode retains.
#[derive(Clone)]
pub enum DirectiveKind {
    /// Built-in `v-show`: display toggling applied by the renderer.
    Show,
    Custom(Rc<Directive>),
}

/// A runtime directive application retained on the vnode.
#[derive(Clone)]
pub struct DirectiveUse {
    pub kind: DirectiveKind,
    pub value: Value,
    pub old_value: RefCell<Value>,
    pub arg: Option<String>,
    pub modifiers: Vec<String>,
}

pub struct VNodeData {
    pub kind: VNodeType,
    pub key: Option<Value>,
    pub ref_binding: Option<RefBinding>,
    pub props: Option<IndexMap<String, Value>>,
    pub children: Children,
    pub shape_flag: ShapeFlags,
    pub patch_flag: PatchFlags,
    pub dynamic_props: Option<Vec<String>>,
    /// The block: dynamic descendants captured at render time. When
    /// present, the reconciler diffs only these.
    pub dynamic_children: Option<Vec<VNode>>,
    pub directives: Vec<DirectiveUse>,
    /// Host node after mount.
    pub el: Option<HostId>,
    /// Fragment end boundary marker.
    pub anchor: Option<HostId>,
    /// Teleport target container.
    pub target: Option<HostId>,
    /// Suspense boundary owned by this vnode.
    pub boundary: Option<crate::renderer::SuspenseBoundary>,
    /// Component instance handle (opaque to this module).
    pub instance: Option<crate::component::Instance>,
}

/// A virtual node handle. Cloning shares the node; a fresh tree position
/// needs [`VNode::clone_vnode`].
#[derive(Clone)]
pub struct VNode {
    data: Rc<RefCell<VNodeData>>,
}

impl VNode {
    pub fn new(kind: VNodeType, props: Option<IndexMap<String, Value>>, children: Children) -> Self {
        let mut shape_flag = match &kind {
            VNodeType::Element(_) => ShapeFlags::ELEMENT,
            VNodeType::Component(def) => {
                if def.is_functional() {
                    ShapeFlags::FUNCTIONAL_COMPONENT
                } else {
                    ShapeFlags::STATEFUL_COMPONENT
                }
            }
            VNodeType::Teleport => ShapeFlags::TELEPORT,
            VNodeType::Suspense => ShapeFlags::SUSPENSE,
            _ => ShapeFlags::empty(),
        };
        shape_flag |= match &children {
            Children::None => ShapeFlags::empty(),
            Children::Text(_) => ShapeFlags::TEXT_CHILDREN,
            Children::Nodes(_) => ShapeFlags::ARRAY_CHILDREN,
            Children::Slots(_) => ShapeFlags::SLOTS_CHILDREN,
        };

        let mut key = None;
        let mut ref_binding = None;
        if let Some(props) = &props {
            key = props.get("key").filter(|v| !v.is_null()).cloned();
            ref_binding = match props.get("ref") {
                Some(Value::Str(name)) => Some(RefBinding::Named(name.to_string())),
                Some(Value::Signal(cell)) => Some(RefBinding::Cell(cell.clone())),
                Some(Value::Function(f)) => Some(RefBinding::Func(f.clone())),
                _ => None,
            };
        }

        Self {
            data: Rc::new(RefCell::new(VNodeData {
                kind,
                key,
                ref_binding,
                props,
                children,
                shape_flag,
                patch_flag: PatchFlags::empty(),
                dynamic_props: None,
                dynamic_children: None,
                directives: Vec::new(),
                el: None,
                anchor: None,
                target: None,
                boundary: None,
                instance: None,
            })),
        }
    }

    pub fn element(tag: &str, props: Option<IndexMap<String, Value>>, children: Children) -> Self {
        Self::new(VNodeType::Element(Rc::from(tag)), props, children)
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(VNodeType::Text, None, Children::Text(content.into()))
    }

    pub fn comment(content: impl Into<String>) -> Self {
        Self::new(VNodeType::Comment, None, Children::Text(content.into()))
    }

    pub fn fragment(children: Vec<VNode>) -> Self {
        Self::new(VNodeType::Fragment, None, Children::Nodes(children))
    }

    pub fn component(
        def: Rc<ComponentDef>,
        props: Option<IndexMap<String, Value>>,
        slots: Option<Slots>,
    ) -> Self {
        let children = match slots {
            Some(slots) => Children::Slots(slots),
            None => Children::None,
        };
        Self::new(VNodeType::Component(def), props, children)
    }

    pub fn with_patch_flag(self, flag: PatchFlags) -> Self {
        self.data.borrow_mut().patch_flag = flag;
        self
    }

    pub fn with_dynamic_props(self, names: Vec<String>) -> Self {
        self.data.borrow_mut().dynamic_props = Some(names);
        self
    }

    pub fn with_key(self, key: Value) -> Self {
        self.data.borrow_mut().key = Some(key);
        self
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, VNodeData> {
        self.data.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, VNodeData> {
        self.data.borrow_mut()
    }

    /// Handle identity.
    pub fn ptr_eq(&self, other: &VNode) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    pub fn key(&self) -> Option<Value> {
        self.data.borrow().key.clone()
    }

    pub fn el(&self) -> Option<HostId> {
        self.data.borrow().el
    }

    pub fn patch_flag(&self) -> PatchFlags {
        self.data.borrow().patch_flag
    }

    pub fn shape_flag(&self) -> ShapeFlags {
        self.data.borrow().shape_flag
    }

    /// Same type payload and same key: the pair is patchable in place.
    pub fn same_vnode_type(&self, other: &VNode) -> bool {
        let (a, b) = (self.data.borrow(), other.data.borrow());
        a.kind.same_type(&b.kind)
            && match (&a.key, &b.key) {
                (None, None) => true,
                (Some(x), Some(y)) => x.loose_eq(y),
                _ => false,
            }
    }

    /// Deep copy for a fresh tree position. Host backpointers, instance
    /// links, and the block view are not carried over.
    pub fn clone_vnode(&self) -> VNode {
        let data = self.data.borrow();
        let children = match &data.children {
            Children::None => Children::None,
            Children::Text(t) => Children::Text(t.clone()),
            Children::Nodes(nodes) => {
                Children::Nodes(nodes.iter().map(VNode::clone_vnode).collect())
            }
            Children::Slots(slots) => Children::Slots(slots.clone()),
        };
        VNode {
            data: Rc::new(RefCell::new(VNodeData {
                kind: data.kind.clone(),
                key: data.key.clone(),
                ref_binding: data.ref_binding.clone(),
                props: data.props.clone(),
                children,
                shape_flag: data.shape_flag,
                patch_flag: data.patch_flag,
                dynamic_props: data.dynamic_props.clone(),
                dynamic_children: None,
                directives: data.directives.clone(),
                el: None,
                anchor: None,
                target: None,
                boundary: None,
                instance: None,
            })),
        }
    }

    /// A vnode is mounted at most once; remounting requires a fresh copy.
    /// Returns `self` untouched when unmounted, else a clone plus a
    /// diagnostic.
    pub fn for_mount(&self) -> VNode {
        if self.data.borrow().el.is_some() {
            warn!(node = ?self.data.borrow().kind, "mounting an already-mounted vnode; cloning");
            self.clone_vnode()
        } else {
            self.clone()
        }
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("VNode")
            .field("kind", &data.kind)
            .field("key", &data.key)
            .field("patch_flag", &data.patch_flag)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_flags_from_children() {
        let el = VNode::element("div", None, Children::Text("x".into()));
        assert!(el.shape_flag().contains(ShapeFlags::ELEMENT | ShapeFlags::TEXT_CHILDREN));

        let el = VNode::element("div", None, Children::Nodes(vec![VNode::text("x")]));
        assert!(el.shape_flag().contains(ShapeFlags::ARRAY_CHILDREN));
    }

    #[test]
    fn test_key_extracted_from_props() {
        let mut props = IndexMap::new();
        props.insert("key".to_string(), Value::from("a"));
        let node = VNode::element("li", Some(props), Children::None);
        assert_eq!(node.key(), Some(Value::from("a")));
    }

    #[test]
    fn test_same_vnode_type() {
        let a = VNode::element("div", None, Children::None);
        let b = VNode::element("div", None, Children::None);
        let c = VNode::element("span", None, Children::None);
        assert!(a.same_vnode_type(&b));
        assert!(!a.same_vnode_type(&c));

        let ka = VNode::element("li", None, Children::None).with_key(Value::from(1));
        let kb = VNode::element("li", None, Children::None).with_key(Value::from(2));
        assert!(!ka.same_vnode_type(&kb));
    }

    #[test]
    fn test_clone_vnode_clears_mount_state() {
        let node = VNode::element("div", None, Children::Nodes(vec![VNode::text("x")]));
        node.borrow_mut().el = Some(HostId(3));
        let copy = node.clone_vnode();
        assert!(copy.el().is_none());
        assert!(!copy.ptr_eq(&node));
    }

    #[test]
    fn test_patch_flag_fast_path() {
        assert!(PatchFlags::TEXT.has_fast_path());
        assert!(!PatchFlags::HOISTED.has_fast_path());
        assert!(!(PatchFlags::TEXT | PatchFlags::BAIL).has_fast_path());
        assert!(!PatchFlags::empty().has_fast_path());
    }
}
