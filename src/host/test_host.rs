//! In-memory host tree.
//!
//! A slab of nodes with parent/children links, used by the test suites to
//! observe exactly what the renderer did: every structural operation is
//! counted, and the tree can be serialized for assertions.

use indexmap::IndexMap;

use super::{HostBackend, HostId};
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum TestNode {
    Element {
        tag: String,
        props: IndexMap<String, Value>,
        scope_id: Option<String>,
        is_svg: bool,
    },
    Text {
        text: String,
    },
    Comment {
        text: String,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpCounts {
    pub creates: usize,
    pub inserts: usize,
    /// Insertions of a node that was already attached somewhere.
    pub moves: usize,
    pub removes: usize,
    pub text_sets: usize,
    pub prop_patches: usize,
}

#[derive(Default)]
pub struct TestHost {
    nodes: Vec<Option<TestNode>>,
    parents: Vec<Option<HostId>>,
    children: Vec<Vec<HostId>>,
    pub ops: OpCounts,
}

impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self, node: TestNode) -> HostId {
        self.nodes.push(Some(node));
        self.parents.push(None);
        self.children.push(Vec::new());
        self.ops.creates += 1;
        HostId(self.nodes.len() - 1)
    }

    pub fn node(&self, id: HostId) -> Option<&TestNode> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    pub fn children_of(&self, id: HostId) -> &[HostId] {
        &self.children[id.0]
    }

    pub fn tag(&self, id: HostId) -> Option<&str> {
        match self.node(id)? {
            TestNode::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn prop(&self, id: HostId, key: &str) -> Option<&Value> {
        match self.node(id)? {
            TestNode::Element { props, .. } => props.get(key),
            _ => None,
        }
    }

    /// Concatenated text of the subtree (comments excluded).
    pub fn text_content(&self, id: HostId) -> String {
        match self.node(id) {
            Some(TestNode::Text { text }) => text.clone(),
            Some(TestNode::Comment { .. }) => String::new(),
            Some(TestNode::Element { .. }) => self.children[id.0]
                .iter()
                .map(|c| self.text_content(*c))
                .collect(),
            None => String::new(),
        }
    }

    /// Serialized markup, stable enough for snapshot-style assertions.
    pub fn to_markup(&self, id: HostId) -> String {
        match self.node(id) {
            Some(TestNode::Text { text }) => text.clone(),
            Some(TestNode::Comment { text }) => format!("<!--{text}-->"),
            Some(TestNode::Element { tag, props, .. }) => {
                let mut attrs = String::new();
                for (key, value) in props {
                    if matches!(value, Value::Function(_)) {
                        continue;
                    }
                    match value {
                        Value::Null | Value::Bool(false) => {}
                        Value::Bool(true) => {
                            attrs.push_str(&format!(" {key}"));
                        }
                        other => {
                            attrs.push_str(&format!(" {key}=\"{}\"", other.to_display_string()));
                        }
                    }
                }
                let inner: String =
                    self.children[id.0].iter().map(|c| self.to_markup(*c)).collect();
                format!("<{tag}{attrs}>{inner}</{tag}>")
            }
            None => String::new(),
        }
    }

    /// Invoke an event-handler prop the way a host event would.
    pub fn dispatch(&self, id: HostId, event_prop: &str, args: &[Value]) {
        if let Some(Value::Function(handler)) = self.prop(id, event_prop) {
            let handler = handler.clone();
            handler.call(args);
        }
    }

    pub fn is_detached(&self, id: HostId) -> bool {
        self.parents[id.0].is_none()
    }

    fn detach(&mut self, node: HostId) {
        if let Some(parent) = self.parents[node.0].take() {
            self.children[parent.0].retain(|c| *c != node);
        }
    }
}

impl HostBackend for TestHost {
    fn create_element(&mut self, tag: &str, is_svg: bool, _is_customized_builtin: bool) -> HostId {
        self.alloc(TestNode::Element {
            tag: tag.to_string(),
            props: IndexMap::new(),
            scope_id: None,
            is_svg,
        })
    }

    fn create_text(&mut self, text: &str) -> HostId {
        self.alloc(TestNode::Text { text: text.to_string() })
    }

    fn create_comment(&mut self, text: &str) -> HostId {
        self.alloc(TestNode::Comment { text: text.to_string() })
    }

    fn set_text(&mut self, node: HostId, text: &str) {
        self.ops.text_sets += 1;
        if let Some(TestNode::Text { text: slot }) = self.nodes[node.0].as_mut() {
            *slot = text.to_string();
        }
    }

    fn set_element_text(&mut self, el: HostId, text: &str) {
        self.ops.text_sets += 1;
        let children = std::mem::take(&mut self.children[el.0]);
        for child in children {
            self.parents[child.0] = None;
        }
        if text.is_empty() {
            return;
        }
        let text_node = self.alloc(TestNode::Text { text: text.to_string() });
        self.parents[text_node.0] = Some(el);
        self.children[el.0].push(text_node);
    }

    fn insert(&mut self, node: HostId, parent: HostId, anchor: Option<HostId>) {
        if self.parents[node.0].is_some() {
            self.ops.moves += 1;
        } else {
            self.ops.inserts += 1;
        }
        self.detach(node);
        self.parents[node.0] = Some(parent);
        match anchor.and_then(|a| self.children[parent.0].iter().position(|c| *c == a)) {
            Some(pos) => self.children[parent.0].insert(pos, node),
            None => self.children[parent.0].push(node),
        }
    }

    fn remove(&mut self, node: HostId) {
        self.ops.removes += 1;
        self.detach(node);
    }

    fn parent_node(&self, node: HostId) -> Option<HostId> {
        self.parents[node.0]
    }

    fn next_sibling(&self, node: HostId) -> Option<HostId> {
        let parent = self.parents[node.0]?;
        let siblings = &self.children[parent.0];
        let pos = siblings.iter().position(|c| *c == node)?;
        siblings.get(pos + 1).copied()
    }

    fn query_selector(&self, selector: &str) -> Option<HostId> {
        // Tag-name selectors only; enough for mount-time root resolution.
        (0..self.nodes.len())
            .map(HostId)
            .find(|id| self.tag(*id) == Some(selector))
    }

    fn set_scope_id(&mut self, el: HostId, scope_id: &str) {
        if let Some(TestNode::Element { scope_id: slot, .. }) = self.nodes[el.0].as_mut() {
            *slot = Some(scope_id.to_string());
        }
    }

    fn patch_prop(
        &mut self,
        el: HostId,
        key: &str,
        _prev: Option<&Value>,
        next: Option<&Value>,
        _is_svg: bool,
    ) {
        self.ops.prop_patches += 1;
        if let Some(TestNode::Element { props, .. }) = self.nodes[el.0].as_mut() {
            match next {
                Some(value) => {
                    props.insert(key.to_string(), value.clone());
                }
                None => {
                    props.shift_remove(key);
                }
            }
        }
    }

    fn insert_static_content(
        &mut self,
        content: &str,
        parent: HostId,
        anchor: Option<HostId>,
        _is_svg: bool,
    ) -> (HostId, HostId) {
        // Static content lands as a single opaque text node.
        let node = self.alloc(TestNode::Text { text: content.to_string() });
        self.insert(node, parent, anchor);
        (node, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_anchor() {
        let mut host = TestHost::new();
        let root = host.create_element("div", false, false);
        let a = host.create_text("a");
        let b = host.create_text("b");
        let c = host.create_text("c");
        host.insert(a, root, None);
        host.insert(c, root, None);
        host.insert(b, root, Some(c));
        assert_eq!(host.text_content(root), "abc");
    }

    #[test]
    fn test_reinsert_counts_as_move() {
        let mut host = TestHost::new();
        let root = host.create_element("div", false, false);
        let a = host.create_text("a");
        let b = host.create_text("b");
        host.insert(a, root, None);
        host.insert(b, root, None);
        assert_eq!(host.ops.moves, 0);

        host.insert(a, root, None); // move to the end
        assert_eq!(host.ops.moves, 1);
        assert_eq!(host.text_content(root), "ba");
    }

    #[test]
    fn test_markup() {
        let mut host = TestHost::new();
        let root = host.create_element("div", false, false);
        let p = host.create_element("p", false, false);
        host.patch_prop(p, "class", None, Some(&Value::from("red")), false);
        let t = host.create_text("hi");
        host.insert(t, p, None);
        host.insert(p, root, None);
        assert_eq!(host.to_markup(root), "<div><p class=\"red\">hi</p></div>");
    }

    #[test]
    fn test_set_element_text_detaches_children() {
        let mut host = TestHost::new();
        let root = host.create_element("div", false, false);
        let t = host.create_text("old");
        host.insert(t, root, None);
        host.set_element_text(root, "new");
        assert_eq!(host.text_content(root), "new");
        assert!(host.is_detached(t));
    }
}
