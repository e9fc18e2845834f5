//! Host backend interface.
//!
//! The reconciler is parametric in the tree it mutates: DOM, scene graph,
//! terminal buffer, or the in-memory [`test_host::TestHost`]. Everything
//! the renderer does to the real tree goes through this trait.

pub mod test_host;

use crate::value::Value;

/// Opaque handle to a host node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub usize);

/// Operations the renderer requires from a host tree.
pub trait HostBackend {
    /// Allocate an unattached element.
    fn create_element(&mut self, tag: &str, is_svg: bool, is_customized_builtin: bool) -> HostId;

    /// Allocate a standalone text node.
    fn create_text(&mut self, text: &str) -> HostId;

    /// Allocate a standalone comment node.
    fn create_comment(&mut self, text: &str) -> HostId;

    /// Replace the text of a text node.
    fn set_text(&mut self, node: HostId, text: &str);

    /// Replace an element's entire text content.
    fn set_element_text(&mut self, el: HostId, text: &str);

    /// Insert `node` as a child of `parent`, immediately before `anchor`
    /// if given, else append.
    fn insert(&mut self, node: HostId, parent: HostId, anchor: Option<HostId>);

    /// Detach a node from its parent.
    fn remove(&mut self, node: HostId);

    fn parent_node(&self, node: HostId) -> Option<HostId>;

    fn next_sibling(&self, node: HostId) -> Option<HostId>;

    /// Mount-time root resolution only.
    fn query_selector(&self, selector: &str) -> Option<HostId>;

    /// Stamp a scope identifier on an element.
    fn set_scope_id(&mut self, el: HostId, scope_id: &str);

    /// Apply a single prop diff: event listener attach/detach, class and
    /// style application, attribute vs property discrimination.
    fn patch_prop(
        &mut self,
        el: HostId,
        key: &str,
        prev: Option<&Value>,
        next: Option<&Value>,
        is_svg: bool,
    );

    /// Fast path for hoisted nodes. Default: no fast path.
    fn clone_node(&mut self, _node: HostId) -> Option<HostId> {
        None
    }

    /// Materialize raw static content between `anchor` and its
    /// predecessor; returns the (first, last) materialized nodes.
    fn insert_static_content(
        &mut self,
        content: &str,
        parent: HostId,
        anchor: Option<HostId>,
        is_svg: bool,
    ) -> (HostId, HostId);
}
