//! Generator.
//!
//! The last stage: collect the transform's accumulators (hoist table,
//! asset prelude, cache-slot count) and the root codegen expression into
//! the portable render program.

use super::ast::RootNode;
use crate::program::{IrChildren, IrNode, IrTag, RenderProgram, VNodeCall};
use crate::vnode::PatchFlags;

pub fn generate(root: &mut RootNode) -> RenderProgram {
    let body = root.codegen.take().unwrap_or_else(empty_body);
    RenderProgram {
        hoists: std::mem::take(&mut root.hoists),
        components: root.components.clone(),
        directives: root.directives.clone(),
        cache_slots: root.cache_slots,
        body,
    }
}

fn empty_body() -> IrNode {
    IrNode::vnode(VNodeCall {
        tag: IrTag::Fragment,
        props: None,
        children: IrChildren::None,
        patch_flag: PatchFlags::STABLE_FRAGMENT.bits(),
        dynamic_props: None,
        directives: Vec::new(),
        is_block: true,
        is_for_block: false,
    })
}
