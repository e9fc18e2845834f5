//! Children reconciliation.
//!
//! Full children diff dispatched by shape, the unkeyed index-by-index
//! pass, and the keyed diff: prefix/suffix sync, pure add/remove, and the
//! unknown middle resolved with a longest-increasing-subsequence pass so
//! the move count is minimal.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::warn;

use super::{PatchEnv, Renderer};
use crate::host::{HostBackend, HostId};
use crate::value::Value;
use crate::vnode::{Children, PatchFlags, VNode};

impl<H: HostBackend + 'static> Renderer<H> {
    /// Full children patch, dispatched by old/new shape.
    pub(crate) fn patch_children(
        self: &Rc<Self>,
        n1: &VNode,
        n2: &VNode,
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        let old_children = n1.borrow().children.clone();
        let new_children = n2.borrow().children.clone();
        let patch_flag = n2.patch_flag();

        match (&old_children, &new_children) {
            (_, Children::Text(new_text)) => {
                if let Children::Nodes(old_nodes) = &old_children {
                    self.unmount_children(old_nodes, env);
                }
                let old_text = match &old_children {
                    Children::Text(t) => Some(t.as_str()),
                    _ => None,
                };
                if old_text != Some(new_text.as_str()) {
                    self.with_host(|h| h.set_element_text(container, new_text));
                }
            }
            (Children::Nodes(old_nodes), Children::Nodes(new_nodes)) => {
                let keyed = patch_flag.contains(PatchFlags::KEYED_FRAGMENT)
                    || (!patch_flag.contains(PatchFlags::UNKEYED_FRAGMENT)
                        && new_nodes.iter().any(|n| n.key().is_some()));
                if keyed {
                    self.patch_keyed_children(old_nodes, new_nodes, container, anchor, env);
                } else {
                    self.patch_unkeyed_children(old_nodes, new_nodes, container, anchor, env);
                }
            }
            (Children::Text(_), Children::Nodes(new_nodes)) => {
                self.with_host(|h| h.set_element_text(container, ""));
                self.mount_children(new_nodes, container, anchor, env);
            }
            (Children::Nodes(old_nodes), _) => {
                self.unmount_children(old_nodes, env);
            }
            (Children::Text(_), _) => {
                self.with_host(|h| h.set_element_text(container, ""));
            }
            _ => {}
        }
    }

    /// Patch index-by-index up to the common length, then mount or
    /// unmount the tail.
    fn patch_unkeyed_children(
        self: &Rc<Self>,
        c1: &[VNode],
        c2: &[VNode],
        container: HostId,
        anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        let common = c1.len().min(c2.len());
        for i in 0..common {
            self.patch(Some(c1[i].clone()), &c2[i], container, anchor, env);
        }
        if c1.len() > common {
            self.unmount_children(&c1[common..], env);
        }
        if c2.len() > common {
            self.mount_children(&c2[common..], container, anchor, env);
        }
    }

    /// Keyed diff. Move count is `|c2| − |LIS|` over the surviving
    /// nodes; mounts and unmounts are exactly the key-set difference.
    pub(crate) fn patch_keyed_children(
        self: &Rc<Self>,
        c1: &[VNode],
        c2: &[VNode],
        container: HostId,
        parent_anchor: Option<HostId>,
        env: &PatchEnv,
    ) {
        let mut i = 0usize;
        let mut e1 = c1.len() as isize - 1;
        let mut e2 = c2.len() as isize - 1;

        // 1. Sync prefix.
        while (i as isize) <= e1 && (i as isize) <= e2 {
            let (old, new) = (&c1[i], &c2[i]);
            if !old.same_vnode_type(new) {
                break;
            }
            self.patch(Some(old.clone()), new, container, None, env);
            i += 1;
        }

        // 2. Sync suffix.
        while (i as isize) <= e1 && (i as isize) <= e2 {
            let (old, new) = (&c1[e1 as usize], &c2[e2 as usize]);
            if !old.same_vnode_type(new) {
                break;
            }
            self.patch(Some(old.clone()), new, container, None, env);
            e1 -= 1;
            e2 -= 1;
        }

        // 3. Pure mount.
        if (i as isize) > e1 {
            if (i as isize) <= e2 {
                let next_pos = (e2 + 1) as usize;
                let anchor = if next_pos < c2.len() {
                    c2[next_pos].el()
                } else {
                    parent_anchor
                };
                for index in i..=(e2 as usize) {
                    self.patch(None, &c2[index], container, anchor, env);
                }
            }
            return;
        }

        // 4. Pure unmount.
        if (i as isize) > e2 {
            for index in i..=(e1 as usize) {
                self.unmount(&c1[index], env, true);
            }
            return;
        }

        // 5. Unknown middle.
        let s1 = i;
        let s2 = i;
        let to_be_patched = (e2 - s2 as isize + 1) as usize;

        // Key → new index; duplicates warn and last wins.
        let mut key_to_new_index: HashMap<String, usize> = HashMap::new();
        for index in s2..=(e2 as usize) {
            if let Some(key) = c2[index].key() {
                let key = key_repr(&key);
                if key_to_new_index.insert(key.clone(), index).is_some() {
                    // Warn-and-last-wins; the later entry owns the slot.
                    warn!(key = %key, "duplicate key in keyed children");
                }
            }
        }

        // 0 means "no old counterpart"; real indices are offset by one.
        let mut new_index_to_old: Vec<usize> = vec![0; to_be_patched];
        let mut moved = false;
        let mut max_new_index_so_far = 0usize;
        let mut patched = 0usize;

        for old_index in s1..=(e1 as usize) {
            let old = &c1[old_index];
            if patched >= to_be_patched {
                // Every new slot is filled; the rest of old goes away.
                self.unmount(old, env, true);
                continue;
            }
            let new_index = match old.key() {
                Some(key) => key_to_new_index.get(&key_repr(&key)).copied(),
                None => {
                    // Key-less old node: find a same-type key-less match.
                    (s2..=(e2 as usize)).find(|&j| {
                        new_index_to_old[j - s2] == 0
                            && c2[j].key().is_none()
                            && old.same_vnode_type(&c2[j])
                    })
                }
            };
            match new_index {
                None => self.unmount(old, env, true),
                Some(new_index) => {
                    new_index_to_old[new_index - s2] = old_index + 1;
                    if new_index >= max_new_index_so_far {
                        max_new_index_so_far = new_index;
                    } else {
                        moved = true;
                    }
                    self.patch(Some(old.clone()), &c2[new_index], container, None, env);
                    patched += 1;
                }
            }
        }

        // Stable positions need no move; everything else does. Reverse
        // traversal keeps the just-processed neighbor valid as anchor.
        let increasing = if moved {
            longest_increasing_subsequence(&new_index_to_old)
        } else {
            Vec::new()
        };
        let mut lis_cursor = increasing.len() as isize - 1;
        for offset in (0..to_be_patched).rev() {
            let new_index = s2 + offset;
            let next_pos = new_index + 1;
            let anchor = if next_pos < c2.len() { c2[next_pos].el() } else { parent_anchor };
            if new_index_to_old[offset] == 0 {
                self.patch(None, &c2[new_index], container, anchor, env);
            } else if moved {
                if lis_cursor < 0 || increasing[lis_cursor as usize] != offset {
                    self.move_vnode(&c2[new_index], container, anchor);
                } else {
                    lis_cursor -= 1;
                }
            }
        }
    }
}

fn key_repr(key: &Value) -> String {
    match key {
        Value::Number(n) => format!("#{n}"),
        other => other.to_display_string(),
    }
}

/// Indices of a longest strictly-increasing subsequence of `arr`,
/// ignoring zero entries (the "no old counterpart" sentinel). O(n log n)
/// patience sort with parent pointers.
pub(crate) fn longest_increasing_subsequence(arr: &[usize]) -> Vec<usize> {
    let mut parents: Vec<usize> = vec![0; arr.len()];
    // tails[k] = index into arr of the smallest tail of an increasing
    // subsequence of length k+1.
    let mut tails: Vec<usize> = Vec::new();

    for (index, &value) in arr.iter().enumerate() {
        if value == 0 {
            continue;
        }
        match tails.last() {
            Some(&last) if arr[last] < value => {
                parents[index] = last;
                tails.push(index);
                continue;
            }
            None => {
                tails.push(index);
                continue;
            }
            _ => {}
        }
        // Binary search for the first tail >= value.
        let (mut lo, mut hi) = (0usize, tails.len() - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if arr[tails[mid]] < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if value < arr[tails[lo]] {
            if lo > 0 {
                parents[index] = tails[lo - 1];
            }
            tails[lo] = index;
        }
    }

    // Reconstruct via parent pointers.
    let mut result = tails.clone();
    if let Some(&last) = tails.last() {
        let mut current = last;
        for slot in (0..tails.len()).rev() {
            result[slot] = current;
            current = parents[current];
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_increasing_subsequence() {
        // [2,1,5,3,6,4,8,9,7] → indices [1,3,5,6,7] (values 1,3,4,8,9).
        let arr = [2, 1, 5, 3, 6, 4, 8, 9, 7];
        assert_eq!(longest_increasing_subsequence(&arr), vec![1, 3, 5, 6, 7]);
    }

    #[test]
    fn test_lis_sorted_and_reversed() {
        assert_eq!(longest_increasing_subsequence(&[1, 2, 3, 4]), vec![0, 1, 2, 3]);
        let reversed = longest_increasing_subsequence(&[4, 3, 2, 1]);
        assert_eq!(reversed.len(), 1);
    }

    #[test]
    fn test_lis_ignores_zero_sentinel() {
        // Zeros mark freshly mounted nodes; they never pin positions.
        let result = longest_increasing_subsequence(&[0, 2, 0, 3]);
        assert_eq!(result, vec![1, 3]);
    }

    #[test]
    fn test_lis_middle_reorder_vector() {
        // Middle-reorder map [2,3,1] (offset old indices): C and D stay put.
        let result = longest_increasing_subsequence(&[2, 3, 1]);
        assert_eq!(result, vec![0, 1]);
    }

    #[test]
    fn test_lis_empty_and_all_zero() {
        assert!(longest_increasing_subsequence(&[]).is_empty());
        assert!(longest_increasing_subsequence(&[0, 0]).is_empty());
    }
}
