//! Deletion: exact-pair removal, borrow/coalesce rebalancing, root collapse.
//!
//! Deletion always traverses pessimistically with [`WriteOp::Delete`], so by
//! the time the leaf is mutated the latched path covers every node a merge
//! cascade may touch. Rebalancing works strictly within one parent: the
//! partners are the deficient node's immediate neighbors among the parent's
//! children, never the leaf-chain neighbor under another parent, because the
//! parent's separator for the boundary has to be maintained alongside the
//! entry movement.
//!
//! At each deficient level the order is: borrow from the left sibling, borrow
//! from the right sibling, otherwise coalesce (into the left sibling when one
//! exists, else the right sibling into the deficient node). A borrow ends the
//! cascade; a coalesce removes a separator from the parent and may continue
//! one level up. An inner root left with a single child is replaced by that
//! child; a root leaf that drains completely is retired and the tree returns
//! to the empty state.

use seize::LocalGuard;

use crate::node::{InnerEntry, Node, NodeData, NodePtr};
use crate::ordering::KeyOrdering;
use crate::trace::smo_log;

use super::BPlusTree;
use super::traverse::{LatchedPath, WriteOp};

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F>
where
    K: Clone,
    V: Clone + Eq,
    C: KeyOrdering<K>,
{
    /// Remove the exact `(key, value)` pair. Returns `true` iff a pair was
    /// removed; the tree is untouched otherwise.
    pub fn delete(&self, key: &K, value: &V) -> bool {
        let guard = self.guard();
        let Some(mut path) = self.find_leaf_write(key, WriteOp::Delete, &guard) else {
            return false;
        };
        let leaf_ptr = path.last();
        // SAFETY: The path's leaf is exclusively latched.
        let node = unsafe { &*leaf_ptr };
        if !node.leaf().has_key_value(&self.ordering, key, value) {
            return false;
        }
        node.leaf_mut().delete_entry(&self.ordering, key, value);
        self.note_pair_removed();

        if std::ptr::eq(self.current_root(), leaf_ptr) {
            // A root leaf obeys no minimum; it only collapses when drained.
            if node.size() == 0 {
                self.swap_root(std::ptr::null_mut());
                let old_root = path.pop_detach();
                // SAFETY: We latched old_root through the path and still
                // hold it; it is now unlinked.
                unsafe { (*old_root).latch.unlock_exclusive() };
                // SAFETY: Unlinked, unlatched, never retired before.
                unsafe { self.retire_node(&guard, old_root) };
                smo_log!("tree_emptied");
            }
            return true;
        }

        if node.size() < Node::<K, V, F>::MIN_KEYS_LEAF {
            self.rebalance(&mut path, &guard);
        }
        true
    }

    /// Fix the deficient node at the end of `path`, cascading upward while
    /// coalescing keeps shrinking parents. Every node this touches is either
    /// already in the latched path or latched here under the exclusively
    /// held shared parent.
    fn rebalance(&self, path: &mut LatchedPath<K, V, F>, guard: &LocalGuard<'_>) {
        loop {
            debug_assert!(path.len() >= 2, "deficient non-root node without latched parent");
            let node_ptr = path.last();
            let parent_ptr = path.parent_of_last();
            // SAFETY: Both are exclusively latched in the path.
            let node = unsafe { &*node_ptr };
            let parent = unsafe { &*parent_ptr };

            let slot = parent
                .inner()
                .slot_of_child(node_ptr)
                .expect("deficient node is not a child of its latched parent");
            // Rebalance partners are the immediate same-parent neighbors,
            // routed by the node's first key. A deficient inner node can be
            // entirely drained at the smallest fan-outs; identity lookup
            // covers that case.
            let (left_ptr, right_ptr) = if node.size() > 0 {
                let first = node.first_key();
                debug_assert!(
                    std::ptr::eq(parent.inner().child_for(&self.ordering, first), node_ptr),
                    "separators no longer route to the deficient node"
                );
                let left = parent.inner().predecessor_of(&self.ordering, first);
                let right = parent.inner().successor_of(&self.ordering, first);
                ((!left.is_null()).then_some(left), (!right.is_null()).then_some(right))
            } else {
                let left = (slot > 0).then(|| parent.inner().child_at(slot - 1));
                let right = (slot < parent.inner().entries.len())
                    .then(|| parent.inner().child_at(slot + 1));
                (left, right)
            };

            if let Some(lp) = left_ptr {
                // SAFETY: `lp` is a child of the exclusively held parent, so
                // it stays linked while we latch it.
                let left = unsafe { &*lp };
                left.latch.lock_exclusive();
                if !left.will_underflow() {
                    // SAFETY: parent, left and node are all latched by us.
                    unsafe { Self::borrow_from_left(parent, lp, node_ptr) };
                    left.latch.unlock_exclusive();
                    smo_log!("borrow_left", leaf = node.is_leaf());
                    return;
                }
                if let Some(rp) = right_ptr {
                    // SAFETY: As for `lp`.
                    let right = unsafe { &*rp };
                    right.latch.lock_exclusive();
                    if !right.will_underflow() {
                        // SAFETY: parent, node and right are all latched.
                        unsafe { Self::borrow_from_right(parent, node_ptr, rp) };
                        right.latch.unlock_exclusive();
                        left.latch.unlock_exclusive();
                        smo_log!("borrow_right", leaf = node.is_leaf());
                        return;
                    }
                    right.latch.unlock_exclusive();
                }
                // Coalesce: node disappears into its left sibling.
                // SAFETY: parent, left and node are latched; `slot` names
                // node's separator in parent.
                unsafe { Self::merge_right_into_left(parent, slot, lp, node_ptr) };
                smo_log!("coalesce_into_left", leaf = node.is_leaf());
                let victim = path.pop_detach();
                debug_assert!(std::ptr::eq(victim, node_ptr));
                // SAFETY: Still latched from the traversal; unlinked above.
                unsafe { (*victim).latch.unlock_exclusive() };
                // SAFETY: Unlinked, unlatched, never retired before.
                unsafe { self.retire_node(guard, victim) };
                left.latch.unlock_exclusive();
            } else {
                // Leftmost child: a non-root parent always has a separator,
                // so the right sibling exists.
                let rp = right_ptr.expect("deficient leftmost child with no right sibling");
                // SAFETY: Child of the exclusively held parent.
                let right = unsafe { &*rp };
                right.latch.lock_exclusive();
                if !right.will_underflow() {
                    // SAFETY: parent, node and right are all latched.
                    unsafe { Self::borrow_from_right(parent, node_ptr, rp) };
                    right.latch.unlock_exclusive();
                    smo_log!("borrow_right", leaf = node.is_leaf());
                    return;
                }
                // Coalesce: the right sibling disappears into node.
                // SAFETY: parent, node and right are latched; `slot + 1`
                // names right's separator in parent.
                unsafe { Self::merge_right_into_left(parent, slot + 1, node_ptr, rp) };
                smo_log!("coalesce_from_right", leaf = node.is_leaf());
                right.latch.unlock_exclusive();
                // SAFETY: Unlinked, unlatched, never retired before.
                unsafe { self.retire_node(guard, rp) };
                path.pop_release();
            }

            // A coalesce removed one separator from the parent, which is now
            // the deepest latched node.
            let parent_ptr = path.last();
            // SAFETY: Latched in the path.
            let parent = unsafe { &*parent_ptr };
            if std::ptr::eq(self.current_root(), parent_ptr) {
                if parent.inner().child_count() == 1 {
                    // The root routes everything to one child: drop a level.
                    let only_child = parent.inner().first_child;
                    self.swap_root(only_child);
                    let old_root = path.pop_detach();
                    // SAFETY: Still latched from the traversal; unlinked.
                    unsafe { (*old_root).latch.unlock_exclusive() };
                    // SAFETY: Unlinked, unlatched, never retired before.
                    unsafe { self.retire_node(guard, old_root) };
                    smo_log!("root_collapse");
                }
                return;
            }
            if parent.size() >= Node::<K, V, F>::MIN_KEYS_INNER {
                return;
            }
        }
    }

    /// Move the left sibling's last entry into the front of the deficient
    /// node and re-anchor the separator between them.
    ///
    /// # Safety
    ///
    /// `parent` must be the shared parent of both nodes; all three must be
    /// exclusively latched by the caller.
    unsafe fn borrow_from_left(
        parent: &Node<K, V, F>,
        left_ptr: NodePtr<K, V, F>,
        node_ptr: NodePtr<K, V, F>,
    ) {
        // SAFETY: Latched per the contract.
        let (left, node) = unsafe { (&*left_ptr, &*node_ptr) };
        match (left.data_mut(), node.data_mut()) {
            (NodeData::Leaf(l), NodeData::Leaf(n)) => {
                let donated = l.remove_last_entry();
                let new_sep = donated.key.clone();
                n.entries.insert(0, donated);
                parent.inner_mut().replace_key_for_child(node_ptr, new_sep);
            }
            (NodeData::Inner(l), NodeData::Inner(n)) => {
                // Rotate through the parent: the old separator routes down in
                // front of the node, the donated key becomes the separator.
                let donated = l.entries.pop().expect("donor inner node is empty");
                let old_sep = parent
                    .inner_mut()
                    .replace_key_for_child(node_ptr, donated.key);
                let old_first = std::mem::replace(&mut n.first_child, donated.child);
                n.entries.insert(
                    0,
                    InnerEntry {
                        key: old_sep,
                        child: old_first,
                    },
                );
            }
            _ => unreachable!("sibling node kind mismatch"),
        }
    }

    /// Move the right sibling's first entry onto the back of the deficient
    /// node and re-anchor the separator between them.
    ///
    /// # Safety
    ///
    /// As for [`Self::borrow_from_left`].
    unsafe fn borrow_from_right(
        parent: &Node<K, V, F>,
        node_ptr: NodePtr<K, V, F>,
        right_ptr: NodePtr<K, V, F>,
    ) {
        // SAFETY: Latched per the contract.
        let (node, right) = unsafe { (&*node_ptr, &*right_ptr) };
        match (node.data_mut(), right.data_mut()) {
            (NodeData::Leaf(n), NodeData::Leaf(r)) => {
                let donated = r.remove_first_entry();
                n.entries.push(donated);
                let new_sep = r.entries[0].key.clone();
                parent.inner_mut().replace_key_for_child(right_ptr, new_sep);
            }
            (NodeData::Inner(n), NodeData::Inner(r)) => {
                let (head_key, moved_child) = r.remove_first_entry();
                let old_sep = parent
                    .inner_mut()
                    .replace_key_for_child(right_ptr, head_key);
                n.entries.push(InnerEntry {
                    key: old_sep,
                    child: moved_child,
                });
            }
            _ => unreachable!("sibling node kind mismatch"),
        }
    }

    /// Merge the child at `right_slot` into its left neighbor, removing the
    /// separator between them from the parent. For leaves this also splices
    /// the sibling chain; for inner nodes the removed separator routes down
    /// into the merged node.
    ///
    /// The caller unlinks, unlatches and retires the right node afterwards.
    ///
    /// # Safety
    ///
    /// `parent` must be the shared parent, `right_slot >= 1` the right
    /// node's child slot, and all three nodes exclusively latched.
    unsafe fn merge_right_into_left(
        parent: &Node<K, V, F>,
        right_slot: usize,
        left_ptr: NodePtr<K, V, F>,
        right_ptr: NodePtr<K, V, F>,
    ) {
        let sep = parent.inner_mut().remove_entry_at_slot(right_slot);
        debug_assert!(std::ptr::eq(sep.child, right_ptr), "separator does not own the victim");

        // SAFETY: Latched per the contract.
        let (left, right) = unsafe { (&*left_ptr, &*right_ptr) };
        match (left.data_mut(), right.data_mut()) {
            (NodeData::Leaf(l), NodeData::Leaf(r)) => {
                l.entries.append(&mut r.entries);
                let new_next = r.next;
                l.next = new_next;
                if !new_next.is_null() {
                    // The chain neighbor may live under another parent; its
                    // own latch protects the back-link.
                    // SAFETY: `right` is latched and still links to it, so it
                    // cannot have been unlinked concurrently.
                    let neighbor = unsafe { &*new_next };
                    neighbor.latch.lock_exclusive();
                    neighbor.leaf_mut().prev = left_ptr;
                    neighbor.latch.unlock_exclusive();
                }
                // The victim keeps its sibling links: an iterator stranded on
                // the retired leaf follows them back into the live chain.
            }
            (NodeData::Inner(l), NodeData::Inner(r)) => {
                l.entries.push(InnerEntry {
                    key: sep.key,
                    child: r.first_child,
                });
                l.entries.append(&mut r.entries);
                r.first_child = std::ptr::null_mut();
            }
            _ => unreachable!("sibling node kind mismatch"),
        }
    }
}
