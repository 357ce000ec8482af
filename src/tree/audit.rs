//! Structural audit and heap accounting.
//!
//! [`BPlusTree::check_structure`] asserts every tree invariant: strict key
//! order inside each node, occupancy bounds, child-count arithmetic,
//! separator bounds, uniform depth, and a doubly linked leaf chain that
//! covers all keys in ascending order exactly once. It is a test hook and
//! requires quiescence, like the diagnostics walkers it replaces — it reads
//! nodes without latching.
//!
//! Separators are checked as range bounds, `max(left) < sep <= min(right)`,
//! not as exact subtree minima: a separator is exact when a split or borrow
//! anchors it, but deleting a leaf's first key happens below an
//! already-released parent and leaves the separator stale on purpose.
//!
//! [`BPlusTree::heap_usage`] is a live operation: it walks the tree with
//! hand-over-hand shared latches and sums per-entry byte accounting. The
//! number is approximate by design — keys plus stored values for leaves,
//! keys plus child pointers for inner nodes — and grows monotonically with
//! contents between allocations.

use crate::node::{Node, NodeData, NodePtr};
use crate::ordering::KeyOrdering;

use super::BPlusTree;

/// What a subtree reports upward during the audit.
struct SubtreeAudit<K> {
    min_key: K,
    max_key: K,
    depth: usize,
}

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F> {
    /// Approximate heap bytes attributable to tree contents.
    #[must_use]
    pub fn heap_usage(&self) -> usize {
        let guard = self.guard();
        let Some(root) = self.latch_root_shared(&guard) else {
            return 0;
        };
        // SAFETY: The root is latched shared; the walk latches each child
        // before reading it.
        unsafe { Self::latched_subtree_bytes(root) }
    }

    /// Sum [`Node::heap_bytes`] over the subtree with hand-over-hand shared
    /// latches. Releases the latch on `ptr` before returning.
    ///
    /// # Safety
    ///
    /// The caller holds the shared latch on `ptr`.
    unsafe fn latched_subtree_bytes(ptr: NodePtr<K, V, F>) -> usize {
        // SAFETY: Latched per the contract.
        let node = unsafe { &*ptr };
        let mut total = node.heap_bytes();
        if let NodeData::Inner(inner) = node.data() {
            for child in inner.children() {
                // SAFETY: Owned child of the node we hold; latched before
                // the recursive read.
                unsafe { (*child).latch.lock_shared() };
                // SAFETY: Just latched.
                total += unsafe { Self::latched_subtree_bytes(child) };
            }
        }
        node.latch.unlock_shared();
        total
    }
}

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F>
where
    K: Clone,
    V: Clone + Eq,
    C: KeyOrdering<K>,
{
    /// Assert every structural invariant of the tree.
    ///
    /// Test hook; the tree must be quiescent. Panics on the first violation.
    pub fn check_structure(&self) {
        let _guard = self.guard();
        let root = self.current_root();
        if root.is_null() {
            assert_eq!(self.len(), 0, "empty tree with a nonzero pair count");
            return;
        }

        let mut leaves: Vec<NodePtr<K, V, F>> = Vec::new();
        let mut pairs = 0usize;
        // SAFETY: Quiescence is the caller's contract; the guard keeps every
        // reachable node allocated.
        unsafe { self.audit_subtree(root, true, &mut leaves, &mut pairs) };

        assert_eq!(pairs, self.len(), "pair count diverges from leaf contents");

        // The leaf chain must mirror the key-order DFS exactly.
        for (i, &leaf_ptr) in leaves.iter().enumerate() {
            // SAFETY: Quiescent read of a live leaf.
            let leaf = unsafe { (*leaf_ptr).leaf() };
            let expected_prev = if i == 0 {
                std::ptr::null_mut()
            } else {
                leaves[i - 1]
            };
            let expected_next = if i + 1 == leaves.len() {
                std::ptr::null_mut()
            } else {
                leaves[i + 1]
            };
            assert!(
                std::ptr::eq(leaf.prev, expected_prev),
                "leaf chain prev link out of order at leaf {i}"
            );
            assert!(
                std::ptr::eq(leaf.next, expected_next),
                "leaf chain next link out of order at leaf {i}"
            );
        }
    }

    /// Recursively audit one subtree, returning its key range and depth.
    ///
    /// # Safety
    ///
    /// The tree must be quiescent and `ptr` reachable from the root.
    unsafe fn audit_subtree(
        &self,
        ptr: NodePtr<K, V, F>,
        is_root: bool,
        leaves: &mut Vec<NodePtr<K, V, F>>,
        pairs: &mut usize,
    ) -> SubtreeAudit<K> {
        let ord = &self.ordering;
        // SAFETY: Quiescent read per the contract.
        let node = unsafe { &*ptr };
        match node.data() {
            NodeData::Leaf(leaf) => {
                let n = leaf.entries.len();
                assert!(n >= 1, "leaf with no entries survived");
                assert!(n <= Node::<K, V, F>::MAX_KEYS, "leaf above capacity");
                if !is_root {
                    assert!(
                        n >= Node::<K, V, F>::MIN_KEYS_LEAF,
                        "non-root leaf below minimum occupancy"
                    );
                }
                for w in leaf.entries.windows(2) {
                    assert!(ord.less(&w[0].key, &w[1].key), "leaf keys not strictly sorted");
                }
                for e in &leaf.entries {
                    assert!(!e.values.is_empty(), "entry retained an empty value set");
                    for (i, v) in e.values.iter().enumerate() {
                        assert!(
                            !e.values[..i].contains(v),
                            "duplicate value within one key's value set"
                        );
                    }
                }
                *pairs += leaf.pair_count();
                leaves.push(ptr);
                SubtreeAudit {
                    min_key: leaf.entries[0].key.clone(),
                    max_key: leaf.entries[n - 1].key.clone(),
                    depth: 1,
                }
            }
            NodeData::Inner(inner) => {
                let n = inner.entries.len();
                assert!(n <= Node::<K, V, F>::MAX_KEYS, "inner node above capacity");
                assert!(
                    n >= if is_root { 1 } else { Node::<K, V, F>::MIN_KEYS_INNER },
                    "inner node below minimum occupancy"
                );
                assert!(!inner.first_child.is_null(), "inner node without leftmost child");
                for w in inner.entries.windows(2) {
                    assert!(ord.less(&w[0].key, &w[1].key), "separators not strictly sorted");
                }

                // SAFETY: Child of a quiescent reachable node.
                let first = unsafe { self.audit_subtree(inner.first_child, false, leaves, pairs) };
                let mut depth = first.depth;
                let mut max_key = first.max_key;
                for (i, entry) in inner.entries.iter().enumerate() {
                    assert!(
                        ord.less(&max_key, &entry.key),
                        "separator {i} does not bound its left subtree"
                    );
                    // SAFETY: As above.
                    let child = unsafe { self.audit_subtree(entry.child, false, leaves, pairs) };
                    // Lower bound only: deletes may leave the separator
                    // below the subtree minimum until the next borrow or
                    // split re-anchors it.
                    assert!(
                        !ord.less(&child.min_key, &entry.key),
                        "separator {i} exceeds the minimum of its right subtree"
                    );
                    assert_eq!(depth, child.depth, "leaf depth is not uniform");
                    max_key = child.max_key;
                }
                SubtreeAudit {
                    min_key: first.min_key,
                    max_key,
                    depth: depth + 1,
                }
            }
        }
    }
}
