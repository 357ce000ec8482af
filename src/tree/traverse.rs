//! Crab-latched traversal.
//!
//! Two traversal modes reach a leaf:
//!
//! * **Read crabbing** ([`BPlusTree::find_leaf_locked`]): shared latches down
//!   the spine, each child latched before its parent is released. At most two
//!   latches are held at any instant. The leaf itself is latched shared for
//!   readers or exclusive for the optimistic mutator pass.
//!
//! * **Write crabbing** ([`BPlusTree::find_leaf_write`]): exclusive latches
//!   down the spine, recorded in a [`LatchedPath`]. After latching each new
//!   descendant the traversal asks whether *that descendant* is safe — unable
//!   to propagate a split (insert) or merge (delete) into its parent — and if
//!   so releases every ancestor it still holds. What remains latched is the
//!   contiguous chain from the highest unsafe ancestor down to the leaf,
//!   which is exactly the set of nodes a split or merge cascade may touch.
//!
//! Both modes begin with a retry loop on the root: sample the pointer,
//! try-latch the sampled node, then revalidate that it is still the root. A
//! losing race (root split raised the height, or a collapse lowered it)
//! unlatches and resamples. The seize guard held by every operation keeps a
//! just-replaced root allocated, so latching a stale sample is always safe.

use seize::LocalGuard;

use crate::node::{Node, NodeData, NodePtr};
use crate::ordering::KeyOrdering;
use crate::trace::latch_log;

use super::BPlusTree;

/// How the target leaf of a read traversal is latched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LeafLatchMode {
    /// Point/range readers.
    Shared,
    /// The optimistic mutator pass: write latch on the leaf only.
    Exclusive,
}

/// Which mutation a write traversal serves; decides the safety predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOp {
    Insert,
    Delete,
}

impl WriteOp {
    /// True iff `node` cannot propagate structure changes to its parent
    /// under this operation, making it safe to release all held ancestors.
    #[inline]
    fn is_safe<K, V, const F: usize>(self, node: &Node<K, V, F>) -> bool {
        match self {
            WriteOp::Insert => !node.will_overflow(),
            WriteOp::Delete => !node.will_underflow(),
        }
    }
}

/// The chain of exclusively latched nodes a write traversal retained,
/// ordered from the highest unsafe ancestor down to the leaf.
///
/// Dropping the path releases every latch still held, so every exit from a
/// mutating operation — including the early-return conflict paths — restores
/// the tree to an unlatched state.
pub(crate) struct LatchedPath<K, V, const F: usize> {
    nodes: Vec<NodePtr<K, V, F>>,
}

impl<K, V, const F: usize> LatchedPath<K, V, F> {
    fn new(root: NodePtr<K, V, F>) -> Self {
        Self { nodes: vec![root] }
    }

    fn push(&mut self, node: NodePtr<K, V, F>) {
        self.nodes.push(node);
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Latched node at `index`, 0 being the highest retained ancestor.
    pub(crate) fn node_at(&self, index: usize) -> NodePtr<K, V, F> {
        self.nodes[index]
    }

    /// The deepest latched node; after traversal, the target leaf.
    pub(crate) fn last(&self) -> NodePtr<K, V, F> {
        *self.nodes.last().expect("empty latch path")
    }

    /// The parent of [`last`](Self::last) within the retained chain.
    pub(crate) fn parent_of_last(&self) -> NodePtr<K, V, F> {
        self.nodes[self.nodes.len() - 2]
    }

    /// Release every held latch, emptying the path.
    pub(crate) fn release_all(&mut self) {
        for ptr in self.nodes.drain(..).rev() {
            // SAFETY: Every pointer in the path is exclusively latched by us.
            unsafe { (*ptr).latch.unlock_exclusive() };
        }
    }

    /// Unlatch the deepest node and drop it from the path.
    pub(crate) fn pop_release(&mut self) {
        let ptr = self.nodes.pop().expect("empty latch path");
        // SAFETY: Path nodes are exclusively latched by us.
        unsafe { (*ptr).latch.unlock_exclusive() };
    }

    /// Drop the deepest node from the path *without* unlatching, handing the
    /// latch obligation to the caller. Used when the node is about to be
    /// unlinked: it must leave the held-latch set before it is retired.
    pub(crate) fn pop_detach(&mut self) -> NodePtr<K, V, F> {
        self.nodes.pop().expect("empty latch path")
    }
}

impl<K, V, const F: usize> Drop for LatchedPath<K, V, F> {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F> {
    /// Latch the root in shared mode, retrying until the latched node is
    /// still the root. Returns `None` for the empty tree.
    ///
    /// The sampled pointer may stop being the root before the latch is
    /// acquired (a split raised the height, or a collapse lowered it), so
    /// the acquisition revalidates and resamples on mismatch. The guard
    /// keeps a replaced root allocated throughout.
    pub(crate) fn latch_root_shared(&self, _guard: &LocalGuard<'_>) -> Option<NodePtr<K, V, F>> {
        loop {
            let root = self.current_root();
            if root.is_null() {
                return None;
            }
            // SAFETY: The caller's guard keeps a concurrently retired root
            // allocated until we can revalidate.
            let node = unsafe { &*root };
            if !node.latch.try_lock_shared() {
                node.latch.lock_shared();
            }
            if std::ptr::eq(self.current_root(), root) {
                return Some(root);
            }
            node.latch.unlock_shared();
        }
    }

    /// Latch the root for a read traversal whose leaf will be latched in
    /// `mode`: when the root is itself the leaf, it is latched in `mode`
    /// directly.
    fn latch_root_for_read(
        &self,
        mode: LeafLatchMode,
        _guard: &LocalGuard<'_>,
    ) -> Option<NodePtr<K, V, F>> {
        loop {
            let root = self.current_root();
            if root.is_null() {
                return None;
            }
            // SAFETY: Guard-protected as in latch_root_shared; the kind tag
            // is immutable and readable before latching.
            let node = unsafe { &*root };
            let exclusive = mode == LeafLatchMode::Exclusive && node.is_leaf();
            if exclusive {
                if !node.latch.try_lock_exclusive() {
                    node.latch.lock_exclusive();
                }
            } else if !node.latch.try_lock_shared() {
                node.latch.lock_shared();
            }
            if std::ptr::eq(self.current_root(), root) {
                return Some(root);
            }
            if exclusive {
                node.latch.unlock_exclusive();
            } else {
                node.latch.unlock_shared();
            }
        }
    }

    /// Latch the root exclusively, retrying until the latched node is still
    /// the root. Returns `None` for the empty tree.
    fn latch_root_exclusive(&self, _guard: &LocalGuard<'_>) -> Option<NodePtr<K, V, F>> {
        loop {
            let root = self.current_root();
            if root.is_null() {
                return None;
            }
            // SAFETY: Guard-protected as in latch_root_shared.
            let node = unsafe { &*root };
            if !node.latch.try_lock_exclusive() {
                node.latch.lock_exclusive();
            }
            if std::ptr::eq(self.current_root(), root) {
                return Some(root);
            }
            node.latch.unlock_exclusive();
        }
    }
}

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F>
where
    C: KeyOrdering<K>,
{
    /// Read-crab to the leaf covering `key`, leaving it latched in `mode`.
    /// Returns `None` for the empty tree.
    pub(crate) fn find_leaf_locked(
        &self,
        key: &K,
        mode: LeafLatchMode,
        guard: &LocalGuard<'_>,
    ) -> Option<NodePtr<K, V, F>> {
        let mut cur = self.latch_root_for_read(mode, guard)?;
        loop {
            // SAFETY: `cur` is latched (shared, or exclusive for a leaf root).
            let node = unsafe { &*cur };
            let inner = match node.data() {
                NodeData::Leaf(_) => return Some(cur),
                NodeData::Inner(inner) => inner,
            };
            let child = inner.child_for(&self.ordering, key);
            // SAFETY: `child` is owned by `cur`, whose latch we hold; the
            // kind tag is immutable.
            let child_node = unsafe { &*child };
            if mode == LeafLatchMode::Exclusive && child_node.is_leaf() {
                child_node.latch.lock_exclusive();
            } else {
                child_node.latch.lock_shared();
            }
            node.latch.unlock_shared();
            cur = child;
        }
    }

    /// Shorthand for a shared-leaf read traversal.
    #[inline]
    pub(crate) fn find_leaf_shared(
        &self,
        key: &K,
        guard: &LocalGuard<'_>,
    ) -> Option<NodePtr<K, V, F>> {
        self.find_leaf_locked(key, LeafLatchMode::Shared, guard)
    }

    /// Write-crab to the leaf covering `key`, releasing held ancestors at
    /// every safe descendant. Returns `None` for the empty tree.
    pub(crate) fn find_leaf_write(
        &self,
        key: &K,
        op: WriteOp,
        guard: &LocalGuard<'_>,
    ) -> Option<LatchedPath<K, V, F>> {
        let root = self.latch_root_exclusive(guard)?;
        let mut path = LatchedPath::new(root);
        let mut cur = root;
        loop {
            // SAFETY: `cur` is exclusively latched and recorded in `path`.
            let node = unsafe { &*cur };
            let inner = match node.data() {
                NodeData::Leaf(_) => {
                    latch_log!(retained = path.len(), "write traversal reached leaf");
                    return Some(path);
                }
                NodeData::Inner(inner) => inner,
            };
            let child = inner.child_for(&self.ordering, key);
            // SAFETY: `child` is owned by `cur`, whose latch we hold.
            let child_node = unsafe { &*child };
            child_node.latch.lock_exclusive();
            if op.is_safe(child_node) {
                // The descendant cannot propagate, so nothing above it can be
                // touched by this operation anymore.
                path.release_all();
            }
            path.push(child);
            cur = child;
        }
    }
}
