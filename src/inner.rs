//! Inner node operations.
//!
//! An inner node routes a key to the child whose range covers it: child `i`
//! covers `[entries[i-1].key, entries[i].key)` with `first_child` covering
//! everything below `entries[0].key`. Separator keys are exact lower bounds
//! of their right subtree when created; deletions may leave them stale, but
//! they always remain valid routing bounds.
//!
//! Like the leaf operations, everything here assumes the caller holds the
//! owning node's latch; rebalancing across siblings is driven by the tree
//! layer, which holds the shared parent exclusively.

use crate::node::{InnerData, InnerEntry, NodePtr, lower_bound_by, upper_bound_by};
use crate::ordering::KeyOrdering;

impl<K, V, const F: usize> InnerData<K, V, F> {
    /// First index whose separator key is `>= key`.
    #[inline]
    pub(crate) fn position_ge<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> usize {
        lower_bound_by(&self.entries, ord, key, |e| &e.key)
    }

    /// Number of separators `<= key`; equivalently one past the last index
    /// whose separator key is `<= key`.
    #[inline]
    pub(crate) fn position_after_le<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> usize {
        upper_bound_by(&self.entries, ord, key, |e| &e.key)
    }

    /// Child slot covering `key`: 0 names `first_child`, slot `i >= 1` names
    /// `entries[i - 1].child`.
    #[inline]
    pub(crate) fn slot_for<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> usize {
        self.position_after_le(ord, key)
    }

    /// The child covering `key`.
    #[inline]
    pub(crate) fn child_for<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> NodePtr<K, V, F> {
        self.child_at(self.slot_for(ord, key))
    }

    /// Child pointer at `slot` (see [`InnerData::slot_for`] for numbering).
    #[inline]
    pub(crate) fn child_at(&self, slot: usize) -> NodePtr<K, V, F> {
        if slot == 0 {
            self.first_child
        } else {
            self.entries[slot - 1].child
        }
    }

    /// Number of children.
    #[inline]
    pub(crate) fn child_count(&self) -> usize {
        self.entries.len() + 1
    }

    /// The child immediately left of the one covering `key`, or null when
    /// that child is `first_child`.
    pub(crate) fn predecessor_of<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> NodePtr<K, V, F> {
        match self.slot_for(ord, key) {
            0 => std::ptr::null_mut(),
            slot => self.child_at(slot - 1),
        }
    }

    /// The child immediately right of the one covering `key`, or null at the
    /// right edge.
    pub(crate) fn successor_of<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> NodePtr<K, V, F> {
        let slot = self.slot_for(ord, key);
        if slot + 1 <= self.entries.len() {
            self.child_at(slot + 1)
        } else {
            std::ptr::null_mut()
        }
    }

    /// Slot of `child` among this node's children, located by identity.
    /// Rebalancing uses this rather than key search so that in-flight key
    /// mutations of the child cannot misroute the operation.
    pub(crate) fn slot_of_child(&self, child: NodePtr<K, V, F>) -> Option<usize> {
        if std::ptr::eq(self.first_child, child) {
            return Some(0);
        }
        self.entries
            .iter()
            .position(|e| std::ptr::eq(e.child, child))
            .map(|i| i + 1)
    }

    /// Insert a promoted separator and its right child. The separator must
    /// not duplicate an existing one.
    pub(crate) fn insert<C: KeyOrdering<K>>(&mut self, ord: &C, key: K, child: NodePtr<K, V, F>) {
        let pos = self.position_ge(ord, &key);
        debug_assert!(
            pos >= self.entries.len() || !ord.equal(&self.entries[pos].key, &key),
            "duplicate separator key"
        );
        self.entries.insert(pos, InnerEntry { key, child });
    }

    /// Overwrite the separator key that points at `child`, returning the
    /// prior key. Used by leaf borrows to re-anchor the boundary separator.
    pub(crate) fn replace_key_for_child(&mut self, child: NodePtr<K, V, F>, new_key: K) -> K {
        let slot = self
            .slot_of_child(child)
            .expect("replace_key_for_child: not a child of this node");
        assert!(slot > 0, "first_child has no separator to replace");
        std::mem::replace(&mut self.entries[slot - 1].key, new_key)
    }

    /// Detach `entries[0]`, promoting its child to `first_child` so the
    /// n-children/n-1-keys shape is preserved. Returns the detached key and
    /// the previous `first_child`.
    ///
    /// Two callers: splitting (the detached key is promoted to the parent and
    /// the previous `first_child` is null by construction) and borrowing from
    /// a right sibling (the previous `first_child` is the transferred child).
    pub(crate) fn remove_first_entry(&mut self) -> (K, NodePtr<K, V, F>) {
        let entry = self.entries.remove(0);
        let old_first = std::mem::replace(&mut self.first_child, entry.child);
        (entry.key, old_first)
    }

    /// Detach the upper half of the entries for a split. The caller pops the
    /// returned vector's head with [`InnerData::remove_first_entry`] on the
    /// new node to promote its key.
    pub(crate) fn split_upper(&mut self) -> Vec<InnerEntry<K, V, F>> {
        debug_assert!(self.entries.len() == F, "split on an inner node that is not overflowing");
        self.entries.split_off((F - 1) / 2)
    }

    /// Remove the separator entry at child `slot` (slot >= 1), returning it.
    /// Coalescing routes the returned key down into the merged node.
    pub(crate) fn remove_entry_at_slot(&mut self, slot: usize) -> InnerEntry<K, V, F> {
        assert!(slot > 0, "first_child slot carries no separator");
        self.entries.remove(slot - 1)
    }

    /// All children, left to right.
    pub(crate) fn children(&self) -> impl Iterator<Item = NodePtr<K, V, F>> + '_ {
        std::iter::once(self.first_child).chain(self.entries.iter().map(|e| e.child))
    }
}
