//! Range iteration over the leaf chain.
//!
//! An [`IndexIterator`] is a cursor `(leaf, entry offset, value offset)` that
//! walks `(key, value)` pairs in key order, following the doubly linked leaf
//! chain at leaf boundaries. Each positioning step briefly takes the current
//! leaf's shared latch and materializes a clone of the pair under it
//! (copy-on-step), and the iterator holds a reclamation guard for its whole
//! lifetime, so leaves coalesced away by concurrent deletes remain allocated
//! while the cursor can still reach them.
//!
//! That makes iteration memory-safe under concurrent mutation, but not
//! atomic: a scan racing with writers may miss or repeat entries that moved
//! between leaves. Scans that must be exact run during quiescence, exactly
//! like the structural audit.

use seize::LocalGuard;

use crate::node::{NodeData, NodePtr};
use crate::ordering::KeyOrdering;

use super::BPlusTree;

/// Bidirectional cursor over `(key, value)` pairs in key order.
///
/// Obtained from [`BPlusTree::begin`], [`BPlusTree::begin_at`],
/// [`BPlusTree::end_at`] or [`BPlusTree::iter`]. The null cursor (`end`)
/// reports [`is_end`](IndexIterator::is_end) and yields nothing.
pub struct IndexIterator<'t, K, V, const FAN_OUT: usize = 10> {
    /// Keeps concurrently retired leaves allocated while we hold pointers.
    _guard: LocalGuard<'t>,
    leaf: NodePtr<K, V, FAN_OUT>,
    entry: usize,
    value: usize,
    current: Option<(K, V)>,
}

impl<'t, K, V, const F: usize> IndexIterator<'t, K, V, F>
where
    K: Clone,
    V: Clone,
{
    fn new_end(guard: LocalGuard<'t>) -> Self {
        Self {
            _guard: guard,
            leaf: std::ptr::null_mut(),
            entry: 0,
            value: 0,
            current: None,
        }
    }

    fn new_at(guard: LocalGuard<'t>, leaf: NodePtr<K, V, F>, entry: usize, value: usize) -> Self {
        Self {
            _guard: guard,
            leaf,
            entry,
            value,
            current: None,
        }
    }

    /// Key at the cursor, or `None` at the end.
    #[must_use]
    pub fn key(&self) -> Option<&K> {
        self.current.as_ref().map(|(k, _)| k)
    }

    /// Value at the cursor, or `None` at the end.
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        self.current.as_ref().map(|(_, v)| v)
    }

    /// Both halves of the materialized pair.
    #[must_use]
    pub fn pair(&self) -> Option<(&K, &V)> {
        self.current.as_ref().map(|(k, v)| (k, v))
    }

    /// True for the exhausted / null cursor.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.current.is_none()
    }

    /// Advance to the next value: the next value of the current entry, else
    /// the next entry, else the next leaf.
    pub fn step_forward(&mut self) {
        if self.leaf.is_null() {
            return;
        }
        self.value += 1;
        self.settle_forward();
    }

    /// Retreat to the previous value; the cursor becomes the end cursor when
    /// stepped back past the first pair.
    pub fn step_back(&mut self) {
        if self.leaf.is_null() {
            return;
        }
        if self.value > 0 {
            self.value -= 1;
        } else if self.entry > 0 {
            self.entry -= 1;
            self.value = usize::MAX;
        } else {
            // SAFETY: The guard keeps the leaf allocated; its latch protects
            // the back-link read.
            let node = unsafe { &*self.leaf };
            node.latch.lock_shared();
            let prev = node.leaf().prev;
            node.latch.unlock_shared();
            self.leaf = prev;
            self.entry = usize::MAX;
            self.value = usize::MAX;
        }
        self.settle_backward();
    }

    /// Clamp the cursor forward to the first live position at or after
    /// `(entry, value)` and materialize it, crossing leaves as needed.
    fn settle_forward(&mut self) {
        while !self.leaf.is_null() {
            // SAFETY: Guard-protected pointer; latched for the read below.
            let node = unsafe { &*self.leaf };
            node.latch.lock_shared();
            let leaf = match node.data() {
                NodeData::Leaf(leaf) => leaf,
                NodeData::Inner(_) => unreachable!("leaf chain reached an inner node"),
            };
            while self.entry < leaf.entries.len() {
                let e = &leaf.entries[self.entry];
                if self.value < e.values.len() {
                    self.current = Some((e.key.clone(), e.values[self.value].clone()));
                    node.latch.unlock_shared();
                    return;
                }
                self.entry += 1;
                self.value = 0;
            }
            let next = leaf.next;
            node.latch.unlock_shared();
            self.leaf = next;
            self.entry = 0;
            self.value = 0;
        }
        self.current = None;
    }

    /// Clamp the cursor backward to the last live position at or before
    /// `(entry, value)` and materialize it, crossing leaves as needed.
    fn settle_backward(&mut self) {
        while !self.leaf.is_null() {
            // SAFETY: Guard-protected pointer; latched for the reads below.
            let node = unsafe { &*self.leaf };
            node.latch.lock_shared();
            let leaf = match node.data() {
                NodeData::Leaf(leaf) => leaf,
                NodeData::Inner(_) => unreachable!("leaf chain reached an inner node"),
            };
            if !leaf.entries.is_empty() {
                self.entry = self.entry.min(leaf.entries.len() - 1);
                let e = &leaf.entries[self.entry];
                self.value = self.value.min(e.values.len() - 1);
                self.current = Some((e.key.clone(), e.values[self.value].clone()));
                node.latch.unlock_shared();
                return;
            }
            let prev = leaf.prev;
            node.latch.unlock_shared();
            self.leaf = prev;
            self.entry = usize::MAX;
            self.value = usize::MAX;
        }
        self.current = None;
    }
}

impl<K, V, const F: usize> Iterator for IndexIterator<'_, K, V, F>
where
    K: Clone,
    V: Clone,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        let out = self.current.take()?;
        self.value += 1;
        self.settle_forward();
        Some(out)
    }
}

impl<K, V, const F: usize> std::fmt::Debug for IndexIterator<'_, K, V, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexIterator")
            .field("at_end", &self.current.is_none())
            .finish()
    }
}

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F>
where
    K: Clone,
    V: Clone + Eq,
    C: KeyOrdering<K>,
{
    /// Cursor at the first pair of the tree (the end cursor when empty).
    #[must_use]
    pub fn begin(&self) -> IndexIterator<'_, K, V, F> {
        let guard = self.guard();
        let Some(mut cur) = self.latch_root_shared(&guard) else {
            return IndexIterator::new_end(guard);
        };
        // Descend along the leftmost spine with read crabbing.
        let leaf_ptr = loop {
            // SAFETY: `cur` is latched shared.
            let node = unsafe { &*cur };
            let inner = match node.data() {
                NodeData::Leaf(_) => {
                    node.latch.unlock_shared();
                    break cur;
                }
                NodeData::Inner(inner) => inner,
            };
            let child = inner.first_child;
            // SAFETY: Owned child of the latched node.
            unsafe { (*child).latch.lock_shared() };
            node.latch.unlock_shared();
            cur = child;
        };
        let mut it = IndexIterator::new_at(guard, leaf_ptr, 0, 0);
        it.settle_forward();
        it
    }

    /// Cursor at the first pair whose key is `>= key` (the end cursor when
    /// no such pair exists).
    #[must_use]
    pub fn begin_at(&self, key: &K) -> IndexIterator<'_, K, V, F> {
        let guard = self.guard();
        let Some(leaf_ptr) = self.find_leaf_shared(key, &guard) else {
            return IndexIterator::new_end(guard);
        };
        // SAFETY: Latched shared by find_leaf_shared.
        let node = unsafe { &*leaf_ptr };
        let pos = node.leaf().position_to_insert(&self.ordering, key);
        node.latch.unlock_shared();
        let mut it = IndexIterator::new_at(guard, leaf_ptr, pos, 0);
        it.settle_forward();
        it
    }

    /// The null cursor.
    #[must_use]
    pub fn end(&self) -> IndexIterator<'_, K, V, F> {
        IndexIterator::new_end(self.guard())
    }

    /// Cursor at the last value of the last pair whose key is `<= key` (the
    /// end cursor when no such pair exists).
    #[must_use]
    pub fn end_at(&self, key: &K) -> IndexIterator<'_, K, V, F> {
        let guard = self.guard();
        let Some(leaf_ptr) = self.find_leaf_shared(key, &guard) else {
            return IndexIterator::new_end(guard);
        };
        // SAFETY: Latched shared by find_leaf_shared.
        let node = unsafe { &*leaf_ptr };
        let leaf = node.leaf();
        let pos = leaf.position_to_insert(&self.ordering, key);
        let exact = pos < leaf.entries.len() && self.ordering.equal(&leaf.entries[pos].key, key);
        let (target, entry) = if exact {
            (leaf_ptr, pos)
        } else if pos > 0 {
            (leaf_ptr, pos - 1)
        } else {
            // Everything in this leaf is greater: fall back to the previous
            // leaf's last entry.
            (leaf.prev, usize::MAX)
        };
        node.latch.unlock_shared();
        let mut it = IndexIterator::new_at(guard, target, entry, usize::MAX);
        it.settle_backward();
        it
    }

    /// Forward iterator over every pair, in key order.
    #[must_use]
    pub fn iter(&self) -> IndexIterator<'_, K, V, F> {
        self.begin()
    }
}
