//! The concurrent B+ tree.
//!
//! `BPlusTree` maps keys to sets of values and is meant to sit beneath a
//! relational secondary index: one tree shared by every thread of a process,
//! point and range reads running against concurrent inserts and deletes.
//!
//! # Concurrency protocol
//!
//! Every node carries a reader-writer latch; traversals crab down the tree,
//! latching a child before releasing its parent. Readers hold at most two
//! latches at a time. Writers first try an optimistic pass (read latches down
//! the spine, write latch only on the target leaf) and fall back to a
//! pessimistic pass that write-latches the spine, releasing each held
//! ancestor as soon as the newly latched descendant is *safe* — unable to
//! propagate a split (insert) or a merge (delete). See
//! [`traverse`](self::traverse) for the details.
//!
//! The root pointer is swapped only while holding the old root's exclusive
//! latch plus a dedicated root mutex; traversals revalidate the pointer after
//! latching whatever they sampled. Unlinked nodes are retired through a
//! [`seize`] collector rather than freed, so a traversal that latched a
//! just-replaced node is always touching live memory.
//!
//! # What this is not
//!
//! There is no persistence, no write-ahead logging, no multi-versioning, and
//! no snapshot isolation for iterators: an [`IndexIterator`] is memory-safe
//! under concurrent mutation but only yields a consistent scan when the tree
//! is quiescent.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use seize::{Collector, Guard, LocalGuard};

use crate::node::{Node, NodeData, NodePtr};
use crate::ordering::{KeyOrdering, NaturalOrder};

mod audit;
mod insert;
mod iterator;
mod remove;
pub(crate) mod traverse;

pub use insert::ConditionalInsert;
pub use iterator::IndexIterator;

/// A concurrent, ordered, multi-valued in-memory index.
///
/// # Type parameters
///
/// * `K` - key type, ordered by `C`
/// * `V` - value type; values repeat across keys but never within one key
/// * `C` - key comparator (default: [`NaturalOrder`] for `K: Ord`)
/// * `FAN_OUT` - maximum children per node; entries cap out at `FAN_OUT - 1`
///
/// # Example
///
/// ```
/// use crabtree::BPlusTree;
///
/// let tree: BPlusTree<u64, u64> = BPlusTree::new();
/// assert!(tree.insert(1, 10));
/// assert!(tree.insert(1, 11));
/// assert!(!tree.insert(1, 10), "exact pair already present");
///
/// let mut out = Vec::new();
/// tree.get(&1, &mut out);
/// assert_eq!(out, vec![10, 11]);
///
/// assert!(tree.delete(&1, &10));
/// assert!(!tree.delete(&1, &10));
/// ```
pub struct BPlusTree<K, V, C = NaturalOrder, const FAN_OUT: usize = 10> {
    /// Current root, or null for the empty tree.
    root: AtomicPtr<Node<K, V, FAN_OUT>>,

    /// Serializes root-pointer swaps. Held only around the store; the swapping
    /// thread additionally holds the old root's exclusive latch.
    root_latch: Mutex<()>,

    /// Deferred reclamation for unlinked nodes.
    collector: Collector,

    /// Caller-supplied key ordering.
    ordering: C,

    /// Live `(key, value)` pair count.
    pairs: AtomicUsize,

    /// The tree logically owns its nodes.
    _owns: PhantomData<Box<Node<K, V, FAN_OUT>>>,
}

// SAFETY: All shared node state is reached through raw pointers guarded by
// the per-node latches, the root revalidation loop, and seize retirement.
unsafe impl<K: Send, V: Send, C: Send, const F: usize> Send for BPlusTree<K, V, C, F> {}
// SAFETY: As above; `&self` operations synchronize through latches, so the
// tree may be shared once K/V/C can be.
unsafe impl<K: Send + Sync, V: Send + Sync, C: Sync, const F: usize> Sync
    for BPlusTree<K, V, C, F>
{
}

impl<K, V, const F: usize> BPlusTree<K, V, NaturalOrder, F> {
    /// Create an empty tree ordered by `K: Ord`.
    #[must_use]
    pub fn new() -> Self
    where
        K: Ord,
    {
        Self::with_ordering(NaturalOrder)
    }
}

impl<K, V, const F: usize> Default for BPlusTree<K, V, NaturalOrder, F>
where
    K: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F> {
    /// Create an empty tree with a caller-supplied ordering.
    #[must_use]
    pub fn with_ordering(ordering: C) -> Self {
        assert!(F >= 4, "FAN_OUT must be at least 4");
        Self {
            root: AtomicPtr::new(std::ptr::null_mut()),
            root_latch: Mutex::new(()),
            collector: Collector::new(),
            ordering,
            pairs: AtomicUsize::new(0),
            _owns: PhantomData,
        }
    }

    /// Number of `(key, value)` pairs currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.load(AtomicOrdering::Acquire)
    }

    /// True iff the tree stores no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of levels: 0 for the empty tree, 1 when the root is a leaf.
    #[must_use]
    pub fn height(&self) -> usize {
        let guard = self.guard();
        let Some(mut cur) = self.latch_root_shared(&guard) else {
            return 0;
        };
        let mut levels = 1;
        loop {
            // SAFETY: `cur` is latched shared and therefore live.
            let node = unsafe { &*cur };
            match node.data() {
                NodeData::Leaf(_) => {
                    node.latch.unlock_shared();
                    return levels;
                }
                NodeData::Inner(inner) => {
                    let child = inner.first_child;
                    // SAFETY: `child` is owned by `node`, which we hold.
                    unsafe { (*child).latch.lock_shared() };
                    node.latch.unlock_shared();
                    cur = child;
                    levels += 1;
                }
            }
        }
    }

    /// Whether the root is currently a leaf; `None` for the empty tree.
    ///
    /// Test introspection only — the answer can be stale the moment it is
    /// returned.
    #[must_use]
    pub fn root_is_leaf(&self) -> Option<bool> {
        let _guard = self.guard();
        let root = self.root.load(AtomicOrdering::Acquire);
        if root.is_null() {
            None
        } else {
            // SAFETY: The guard keeps a concurrently retired root allocated,
            // and the read is confined to the immutable node kind tag.
            Some(unsafe { (*root).is_leaf() })
        }
    }

    /// Enter the collector's protected region. Every traversal runs inside a
    /// guard so that nodes retired by concurrent rebalancing stay allocated
    /// until the traversal is done with them.
    #[inline]
    pub(crate) fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Retire an unlinked, unlatched node for deferred reclamation.
    ///
    /// # Safety
    ///
    /// `ptr` must be unreachable from the tree (no parent slot, not the
    /// root), must not be retired twice, and the caller must have removed it
    /// from any held-latch set.
    pub(crate) unsafe fn retire_node(&self, guard: &LocalGuard<'_>, ptr: NodePtr<K, V, F>) {
        // SAFETY: Per the contract above; reclaim_node boxes the same
        // allocation this crate created with Box::into_raw.
        unsafe { guard.defer_retire(ptr, reclaim_node::<K, V, F>) };
    }

    /// Publish a new root. The caller holds the exclusive latch of the node
    /// currently installed as root (when one exists).
    pub(crate) fn swap_root(&self, new_root: NodePtr<K, V, F>) {
        let _swap = self.root_latch.lock();
        self.root.store(new_root, AtomicOrdering::Release);
    }

    pub(crate) fn current_root(&self) -> NodePtr<K, V, F> {
        self.root.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn note_pair_added(&self) {
        self.pairs.fetch_add(1, AtomicOrdering::AcqRel);
    }

    pub(crate) fn note_pair_removed(&self) {
        self.pairs.fetch_sub(1, AtomicOrdering::AcqRel);
    }

    /// Free a whole subtree. Only usable with exclusive access to the tree.
    pub(crate) unsafe fn free_subtree(ptr: NodePtr<K, V, F>) {
        // SAFETY: Exclusive access per the contract; the pointer came from
        // Box::into_raw and is freed exactly once because each node is
        // reachable through a single parent slot.
        let node = unsafe { Box::from_raw(ptr) };
        if let NodeData::Inner(inner) = node.data() {
            for child in inner.children() {
                // SAFETY: Children are owned by this node and not reachable
                // from anywhere else.
                unsafe { Self::free_subtree(child) };
            }
        }
    }
}

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F>
where
    K: Clone,
    V: Clone + Eq,
    C: KeyOrdering<K>,
{
    /// Append every value stored under `key` to `out`.
    pub fn get(&self, key: &K, out: &mut Vec<V>) {
        let guard = self.guard();
        let Some(leaf_ptr) = self.find_leaf_shared(key, &guard) else {
            return;
        };
        // SAFETY: The leaf is latched shared by find_leaf_shared.
        let node = unsafe { &*leaf_ptr };
        node.leaf().scan_values(&self.ordering, key, out);
        node.latch.unlock_shared();
    }

    /// Convenience wrapper around [`get`](Self::get).
    #[must_use]
    pub fn values(&self, key: &K) -> Vec<V> {
        let mut out = Vec::new();
        self.get(key, &mut out);
        out
    }

    /// True iff the exact `(key, value)` pair is present.
    #[must_use]
    pub fn contains(&self, key: &K, value: &V) -> bool {
        let guard = self.guard();
        let Some(leaf_ptr) = self.find_leaf_shared(key, &guard) else {
            return false;
        };
        // SAFETY: The leaf is latched shared by find_leaf_shared.
        let node = unsafe { &*leaf_ptr };
        let found = node.leaf().has_key_value(&self.ordering, key, value);
        node.latch.unlock_shared();
        found
    }
}

impl<K, V, C, const F: usize> Drop for BPlusTree<K, V, C, F> {
    fn drop(&mut self) {
        let root = *self.root.get_mut();
        if !root.is_null() {
            // SAFETY: `&mut self` proves no concurrent access; retired nodes
            // are no longer reachable from the root and are handled by the
            // collector's own drop.
            unsafe { Self::free_subtree(root) };
        }
    }
}

impl<K, V, C, const F: usize> std::fmt::Debug for BPlusTree<K, V, C, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("fan_out", &F)
            .field("pairs", &self.len())
            .finish()
    }
}

/// Seize reclaimer: boxes the node back up and drops it.
///
/// # Safety
///
/// `ptr` must originate from `Box::into_raw` in this crate and be retired
/// exactly once; seize invokes this only after every guard that could have
/// observed the node has been dropped.
unsafe fn reclaim_node<K, V, const F: usize>(ptr: *mut Node<K, V, F>, _collector: &Collector) {
    // SAFETY: Per the contract above.
    unsafe { drop(Box::from_raw(ptr)) };
}
