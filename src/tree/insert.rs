//! Insertion: optimistic pass, pessimistic pass, split propagation.
//!
//! Inserting a value under an existing key only grows that entry's value set
//! and can never split, so the optimistic pass — read latches down the spine,
//! write latch on the leaf — suffices unless the insert would create a new
//! entry in a full leaf. Only then does the operation release everything and
//! retry pessimistically with [`WriteOp::Insert`], which retains exactly the
//! ancestors a split cascade may touch.
//!
//! Split propagation runs bottom-up while the retained chain is held: the
//! overflowing leaf splits at its midpoint, the right half's first key is
//! promoted into the parent, and each parent that overflows in turn splits
//! the same way. A root split allocates a fresh inner root and publishes it
//! under the root mutex.

use seize::LocalGuard;

use crate::node::{InnerEntry, LeafData, Node, NodePtr};
use crate::ordering::KeyOrdering;
use crate::trace::{latch_log, smo_log};

use super::BPlusTree;
use super::traverse::{LatchedPath, LeafLatchMode, WriteOp};

/// Outcome of [`BPlusTree::conditional_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionalInsert {
    /// True iff the pair was installed.
    pub inserted: bool,
    /// True iff some existing value under the key satisfied the predicate,
    /// which rejects the insert.
    pub predicate_satisfied: bool,
}

/// Pre-insert admission rule, checked against the latched target leaf.
enum Admission<'p, V> {
    /// Reject only the exact duplicate pair.
    AnyPair,
    /// Additionally reject when the key already has any value.
    UniqueKey,
    /// Additionally reject when any existing value satisfies the predicate.
    Predicate(&'p dyn Fn(&V) -> bool),
}

enum Verdict {
    Admit,
    /// Duplicate pair or unique-key conflict.
    Conflict,
    PredicateHit,
}

impl<K, V, C, const F: usize> BPlusTree<K, V, C, F>
where
    K: Clone,
    V: Clone + Eq,
    C: KeyOrdering<K>,
{
    /// Insert `(key, value)`. Returns `false` without mutating iff the exact
    /// pair is already present; returns `true` iff the pair is present on
    /// exit.
    pub fn insert(&self, key: K, value: V) -> bool {
        self.insert_impl(key, value, &Admission::AnyPair).inserted
    }

    /// Insert `(key, value)` enforcing key uniqueness. Returns `false`
    /// without mutating iff the key already has any value (or the exact pair
    /// exists).
    pub fn insert_unique(&self, key: K, value: V) -> bool {
        self.insert_impl(key, value, &Admission::UniqueKey).inserted
    }

    /// Insert `(key, value)` unless some value already stored under `key`
    /// satisfies `predicate`. The outcome reports both whether the pair was
    /// installed and whether the predicate fired.
    pub fn conditional_insert(
        &self,
        key: K,
        value: V,
        predicate: impl Fn(&V) -> bool,
    ) -> ConditionalInsert {
        self.insert_impl(key, value, &Admission::Predicate(&predicate))
    }

    fn insert_impl(&self, key: K, value: V, admission: &Admission<'_, V>) -> ConditionalInsert {
        let guard = self.guard();
        let mut pair = (key, value);
        loop {
            // Empty tree: install the first pair as a fresh root leaf.
            if self.current_root().is_null() {
                match self.try_install_root(pair) {
                    Ok(()) => {
                        self.note_pair_added();
                        return ConditionalInsert {
                            inserted: true,
                            predicate_satisfied: false,
                        };
                    }
                    // Lost the race; retry against the new root.
                    Err(returned) => pair = returned,
                }
                continue;
            }

            // Optimistic pass: write latch on the leaf only.
            let Some(leaf_ptr) =
                self.find_leaf_locked(&pair.0, LeafLatchMode::Exclusive, &guard)
            else {
                continue; // root vanished under a concurrent collapse
            };
            // SAFETY: The leaf is exclusively latched by find_leaf_locked.
            let node = unsafe { &*leaf_ptr };
            match Self::admit(node.leaf(), &self.ordering, &pair.0, &pair.1, admission) {
                Verdict::Conflict => {
                    node.latch.unlock_exclusive();
                    return ConditionalInsert {
                        inserted: false,
                        predicate_satisfied: false,
                    };
                }
                Verdict::PredicateHit => {
                    node.latch.unlock_exclusive();
                    return ConditionalInsert {
                        inserted: false,
                        predicate_satisfied: true,
                    };
                }
                Verdict::Admit => {}
            }
            let creates_entry = !node.leaf().has_key(&self.ordering, &pair.0);
            if !(creates_entry && node.will_overflow()) {
                let (key, value) = pair;
                node.leaf_mut().insert(&self.ordering, key, value);
                node.latch.unlock_exclusive();
                self.note_pair_added();
                return ConditionalInsert {
                    inserted: true,
                    predicate_satisfied: false,
                };
            }
            // The leaf would split; restart with write latches on the spine.
            node.latch.unlock_exclusive();
            latch_log!("optimistic insert bailed to pessimistic pass");

            let Some(mut path) = self.find_leaf_write(&pair.0, WriteOp::Insert, &guard) else {
                continue;
            };
            // SAFETY: The path's leaf is exclusively latched.
            let node = unsafe { &*path.last() };
            // Re-check: the world may have changed between the passes.
            match Self::admit(node.leaf(), &self.ordering, &pair.0, &pair.1, admission) {
                Verdict::Conflict => {
                    return ConditionalInsert {
                        inserted: false,
                        predicate_satisfied: false,
                    };
                }
                Verdict::PredicateHit => {
                    return ConditionalInsert {
                        inserted: false,
                        predicate_satisfied: true,
                    };
                }
                Verdict::Admit => {}
            }
            let (key, value) = pair;
            node.leaf_mut().insert(&self.ordering, key, value);
            self.note_pair_added();
            if node.size() == F {
                self.propagate_split(&mut path);
            }
            return ConditionalInsert {
                inserted: true,
                predicate_satisfied: false,
            };
        }
    }

    fn admit(
        leaf: &LeafData<K, V, F>,
        ord: &C,
        key: &K,
        value: &V,
        admission: &Admission<'_, V>,
    ) -> Verdict {
        match admission {
            Admission::UniqueKey if leaf.has_key(ord, key) => return Verdict::Conflict,
            Admission::Predicate(pred) if leaf.satisfies_predicate(ord, key, pred) => {
                return Verdict::PredicateHit;
            }
            _ => {}
        }
        if leaf.has_key_value(ord, key, value) {
            Verdict::Conflict
        } else {
            Verdict::Admit
        }
    }

    /// Install a root leaf holding a single pair, unless someone else
    /// installed a root first.
    fn try_install_root(&self, pair: (K, V)) -> Result<(), (K, V)> {
        let _swap = self.root_latch.lock();
        if !self.current_root().is_null() {
            return Err(pair);
        }
        let leaf = Node::new_leaf();
        leaf.leaf_mut().insert(&self.ordering, pair.0, pair.1);
        self.root
            .store(Node::into_ptr(leaf), std::sync::atomic::Ordering::Release);
        smo_log!("root_install");
        Ok(())
    }

    /// Split the overflowing leaf at the end of `path` and push the promoted
    /// separators upward until an ancestor absorbs one without overflowing.
    /// Every touched node is already exclusively latched in `path`.
    fn propagate_split(&self, path: &mut LatchedPath<K, V, F>) {
        let mut level = path.len() - 1;
        loop {
            let node_ptr = path.node_at(level);
            // SAFETY: Every path node is exclusively latched.
            let node = unsafe { &*node_ptr };
            debug_assert_eq!(node.size(), F, "splitting a node that did not overflow");

            let (middle_key, right_ptr) = if node.is_leaf() {
                self.split_leaf(node_ptr)
            } else {
                Self::split_inner(node_ptr)
            };

            if level == 0 {
                // The overflowing node is the root: grow the tree by one
                // level and publish the new root.
                debug_assert!(std::ptr::eq(self.current_root(), node_ptr));
                let new_root = Node::inner_from_parts(
                    node_ptr,
                    vec![InnerEntry {
                        key: middle_key,
                        child: right_ptr,
                    }],
                );
                self.swap_root(Node::into_ptr(new_root));
                smo_log!("root_split", was_leaf = node.is_leaf());
                return;
            }

            level -= 1;
            // SAFETY: The parent is exclusively latched in the path.
            let parent = unsafe { &*path.node_at(level) };
            parent
                .inner_mut()
                .insert(&self.ordering, middle_key, right_ptr);
            if parent.size() < F {
                return;
            }
            smo_log!("split_cascade", level = level);
        }
    }

    /// Split an overflowing leaf: the upper half moves to a new right leaf
    /// spliced into the sibling chain. Returns the key to promote (the right
    /// leaf's first key) and the new leaf.
    fn split_leaf(&self, node_ptr: NodePtr<K, V, F>) -> (K, NodePtr<K, V, F>) {
        // SAFETY: Exclusively latched by the caller.
        let node = unsafe { &*node_ptr };
        let leaf = node.leaf_mut();
        let upper = leaf.split_upper();
        let middle_key = upper[0].key.clone();
        let old_next = leaf.next;

        let right_ptr = Node::into_ptr(Node::leaf_from_parts(upper, node_ptr, old_next));
        if !old_next.is_null() {
            // The old right neighbor may live under a different parent; its
            // latch alone protects the back-link.
            // SAFETY: Sibling pointers only reference live leaves; ours is
            // latched, so it cannot be unlinked while we read `next`.
            let next_node = unsafe { &*old_next };
            next_node.latch.lock_exclusive();
            next_node.leaf_mut().prev = right_ptr;
            next_node.latch.unlock_exclusive();
        }
        leaf.next = right_ptr;
        (middle_key, right_ptr)
    }

    /// Split an overflowing inner node: the upper half moves to a new right
    /// node whose first entry is popped to seed its leftmost child, its key
    /// becoming the separator to promote.
    fn split_inner(node_ptr: NodePtr<K, V, F>) -> (K, NodePtr<K, V, F>) {
        // SAFETY: Exclusively latched by the caller.
        let node = unsafe { &*node_ptr };
        let upper = node.inner_mut().split_upper();
        let right = Node::inner_from_parts(std::ptr::null_mut(), upper);
        let (middle_key, stale_first) = right.inner_mut().remove_first_entry();
        debug_assert!(stale_first.is_null());
        (middle_key, Node::into_ptr(right))
    }
}
