//! Leaf node operations.
//!
//! All methods operate on [`LeafData`] while the caller holds the owning
//! node's latch in the appropriate mode; none of them touch latches or
//! sibling nodes themselves. Chain splicing during split and coalesce happens
//! in the tree layer, which can latch the affected neighbor.

use crate::node::{LeafData, LeafEntry, lower_bound_by};
use crate::ordering::KeyOrdering;

impl<K, V, const F: usize> LeafData<K, V, F> {
    /// Lower-bound position for `key`: the first index whose key is not less
    /// than `key`. This is both the lookup probe and the insert position.
    #[inline]
    pub(crate) fn position_to_insert<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> usize {
        lower_bound_by(&self.entries, ord, key, |e| &e.key)
    }

    /// Index of the entry whose key equals `key`, if present.
    #[inline]
    pub(crate) fn entry_index<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> Option<usize> {
        let pos = self.position_to_insert(ord, key);
        (pos < self.entries.len() && ord.equal(&self.entries[pos].key, key)).then_some(pos)
    }

    pub(crate) fn has_key<C: KeyOrdering<K>>(&self, ord: &C, key: &K) -> bool {
        self.entry_index(ord, key).is_some()
    }

    pub(crate) fn has_key_value<C: KeyOrdering<K>>(&self, ord: &C, key: &K, value: &V) -> bool
    where
        V: Eq,
    {
        self.entry_index(ord, key)
            .is_some_and(|i| self.entries[i].values.contains(value))
    }

    /// Insert `value` under `key`: into the existing entry's value set when
    /// the key is present, otherwise as a new singleton entry at the sorted
    /// position.
    ///
    /// The caller has already rejected exact `(key, value)` duplicates, so
    /// this never double-inserts into a value set.
    pub(crate) fn insert<C: KeyOrdering<K>>(&mut self, ord: &C, key: K, value: V)
    where
        V: Eq,
    {
        let pos = self.position_to_insert(ord, &key);
        if pos < self.entries.len() && ord.equal(&self.entries[pos].key, &key) {
            let values = &mut self.entries[pos].values;
            debug_assert!(!values.contains(&value), "duplicate pair reached leaf insert");
            values.push(value);
        } else {
            self.entries.insert(
                pos,
                LeafEntry {
                    key,
                    values: vec![value],
                },
            );
        }
    }

    /// Remove `value` from the entry for `key`; the entry itself is erased
    /// once its value set empties, so no leaf ever retains an empty set.
    ///
    /// Returns `true` iff the whole entry disappeared (the leaf shrank).
    pub(crate) fn delete_entry<C: KeyOrdering<K>>(&mut self, ord: &C, key: &K, value: &V) -> bool
    where
        V: Eq,
    {
        let idx = self
            .entry_index(ord, key)
            .expect("delete_entry: key not present");
        let values = &mut self.entries[idx].values;
        let vpos = values
            .iter()
            .position(|v| v == value)
            .expect("delete_entry: value not present");
        values.remove(vpos);
        if values.is_empty() {
            self.entries.remove(idx);
            true
        } else {
            false
        }
    }

    /// Append every value stored under `key` to `out`.
    pub(crate) fn scan_values<C: KeyOrdering<K>>(&self, ord: &C, key: &K, out: &mut Vec<V>)
    where
        V: Clone,
    {
        if let Some(idx) = self.entry_index(ord, key) {
            out.extend(self.entries[idx].values.iter().cloned());
        }
    }

    /// True iff some value stored under `key` satisfies `predicate`.
    pub(crate) fn satisfies_predicate<C: KeyOrdering<K>>(
        &self,
        ord: &C,
        key: &K,
        predicate: &dyn Fn(&V) -> bool,
    ) -> bool {
        self.entry_index(ord, key)
            .is_some_and(|i| self.entries[i].values.iter().any(predicate))
    }

    /// Take the first entry out. Used when borrowing from a right sibling.
    #[inline]
    pub(crate) fn remove_first_entry(&mut self) -> LeafEntry<K, V> {
        self.entries.remove(0)
    }

    /// Take the last entry out. Used when borrowing from a left sibling.
    #[inline]
    pub(crate) fn remove_last_entry(&mut self) -> LeafEntry<K, V> {
        self.entries.pop().expect("remove_last_entry on empty leaf")
    }

    /// Detach the upper half of the entries for a split. The lower
    /// `MIN_KEYS_LEAF` entries stay; the rest move out in order.
    pub(crate) fn split_upper(&mut self) -> Vec<LeafEntry<K, V>> {
        debug_assert!(self.entries.len() == F, "split on a leaf that is not overflowing");
        self.entries.split_off(F / 2)
    }

    /// Total `(key, value)` pairs stored in this leaf.
    pub(crate) fn pair_count(&self) -> usize {
        self.entries.iter().map(|e| e.values.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::ordering::NaturalOrder;

    fn leaf_with(keys: &[u64]) -> LeafData<u64, u64, 10> {
        let mut leaf = LeafData {
            entries: Vec::new(),
            prev: std::ptr::null_mut(),
            next: std::ptr::null_mut(),
        };
        for &k in keys {
            leaf.insert(&NaturalOrder, k, k);
        }
        leaf
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let leaf = leaf_with(&[5, 1, 9, 3, 7]);
        let keys: Vec<u64> = leaf.entries.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn insert_same_key_grows_value_set() {
        let ord = NaturalOrder;
        let mut leaf = leaf_with(&[4]);
        leaf.insert(&ord, 4, 44);
        leaf.insert(&ord, 4, 444);
        assert_eq!(leaf.entries.len(), 1);
        assert_eq!(leaf.entries[0].values, vec![4, 44, 444]);
        assert_eq!(leaf.pair_count(), 3);
    }

    #[test]
    fn lookup_probes() {
        let ord = NaturalOrder;
        let leaf = leaf_with(&[2, 4, 6]);
        assert_eq!(leaf.position_to_insert(&ord, &1), 0);
        assert_eq!(leaf.position_to_insert(&ord, &4), 1);
        assert_eq!(leaf.position_to_insert(&ord, &5), 2);
        assert_eq!(leaf.position_to_insert(&ord, &7), 3);
        assert!(leaf.has_key(&ord, &4));
        assert!(!leaf.has_key(&ord, &5));
        assert!(leaf.has_key_value(&ord, &4, &4));
        assert!(!leaf.has_key_value(&ord, &4, &5));
    }

    #[test]
    fn delete_value_then_entry() {
        let ord = NaturalOrder;
        let mut leaf = leaf_with(&[4]);
        leaf.insert(&ord, 4, 44);

        assert!(!leaf.delete_entry(&ord, &4, &44), "entry survives");
        assert_eq!(leaf.entries[0].values, vec![4]);

        assert!(leaf.delete_entry(&ord, &4, &4), "entry gone");
        assert!(leaf.entries.is_empty());
    }

    #[test]
    fn predicate_scans_all_values() {
        let ord = NaturalOrder;
        let mut leaf = leaf_with(&[4]);
        leaf.insert(&ord, 4, 44);
        assert!(leaf.satisfies_predicate(&ord, &4, &|v| *v == 44));
        assert!(!leaf.satisfies_predicate(&ord, &4, &|v| *v == 45));
        assert!(!leaf.satisfies_predicate(&ord, &5, &|_| true));
    }

    #[test]
    fn scan_values_appends() {
        let ord = NaturalOrder;
        let mut leaf = leaf_with(&[4]);
        leaf.insert(&ord, 4, 44);
        let mut out = vec![99];
        leaf.scan_values(&ord, &4, &mut out);
        assert_eq!(out, vec![99, 4, 44]);
    }

    #[test]
    fn split_moves_upper_half() {
        let mut leaf = leaf_with(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let upper = leaf.split_upper();
        assert_eq!(leaf.entries.len(), Node::<u64, u64, 10>::MIN_KEYS_LEAF);
        assert_eq!(upper.len(), 5);
        assert_eq!(leaf.entries.last().unwrap().key, 4);
        assert_eq!(upper[0].key, 5);
    }

    #[test]
    fn borrow_helpers_take_boundary_entries() {
        let mut leaf = leaf_with(&[1, 2, 3]);
        assert_eq!(leaf.remove_first_entry().key, 1);
        assert_eq!(leaf.remove_last_entry().key, 3);
        assert_eq!(leaf.entries.len(), 1);
    }
}
