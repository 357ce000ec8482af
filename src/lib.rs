//! # crabtree
//!
//! A concurrent, ordered, multi-valued in-memory index: a B+ tree with
//! crab latching, built to sit beneath a relational secondary index.
//!
//! - One tree is shared by all threads of a process; point reads, range
//!   scans, inserts and deletes run concurrently.
//! - Keys are ordered by a caller-supplied comparator ([`KeyOrdering`]);
//!   each key maps to a duplicate-free set of values.
//! - Inserts optionally enforce key uniqueness or an arbitrary predicate
//!   over the key's existing values.
//!
//! ## Design
//!
//! - Every node carries a reader-writer latch; traversals latch a child
//!   before releasing its parent (latch crabbing).
//! - Mutations try an optimistic pass first (read latches down, write latch
//!   on the leaf) and only fall back to write-latching the spine when the
//!   leaf could split or merge.
//! - Unlinked nodes are retired through [`seize`] rather than freed, so a
//!   traversal racing a root swap or a coalesce never touches freed memory.
//!
//! ## Example
//!
//! ```
//! use crabtree::BPlusTree;
//!
//! let tree: BPlusTree<u64, u64> = BPlusTree::new();
//! for k in 0..100 {
//!     tree.insert(k, k * 10);
//! }
//! assert_eq!(tree.values(&42), vec![420]);
//!
//! let keys: Vec<u64> = tree.begin_at(&95).map(|(k, _)| k).collect();
//! assert_eq!(keys, vec![95, 96, 97, 98, 99]);
//! ```

mod inner;
mod latch;
mod leaf;
mod node;
pub mod ordering;
pub(crate) mod trace;
pub mod tree;

pub use ordering::{KeyOrdering, NaturalOrder};
pub use tree::{BPlusTree, ConditionalInsert, IndexIterator};
