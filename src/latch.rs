//! Per-node reader-writer latch.
//!
//! Crab latching acquires a latch on a child before releasing the parent, so
//! latch lifetimes do not nest lexically and RAII guards cannot express them.
//! [`RwLatch`] therefore wraps `parking_lot::RawRwLock` with explicit
//! lock/unlock calls; every call site is responsible for pairing them, and the
//! traversal path type ([`crate::tree::traverse::LatchedPath`]) releases
//! whatever is still held when a mutation exits.
//!
//! The latch is unfair and not upgradable. Upgrades are never needed: the
//! insert path releases its read latches and restarts the traversal with
//! write latches instead (the pessimistic retry).

use parking_lot::RawRwLock;
use parking_lot::lock_api::RawRwLock as RawRwLockApi;

/// A reader-writer latch embedded in every tree node.
pub(crate) struct RwLatch {
    raw: RawRwLock,
}

impl RwLatch {
    pub(crate) const fn new() -> Self {
        Self {
            raw: <RawRwLock as RawRwLockApi>::INIT,
        }
    }

    /// Acquire the latch in shared mode, blocking.
    #[inline(always)]
    pub(crate) fn lock_shared(&self) {
        self.raw.lock_shared();
    }

    /// Try to acquire the latch in shared mode without blocking.
    #[inline(always)]
    pub(crate) fn try_lock_shared(&self) -> bool {
        self.raw.try_lock_shared()
    }

    /// Release a shared hold. The caller must hold the latch in shared mode.
    #[inline(always)]
    pub(crate) fn unlock_shared(&self) {
        // SAFETY: Latch discipline — callers pair every unlock with a prior
        // lock in the same mode.
        unsafe { self.raw.unlock_shared() };
    }

    /// Acquire the latch in exclusive mode, blocking.
    #[inline(always)]
    pub(crate) fn lock_exclusive(&self) {
        self.raw.lock_exclusive();
    }

    /// Try to acquire the latch in exclusive mode without blocking.
    #[inline(always)]
    pub(crate) fn try_lock_exclusive(&self) -> bool {
        self.raw.try_lock_exclusive()
    }

    /// Release an exclusive hold. The caller must hold the latch exclusively.
    #[inline(always)]
    pub(crate) fn unlock_exclusive(&self) {
        // SAFETY: Latch discipline — callers pair every unlock with a prior
        // lock in the same mode.
        unsafe { self.raw.unlock_exclusive() };
    }
}

impl std::fmt::Debug for RwLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RwLatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_holds_exclude_writers() {
        let latch = RwLatch::new();
        latch.lock_shared();
        assert!(latch.try_lock_shared(), "readers share");
        assert!(!latch.try_lock_exclusive(), "writer excluded");
        latch.unlock_shared();
        latch.unlock_shared();
        assert!(latch.try_lock_exclusive());
        latch.unlock_exclusive();
    }

    #[test]
    fn exclusive_hold_excludes_everyone() {
        let latch = RwLatch::new();
        latch.lock_exclusive();
        assert!(!latch.try_lock_shared());
        assert!(!latch.try_lock_exclusive());
        latch.unlock_exclusive();
        assert!(latch.try_lock_shared());
        latch.unlock_shared();
    }

    #[test]
    fn contended_exclusive_hand_off() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Shared {
            latch: RwLatch,
            counter: AtomicUsize,
        }

        let shared = Arc::new(Shared {
            latch: RwLatch::new(),
            counter: AtomicUsize::new(0),
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        shared.latch.lock_exclusive();
                        let v = shared.counter.load(Ordering::Relaxed);
                        shared.counter.store(v + 1, Ordering::Relaxed);
                        shared.latch.unlock_exclusive();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(shared.counter.load(Ordering::Relaxed), 4000);
    }
}
