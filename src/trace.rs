//! Structured logging for the latch protocol.
//!
//! The only events worth recording in this tree are rare by design, so the
//! macros are shaped around them rather than around log levels:
//!
//! * [`smo_log!`] — a structure-modifying operation: a split, borrow,
//!   coalesce, root install/swap, or collapse. Emits a `debug` event under
//!   the `crabtree::smo` target with a mandatory `smo` kind field plus
//!   whatever the site knows (cascade level, node kind).
//! * [`latch_log!`] — latch-protocol detail: retained-path sizes, the
//!   optimistic-to-pessimistic restart. Emits a `trace` event under the
//!   `crabtree::latch` target.
//!
//! Without the `tracing` feature (the default) both expand to nothing, so
//! the hot traversal paths carry no logging overhead.
//!
//! ```bash
//! # Watch splits and merges while a stress test runs:
//! RUST_LOG=crabtree::smo=debug cargo test --features tracing stress
//! ```

#![allow(unused_macros, unused_imports)]

/// Record a structure-modifying operation, e.g.
/// `smo_log!("split_cascade", level = level)`.
#[cfg(feature = "tracing")]
macro_rules! smo_log {
    ($smo:literal $(, $field:ident = $value:expr)* $(,)?) => {
        tracing::debug!(target: "crabtree::smo", smo = $smo $(, $field = $value)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! smo_log {
    ($smo:literal $(, $field:ident = $value:expr)* $(,)?) => {};
}

/// Record a latch-protocol event with optional structured fields.
#[cfg(feature = "tracing")]
macro_rules! latch_log {
    ($($arg:tt)*) => {
        tracing::trace!(target: "crabtree::latch", $($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! latch_log {
    ($($arg:tt)*) => {};
}

pub(crate) use latch_log;
pub(crate) use smo_log;
