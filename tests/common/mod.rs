//! Shared test utilities.
//!
//! `init_tracing()` installs a console subscriber once per test binary. It
//! only does anything when the crate is built with the `tracing` feature;
//! filter with `RUST_LOG`, e.g.:
//!
//! ```bash
//! RUST_LOG=crabtree=trace cargo test --features tracing stress
//! ```

#![allow(dead_code)]

use std::sync::Once;

static INIT: Once = Once::new();

/// Install the tracing subscriber. Safe to call from every test; only the
/// first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
