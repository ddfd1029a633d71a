//! Diagnostics for operators and developers.
//!
//! - **Tracing (this module)**: `RUST_LOG`-filtered diagnostics on stderr.
//! - **Cycle logs (`io/cycle_log`)**: Product artifacts in
//!   `.buildloop/cycles/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info` so cycle progress is visible.
///
/// # Example
/// ```bash
/// RUST_LOG=buildloop=debug buildloop run "a snake game"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
