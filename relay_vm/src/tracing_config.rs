//! Tracing configuration.
//!
//! ```bash
//! # Generator state transitions and delegation routing
//! RELAY_LOG=relay_vm=trace cargo test -p relay_vm
//!
//! # Lowering decisions only
//! RELAY_LOG=relay_compiler=debug cargo test -p relay_compiler
//! ```
//!
//! The subscriber is only installed when `RELAY_LOG` (or `RUST_LOG`) is
//! set, so there is no cost in normal runs.

use tracing_subscriber::EnvFilter;

/// Build an `EnvFilter` from `RELAY_LOG`, falling back to `RUST_LOG`.
fn build_filter() -> EnvFilter {
    match std::env::var("RELAY_LOG") {
        Ok(val) => EnvFilter::builder().parse_lossy(val),
        Err(_) => EnvFilter::from_default_env(),
    }
}

/// Install the global fmt subscriber, writing to stderr.
///
/// Does nothing when neither variable is set. Safe to call more than once;
/// later calls leave the first subscriber in place.
pub fn init_tracing() {
    let has_relay_log = std::env::var("RELAY_LOG").is_ok();
    let has_rust_log = std::env::var("RUST_LOG").is_ok();
    if !has_relay_log && !has_rust_log {
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter())
        .with_writer(std::io::stderr)
        .try_init();
}
