//! Structured logging bootstrap.
//!
//! One global subscriber per process, same as the teacher's server binaries
//! — the host application calls this once at start-up. `RUST_LOG` (via
//! `EnvFilter`) controls verbosity; defaults to `info` for this crate family
//! and `warn` elsewhere so a quiet host doesn't get flooded by dependencies.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the global `tracing` subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,mi_core=info,mi_crypto=info,mi_transport=info,mi_store=info,mi_client=info"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .ok();
    });
}
