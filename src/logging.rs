//! Tracing subscriber setup shared by the binaries and integration tests.
//!
//! Filters come from `RUST_LOG` when it parses, otherwise from the given
//! default directive (e.g. `gpusim_atomics=debug,info`).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

pub const DEFAULT_DIRECTIVE: &str = "info";

/// Install a global fmt subscriber. Safe to call more than once; later calls
/// are ignored, which lets every test call it unconditionally.
pub fn init_tracing() {
    init_tracing_with(DEFAULT_DIRECTIVE);
}

pub fn init_tracing_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_span_events(FmtSpan::NONE)
        .try_init();
}
