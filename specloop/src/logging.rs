//! Development-time tracing for debugging the loop.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of specloop product output.
//!
//! - **Iteration logging (`io/iteration_log`)**: Product artifacts in
//!   `.specloop/iterations/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset, or to
/// `specloop=info` when `verbose` is set (`RUST_LOG` still wins).
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=specloop=debug specloop run --iterations 1
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,specloop=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
