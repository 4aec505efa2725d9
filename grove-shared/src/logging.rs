//! Process-wide `tracing` subscriber setup.
//!
//! Respects `RUST_LOG` via `EnvFilter`, defaults to `info`, and switches to
//! JSON formatting when `GROVE_LOG_FORMAT=json` so a node can be run either
//! for a human at a terminal or piped into a log aggregator.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global tracing subscriber. Safe to call more than once;
/// subsequent calls are no-ops (mirrors `tracing_subscriber`'s own guard).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("GROVE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    let result = if use_json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    if let Err(err) = result {
        // Another subscriber is already installed (e.g. in tests); that is
        // fine, just note it at the default logger.
        eprintln!("grove: tracing already initialized: {err}");
    }
}
