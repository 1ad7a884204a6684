//! Structured logging initialisation.
//!
//! The embedding application calls [`init`] once at startup. Filtering is
//! controlled via `RUST_LOG`; set `SWAPFARM_LOG_JSON` for JSON output.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the `tracing` subscriber. Safe to call once per process.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("swapfarm=info"));

    let json_logging = std::env::var("SWAPFARM_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
