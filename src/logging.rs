//! Tracing subscriber setup.
//!
//! The core is loaded as a shared library, not run as a standalone binary, so
//! initialization must be idempotent: `Load` calls this, and a second call
//! (e.g. from a test) is a no-op rather than a panic.

use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Install an `EnvFilter`-driven subscriber on stdout. Safe to call more than once.
pub fn init_logging() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("stargz_layer_core=info"));

        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
    });
}

#[cfg(test)]
pub fn init_test_logging() {
    init_logging();
}
