//! Tunables for the core. There is no on-disk config file for this library —
//! the host process builds a `Config` and threads it through `Load`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Per-HTTP-request timeout for range fetches (spec default: 300s).
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(300),
        }
    }
}
