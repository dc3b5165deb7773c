//! `tracing` subscriber setup for binaries built on the client, plus an
//! in-memory capture for asserting on log output in tests.

pub mod capture;

pub use capture::{CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Install a compact stderr subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Only the first call in a
/// process installs anything.
pub fn init_subscriber(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
