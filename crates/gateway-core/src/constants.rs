//! Package-level constants.

/// Current version of the gateway client (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform string reported to the gateway (`linux`, `macos`, ...).
pub const PLATFORM: &str = std::env::consts::OS;
