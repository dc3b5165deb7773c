//! # gateway-settings
//!
//! Configuration for the gateway client, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **User file**: `~/.gateway/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `GATEWAY_*` overrides (highest priority)
//!
//! The loaded value is an ordinary struct; the binary builds it once at
//! startup and hands it to the client.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
