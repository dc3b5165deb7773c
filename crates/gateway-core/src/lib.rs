//! # gateway-core
//!
//! Foundation types shared by every gateway crate:
//!
//! - **Branded IDs**: `RequestId`, `InstanceId` as newtypes for type safety
//! - **Constants**: package name and version reported during the handshake
//! - **Logging**: `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod logging;

pub use ids::{InstanceId, RequestId};
