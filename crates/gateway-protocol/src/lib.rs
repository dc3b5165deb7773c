//! # gateway-protocol
//!
//! Wire-format types for the gateway control plane.
//!
//! - [`Frame`]: closed union of `req` / `res` / `event` frames, one per
//!   WebSocket text message
//! - [`ConnectParams`]: parameters of the `connect` handshake request
//! - [`codes`]: machine-readable error codes

#![deny(unsafe_code)]

pub mod codes;
pub mod frame;
pub mod handshake;

pub use frame::{ErrorShape, EventFrame, Frame, FrameError, RequestFrame, ResponseFrame};
pub use handshake::{AuthParams, ClientInfo, ConnectParams, CONNECT_METHOD, PROTOCOL_VERSION};
