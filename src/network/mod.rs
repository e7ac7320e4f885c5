//! Client-facing network layer
//!
//! Serves the registry to control-system clients over a local stream
//! socket. See [`crate::protocol`] for the frame format.

pub mod server;

pub use self::server::{run, ProtocolServer};
