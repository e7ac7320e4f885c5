//! Client protocol
//!
//! Control-system clients talk to the bridge over a stream socket with a
//! small binary request/response protocol. Every frame is a command byte,
//! a big-endian `u16` payload length and the payload:
//!
//! | request | payload | response |
//! |---|---|---|
//! | `0x00` version | none | `0x01` major, minor, revision |
//! | `0x02` variable list | none | `0x03` one byte per variable |
//! | `0x10` read | id | `0x11` value |
//! | `0x12` read several | ids | `0x13` values, concatenated |
//! | `0x20` write | id, value | `0xE0` |
//!
//! Failed requests are answered with an error code frame (`0xE1`..`0xE6`).

pub mod codec;
pub mod dispatch;
pub mod message;

pub use self::codec::FrameCodec;
pub use self::dispatch::dispatch;
pub use self::message::{ErrorCode, Frame, Request, Response};

/// Command byte plus payload length
pub const HEADER_LEN: usize = 3;

/// Largest payload a frame can carry
pub const MAX_PAYLOAD: usize = u16::MAX as usize;
