use bytes::{BufMut, Bytes, BytesMut};

use crate::core::Error;
use crate::registry::{SlotInfo, VarId};

pub const CMD_QUERY_VERSION: u8 = 0x00;
pub const CMD_VERSION: u8 = 0x01;
pub const CMD_QUERY_VARIABLES: u8 = 0x02;
pub const CMD_VARIABLES: u8 = 0x03;
pub const CMD_READ_VARIABLE: u8 = 0x10;
pub const CMD_VARIABLE_VALUE: u8 = 0x11;
pub const CMD_READ_VARIABLES: u8 = 0x12;
pub const CMD_VARIABLE_VALUES: u8 = 0x13;
pub const CMD_WRITE_VARIABLE: u8 = 0x20;
pub const CMD_OK: u8 = 0xE0;

/// Bit set in a variable list entry for client-writable slots
pub const WRITABLE_BIT: u8 = 0x80;

/// One unit on the client socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(command: u8, payload: impl Into<Bytes>) -> Self {
        Frame {
            command,
            payload: payload.into(),
        }
    }

    /// Frame without payload
    pub fn empty(command: u8) -> Self {
        Frame::new(command, Bytes::new())
    }
}

/// Error codes sent back in place of a regular response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// Payload does not fit the command
    Malformed = 0xE1,
    /// Unknown command
    Unsupported = 0xE2,
    /// No such variable
    InvalidId = 0xE3,
    /// Written value does not match the slot size
    InvalidSize = 0xE5,
    /// Slot is not writable by clients
    ReadOnly = 0xE6,
}

impl ErrorCode {
    /// Maps a registry error onto the code reported to the client
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::UnknownVariable(_) => ErrorCode::InvalidId,
            Error::SizeMismatch { .. } => ErrorCode::InvalidSize,
            Error::ReadOnly(_) => ErrorCode::ReadOnly,
            _ => ErrorCode::Malformed,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Client requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Protocol version query
    QueryVersion,
    /// Variable layout query
    QueryVariables,
    /// Read of one variable
    ReadVariable(VarId),
    /// Read of several variables, answered from one snapshot
    ReadVariables(Vec<VarId>),
    /// Replacement of one writable variable
    WriteVariable {
        id: VarId,
        value: Bytes,
    },
}

impl Request {
    /// Interprets a received frame
    pub fn from_frame(frame: &Frame) -> std::result::Result<Self, ErrorCode> {
        let payload = &frame.payload;
        match frame.command {
            CMD_QUERY_VERSION if payload.is_empty() => Ok(Request::QueryVersion),
            CMD_QUERY_VARIABLES if payload.is_empty() => Ok(Request::QueryVariables),
            CMD_READ_VARIABLE if payload.len() == 1 => Ok(Request::ReadVariable(VarId::new(payload[0]))),
            CMD_READ_VARIABLES if !payload.is_empty() => Ok(Request::ReadVariables(
                payload.iter().copied().map(VarId::new).collect(),
            )),
            CMD_WRITE_VARIABLE if payload.len() >= 2 => Ok(Request::WriteVariable {
                id: VarId::new(payload[0]),
                value: payload.slice(1..),
            }),
            CMD_QUERY_VERSION | CMD_QUERY_VARIABLES | CMD_READ_VARIABLE | CMD_READ_VARIABLES
            | CMD_WRITE_VARIABLE => Err(ErrorCode::Malformed),
            _ => Err(ErrorCode::Unsupported),
        }
    }

    /// Builds the frame a client sends for this request
    pub fn to_frame(&self) -> Frame {
        match self {
            Request::QueryVersion => Frame::empty(CMD_QUERY_VERSION),
            Request::QueryVariables => Frame::empty(CMD_QUERY_VARIABLES),
            Request::ReadVariable(id) => Frame::new(CMD_READ_VARIABLE, vec![id.raw()]),
            Request::ReadVariables(ids) => Frame::new(
                CMD_READ_VARIABLES,
                ids.iter().map(|id| id.raw()).collect::<Vec<u8>>(),
            ),
            Request::WriteVariable { id, value } => {
                let mut payload = BytesMut::with_capacity(1 + value.len());
                payload.put_u8(id.raw());
                payload.extend_from_slice(value);
                Frame::new(CMD_WRITE_VARIABLE, payload.freeze())
            }
        }
    }
}

/// Server responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Version([u8; 3]),
    Variables(Vec<SlotInfo>),
    Value(Vec<u8>),
    Values(Vec<u8>),
    Ok,
    Error(ErrorCode),
}

impl Response {
    pub fn into_frame(self) -> Frame {
        match self {
            Response::Version(version) => Frame::new(CMD_VERSION, version.to_vec()),
            Response::Variables(slots) => Frame::new(
                CMD_VARIABLES,
                slots.iter().map(describe_slot).collect::<Vec<u8>>(),
            ),
            Response::Value(bytes) => Frame::new(CMD_VARIABLE_VALUE, bytes),
            Response::Values(bytes) => Frame::new(CMD_VARIABLE_VALUES, bytes),
            Response::Ok => Frame::empty(CMD_OK),
            Response::Error(code) => Frame::empty(code.code()),
        }
    }
}

/// Variable list entry: writable flag in bit 7, size in bits 0-6
fn describe_slot(slot: &SlotInfo) -> u8 {
    let flag = if slot.writable { WRITABLE_BIT } else { 0 };
    flag | (slot.size as u8 & !WRITABLE_BIT)
}
