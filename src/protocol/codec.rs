use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::Error;
use super::message::Frame;
use super::{HEADER_LEN, MAX_PAYLOAD};

/// Frame codec for the client socket: `command:u8 | length:u16 BE | payload`
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        let command = src.get_u8();
        src.advance(2);
        let payload = src.split_to(length).freeze();
        Ok(Some(Frame { command, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > MAX_PAYLOAD {
            return Err(Error::protocol(format!(
                "payload of {} bytes exceeds {}",
                item.payload.len(),
                MAX_PAYLOAD
            )));
        }

        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u8(item.command);
        dst.put_u16(item.payload.len() as u16);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}
