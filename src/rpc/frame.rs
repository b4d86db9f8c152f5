// src/rpc/frame.rs

//! Length-prefixed RPC framing:
//! `[magic:4][channel:1][func_id:4][payload_len:4][payload:N]`, with
//! responses carrying an additional leading `[status:1]` ahead of the
//! payload. Implemented as a `tokio_util::codec::{Encoder,Decoder}` pair,
//! the same shape as the teacher's `RespFrameCodec`.

use crate::errors::{Result, RidgeError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const MAGIC: u32 = 0x5249_4447; // "RIDG"
const HEADER_LEN: usize = 4 + 1 + 4 + 4;
const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Data = 0,
    Ingress = 1,
}

impl Channel {
    fn from_u8(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Channel::Data),
            1 => Ok(Channel::Ingress),
            other => Err(RidgeError::Protocol(format!("unknown channel byte {other}"))),
        }
    }
}

/// A decoded request frame. Requests carry no status byte.
#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub channel: Channel,
    pub func_id: u32,
    pub payload: Bytes,
}

/// A decoded response frame, with the leading status byte already split out.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub channel: Channel,
    pub func_id: u32,
    pub status: u8,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
pub struct RequestCodec;

impl Encoder<RequestFrame> for RequestCodec {
    type Error = RidgeError;

    fn encode(&mut self, item: RequestFrame, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(RidgeError::Invalid("payload too large".into()));
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u32(MAGIC);
        dst.put_u8(item.channel as u8);
        dst.put_u32(item.func_id);
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for RequestCodec {
    type Item = RequestFrame;
    type Error = RidgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RequestFrame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let magic = u32::from_be_bytes(src[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(RidgeError::Protocol("bad magic".into()));
        }
        let channel = Channel::from_u8(src[4])?;
        let func_id = u32::from_be_bytes(src[5..9].try_into().unwrap());
        let payload_len = u32::from_be_bytes(src[9..13].try_into().unwrap()) as usize;
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(RidgeError::Invalid("payload too large".into()));
        }
        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len).freeze();
        Ok(Some(RequestFrame {
            channel,
            func_id,
            payload,
        }))
    }
}

#[derive(Debug, Default)]
pub struct ResponseCodec;

impl Encoder<ResponseFrame> for ResponseCodec {
    type Error = RidgeError;

    fn encode(&mut self, item: ResponseFrame, dst: &mut BytesMut) -> Result<()> {
        let payload_len = 1 + item.payload.len();
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(RidgeError::Invalid("payload too large".into()));
        }
        dst.reserve(HEADER_LEN + payload_len);
        dst.put_u32(MAGIC);
        dst.put_u8(item.channel as u8);
        dst.put_u32(item.func_id);
        dst.put_u32(payload_len as u32);
        dst.put_u8(item.status);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for ResponseCodec {
    type Item = ResponseFrame;
    type Error = RidgeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ResponseFrame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let magic = u32::from_be_bytes(src[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(RidgeError::Protocol("bad magic".into()));
        }
        let channel = Channel::from_u8(src[4])?;
        let func_id = u32::from_be_bytes(src[5..9].try_into().unwrap());
        let payload_len = u32::from_be_bytes(src[9..13].try_into().unwrap()) as usize;
        if payload_len == 0 || payload_len > MAX_PAYLOAD_BYTES {
            return Err(RidgeError::Protocol("response missing status byte".into()));
        }
        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let mut body = src.split_to(payload_len);
        let status = body.get_u8();
        Ok(Some(ResponseFrame {
            channel,
            func_id,
            status,
            payload: body.freeze(),
        }))
    }
}
