//! Length-prefixed frame decoder shared by both link directions.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use contracts::{DownlinkHeader, UplinkHeader, DOWNLINK_HEADER_LEN, UPLINK_HEADER_LEN};

use crate::{FramingError, Result};

/// Fixed-size header that declares its payload length
pub trait WireHeader: Copy {
    const LEN: usize;

    fn parse(buf: &[u8]) -> Option<Self>;

    fn payload_len(&self) -> usize;
}

impl WireHeader for UplinkHeader {
    const LEN: usize = UPLINK_HEADER_LEN;

    fn parse(buf: &[u8]) -> Option<Self> {
        Self::decode(buf)
    }

    fn payload_len(&self) -> usize {
        self.payload_len as usize
    }
}

impl WireHeader for DownlinkHeader {
    const LEN: usize = DOWNLINK_HEADER_LEN;

    fn parse(buf: &[u8]) -> Option<Self> {
        Self::decode(buf)
    }

    fn payload_len(&self) -> usize {
        self.payload_len as usize
    }
}

/// Growable byte queue yielding one complete message at a time.
///
/// Consumed messages are split off the front, so leftover bytes never need
/// shifting by hand.
#[derive(Debug)]
pub struct FrameDecoder<H> {
    buf: BytesMut,
    max_message_bytes: usize,
    _header: PhantomData<H>,
}

impl<H: WireHeader> FrameDecoder<H> {
    /// `max_message_bytes` bounds header + payload
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_message_bytes,
            _header: PhantomData,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes waiting to be decoded
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Payload bytes buffered behind the current header
    pub fn buffered_payload(&self) -> usize {
        self.buf.len().saturating_sub(H::LEN)
    }

    pub fn peek_header(&self) -> Option<H> {
        H::parse(&self.buf)
    }

    /// Pop the next complete message, if one is fully buffered.
    ///
    /// An oversized declaration is an error: the stream can no longer be
    /// trusted to resynchronise.
    pub fn try_decode_one(&mut self) -> Result<Option<(H, Bytes)>> {
        let Some(header) = self.peek_header() else {
            return Ok(None);
        };
        let total = H::LEN + header.payload_len();
        if total > self.max_message_bytes {
            return Err(FramingError::MessageTooLarge {
                declared: total,
                limit: self.max_message_bytes,
            });
        }
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }

        let mut message = self.buf.split_to(total);
        let payload = message.split_off(H::LEN).freeze();
        Ok(Some((header, payload)))
    }
}
