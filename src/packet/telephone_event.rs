//! RFC 2833 telephony-event payload (DTMF and friends).
//!
//! The payload is 4 bytes: event code, end-bit + reserved-bit + volume,
//! duration (16 bits, in timestamp units of the event payload's clock).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::Result;

/// Length in bytes of a telephony-event payload.
pub const TELEPHONE_EVENT_LEN: usize = 4;

/// A decoded telephony-event (RFC 2833 / RFC 4733) payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelephoneEvent {
    pub event: u8,
    pub end: bool,
    pub volume: u8,
    pub duration: u16,
}

impl TelephoneEvent {
    pub fn new(event: u8, duration: u16) -> Self {
        Self { event, end: false, volume: 0, duration }
    }

    /// Map a DTMF key character to its RFC 2833 event code.
    ///
    /// `0`-`9` map to `0`-`9`, `*` to 10, `#` to 11, `A`-`D` to 12-15.
    pub fn event_code_for_key(key: char) -> Result<u8> {
        match key {
            '0'..='9' => Ok(key as u8 - b'0'),
            '*' => Ok(10),
            '#' => Ok(11),
            'A'..='D' => Ok(12 + (key as u8 - b'A')),
            _ => Err(Error::Rtp(format!("not a DTMF key: {key:?}"))),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < TELEPHONE_EVENT_LEN {
            return Err(Error::BufferTooSmall {
                required: TELEPHONE_EVENT_LEN,
                available: data.len(),
            });
        }
        let mut buf = Bytes::copy_from_slice(&data[..TELEPHONE_EVENT_LEN]);
        let event = buf.get_u8();
        let flags = buf.get_u8();
        let end = (flags & 0x80) != 0;
        let volume = flags & 0x3F;
        let duration = buf.get_u16();
        Ok(Self { event, end, volume, duration })
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TELEPHONE_EVENT_LEN);
        buf.put_u8(self.event);
        buf.put_u8((if self.end { 0x80 } else { 0 }) | (self.volume & 0x3F));
        buf.put_u16(self.duration);
        buf.freeze()
    }
}
