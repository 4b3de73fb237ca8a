//! RTP packet header and telephony-event (RFC 2833) payload.

pub mod rtcp;
mod telephone_event;

pub use telephone_event::TelephoneEvent;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// RTP version this crate speaks and accepts; RFC 3550 fixes this at 2.
pub const RTP_VERSION: u8 = 2;

/// Minimum length of a valid RTP datagram (fixed header, no CSRCs/extension).
pub const MIN_RTP_LEN: usize = 12;

/// Minimum length the transport accepts for a UDPTL datagram.
pub const MIN_UDPTL_LEN: usize = 6;

/// Minimum length the transport accepts for an RTCP datagram.
pub const MIN_RTCP_LEN: usize = 8;

/// The 12-byte RTP fixed header plus whatever CSRC/extension fields were present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: RtpSequenceNumber,
    pub timestamp: RtpTimestamp,
    pub ssrc: RtpSsrc,
    pub csrc: Vec<u32>,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence_number: RtpSequenceNumber, timestamp: RtpTimestamp, ssrc: RtpSsrc) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    fn encoded_len(&self) -> usize {
        MIN_RTP_LEN + self.csrc.len() * 4
    }

    /// Parse just the fixed header, CSRC list and extension header,
    /// returning the header plus the byte offset where the payload (or,
    /// for SRTP, the ciphertext) begins. Used directly by the secure layer,
    /// which needs the raw authenticated header bytes before the payload
    /// can be decrypted.
    pub fn parse_with_len(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < MIN_RTP_LEN {
            return Err(Error::Rtp(format!(
                "packet too short: {} < {MIN_RTP_LEN}",
                data.len()
            )));
        }

        let mut buf = Bytes::copy_from_slice(data);
        let first = buf.get_u8();
        let version = first >> 6;
        if version != RTP_VERSION {
            return Err(Error::Rtp(format!("unsupported RTP version {version}")));
        }
        let padding = (first & 0x20) != 0;
        let extension = (first & 0x10) != 0;
        let csrc_count = first & 0x0F;

        let second = buf.get_u8();
        let marker = (second & 0x80) != 0;
        let payload_type = second & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < csrc_count as usize * 4 {
            return Err(Error::Rtp("truncated CSRC list".into()));
        }
        let mut csrc = Vec::with_capacity(csrc_count as usize);
        for _ in 0..csrc_count {
            csrc.push(buf.get_u32());
        }

        if extension {
            if buf.remaining() < 4 {
                return Err(Error::Rtp("truncated extension header".into()));
            }
            let _profile = buf.get_u16();
            let ext_words = buf.get_u16() as usize * 4;
            if buf.remaining() < ext_words {
                return Err(Error::Rtp("truncated extension data".into()));
            }
            buf.advance(ext_words);
        }

        let header_len = data.len() - buf.remaining();
        Ok((
            Self {
                version,
                padding,
                extension,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
            },
            header_len,
        ))
    }
}

/// A decoded RTP packet: header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Reject anything shorter than 12 bytes or not version 2, per the
    /// Transport's receive-path gate (no extension/padding interpretation
    /// is required there, only header validity).
    pub fn is_plausible_rtp(data: &[u8]) -> bool {
        data.len() >= MIN_RTP_LEN && (data[0] >> 6) == RTP_VERSION
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, header_len) = RtpHeader::parse_with_len(data)?;
        Self::from_header_and_raw_payload(header, Bytes::copy_from_slice(&data[header_len..]))
    }

    /// Build a packet from an already-parsed header and the raw bytes that
    /// followed it on the wire, stripping padding per the header's padding
    /// flag. Used directly by the secure layer after SRTP decryption, where
    /// the header was parsed separately from the (then-encrypted) payload.
    pub fn from_header_and_raw_payload(header: RtpHeader, mut buf: Bytes) -> Result<Self> {
        let payload = if header.padding && !buf.is_empty() {
            let pad_len = buf[buf.remaining() - 1] as usize;
            if pad_len == 0 || pad_len > buf.remaining() {
                return Err(Error::Rtp("invalid padding length".into()));
            }
            buf.slice(0..buf.remaining() - pad_len)
        } else {
            buf
        };
        Ok(Self { header, payload })
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.encoded_len() + self.payload.len());
        buf.extend_from_slice(&self.serialize_header());
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Serialize just the fixed header plus CSRC list -- the authenticated
    /// region an SRTP context needs before it can encrypt or verify the
    /// payload that follows. No extension header is ever written here.
    pub fn serialize_header(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.encoded_len());

        let first = (self.header.version << 6)
            | (if self.header.padding { 1 << 5 } else { 0 })
            | (if self.header.extension { 1 << 4 } else { 0 })
            | (self.header.csrc.len() as u8 & 0x0F);
        buf.put_u8(first);

        let second = (if self.header.marker { 1 << 7 } else { 0 }) | (self.header.payload_type & 0x7F);
        buf.put_u8(second);

        buf.put_u16(self.header.sequence_number);
        buf.put_u32(self.header.timestamp);
        buf.put_u32(self.header.ssrc);
        for csrc in &self.header.csrc {
            buf.put_u32(*csrc);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_basic_packet() {
        let header = RtpHeader::new(8, 1000, 16000, 0x1122_3344);
        let packet = RtpPacket::new(header, Bytes::from_static(b"payload"));
        let wire = packet.serialize();
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn rejects_short_packets() {
        assert!(RtpPacket::parse(&[0; 11]).is_err());
    }

    #[test]
    fn rejects_wrong_version() {
        let mut wire = vec![0u8; 12];
        wire[0] = 0xC0; // version 3
        assert!(!RtpPacket::is_plausible_rtp(&wire));
        assert!(RtpPacket::parse(&wire).is_err());
    }

    #[test]
    fn strips_padding() {
        let mut header = RtpHeader::new(0, 1, 0, 1);
        header.padding = true;
        let mut packet = RtpPacket::new(header, Bytes::new());
        // payload "ab" + 2 padding bytes, last byte = pad length (2)
        packet.payload = Bytes::from_static(&[b'a', b'b', 0, 2]);
        let wire = packet.serialize();
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed.payload, Bytes::from_static(b"ab"));
    }
}
