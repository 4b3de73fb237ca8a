//! RTCP packet types (RFC 3550 section 6)
//!
//! The media core only ever needs RTCP for two things: gating datagrams by
//! length before handing them to a [`Processor`](crate::group::Processor),
//! and, on the send side, periodically reporting reception quality. Full
//! SDES/BYE/APP parsing is left to callers that need it; this module covers
//! the common header plus Sender/Receiver Reports.

mod ntp;
mod report_block;
mod receiver_report;
mod sender_report;

pub use ntp::NtpTimestamp;
pub use report_block::RtcpReportBlock;
pub use receiver_report::{parse_receiver_report, RtcpReceiverReport};
pub use sender_report::{parse_sender_report, RtcpSenderReport};

use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::Result;

/// RTCP packet types as defined in RFC 3550.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    ApplicationDefined = 204,
}

impl TryFrom<u8> for RtcpPacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            200 => Ok(RtcpPacketType::SenderReport),
            201 => Ok(RtcpPacketType::ReceiverReport),
            202 => Ok(RtcpPacketType::SourceDescription),
            203 => Ok(RtcpPacketType::Goodbye),
            204 => Ok(RtcpPacketType::ApplicationDefined),
            _ => Err(Error::Rtcp(format!("unknown RTCP packet type: {value}"))),
        }
    }
}

/// RTCP version field value (same as RTP, always 2).
pub const RTCP_VERSION: u8 = 2;

/// A parsed RTCP packet.
///
/// Packet types this crate does not need to act on (SDES, BYE, APP) are
/// preserved as their raw payload rather than decoded field-by-field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
    Other { packet_type: RtcpPacketType, raw: Bytes },
}

impl RtcpPacket {
    /// Parse a single RTCP packet from its wire form.
    ///
    /// Does not handle compound RTCP (multiple packets back to back); callers
    /// that receive compound packets should loop, advancing by the parsed
    /// packet's length, until the buffer is exhausted.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        if buf.remaining() < 4 {
            return Err(Error::BufferTooSmall {
                required: 4,
                available: buf.remaining(),
            });
        }

        let first_byte = buf.get_u8();
        let version = (first_byte >> 6) & 0x03;
        if version != RTCP_VERSION {
            return Err(Error::Rtcp(format!("invalid RTCP version: {version}")));
        }
        let report_count = first_byte & 0x1F;

        let packet_type = RtcpPacketType::try_from(buf.get_u8())?;
        let length = buf.get_u16() as usize * 4;

        if buf.remaining() < length {
            return Err(Error::BufferTooSmall {
                required: length,
                available: buf.remaining(),
            });
        }

        match packet_type {
            RtcpPacketType::SenderReport => {
                Ok(RtcpPacket::SenderReport(parse_sender_report(&mut buf, report_count)?))
            }
            RtcpPacketType::ReceiverReport => {
                Ok(RtcpPacket::ReceiverReport(parse_receiver_report(&mut buf, report_count)?))
            }
            other => Ok(RtcpPacket::Other {
                packet_type: other,
                raw: buf.copy_to_bytes(length.min(buf.remaining())),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn header(packet_type: u8, report_count: u8, length_words: u16) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(0x80 | report_count);
        buf.put_u8(packet_type);
        buf.put_u16(length_words);
        buf
    }

    #[test]
    fn parses_receiver_report() {
        let mut rr = RtcpReceiverReport::new(0xdead_beef);
        rr.add_report_block(RtcpReportBlock::new(0x1234_5678));
        let body = rr.serialize().unwrap();

        let mut wire = header(201, 1, (body.len() / 4) as u16);
        wire.extend_from_slice(&body);

        match RtcpPacket::parse(&wire).unwrap() {
            RtcpPacket::ReceiverReport(parsed) => {
                assert_eq!(parsed.ssrc, 0xdead_beef);
                assert_eq!(parsed.report_blocks.len(), 1);
            }
            other => panic!("expected ReceiverReport, got {other:?}"),
        }
    }

    #[test]
    fn rejects_short_header() {
        let err = RtcpPacket::parse(&[0x80]).unwrap_err();
        assert!(matches!(err, Error::BufferTooSmall { .. }));
    }

    #[test]
    fn rejects_bad_version() {
        let mut wire = header(201, 0, 1);
        wire.extend_from_slice(&[0, 0, 0, 0]);
        wire[0] = 0x00; // version 0
        let err = RtcpPacket::parse(&wire).unwrap_err();
        assert!(matches!(err, Error::Rtcp(_)));
    }
}
