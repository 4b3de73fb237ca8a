//! Bounded reorder/play-out queue (spec.md §3/§4.3).
//!
//! Packets arrive close to in order but not guaranteed so; this buffer
//! holds a short window keyed by sequence number and releases packets in
//! sequence order once either the window fills or the oldest entry has
//! waited long enough that holding it longer would only delay play-out.

use std::collections::BTreeMap;

use crate::RtpSequenceNumber;

/// One buffered packet: the decoded header fields the jitter buffer needs
/// to reorder and release, plus the opaque payload.
#[derive(Debug, Clone)]
pub struct BufferedPacket {
    pub sequence_number: RtpSequenceNumber,
    pub timestamp: u32,
    pub marker: bool,
    pub payload_type: u8,
    pub payload: Vec<u8>,
}

/// A bounded, sequence-ordered play-out buffer for one stream.
///
/// Sequence-number comparisons use wraparound-aware arithmetic (RFC 3550
/// §5.1's serial-number notion): a newly pushed packet is "too old" only
/// if it falls strictly behind the last released sequence number modulo
/// 2^16, not merely numerically smaller.
pub struct JitterBuffer {
    capacity: usize,
    packets: BTreeMap<RtpSequenceNumber, BufferedPacket>,
    last_released: Option<RtpSequenceNumber>,
}

/// True if `a` precedes `b` in RFC 3550 serial-number order, treating the
/// gap as a forward distance within half the sequence space.
fn precedes(a: RtpSequenceNumber, b: RtpSequenceNumber) -> bool {
    let diff = b.wrapping_sub(a);
    diff != 0 && diff < 0x8000
}

impl JitterBuffer {
    pub fn new(capacity_packets: usize) -> Self {
        Self { capacity: capacity_packets.max(1), packets: BTreeMap::new(), last_released: None }
    }

    /// Insert a received packet. Returns `false` without inserting if the
    /// packet is a duplicate or precedes the last released sequence
    /// number (i.e. it arrived too late to matter).
    pub fn push(&mut self, packet: BufferedPacket) -> bool {
        if let Some(last) = self.last_released {
            if packet.sequence_number == last || !precedes(last, packet.sequence_number) {
                return false;
            }
        }
        if self.packets.contains_key(&packet.sequence_number) {
            return false;
        }
        self.packets.insert(packet.sequence_number, packet);
        while self.packets.len() > self.capacity {
            // Buffer is full: release the oldest held packet to make room,
            // same as letting play-out catch up to a burst.
            if let Some((&seq, _)) = self.packets.iter().next() {
                self.packets.remove(&seq);
            }
        }
        true
    }

    /// Pop the next packet in sequence order, if the buffer holds the
    /// immediate successor of the last released packet, or if the buffer
    /// is full and must release its oldest entry regardless of gaps.
    pub fn pop_ready(&mut self) -> Option<BufferedPacket> {
        let next_seq = match self.last_released {
            Some(last) => last.wrapping_add(1),
            None => *self.packets.keys().next()?,
        };

        if let Some(packet) = self.packets.remove(&next_seq) {
            self.last_released = Some(next_seq);
            return Some(packet);
        }

        if self.packets.len() >= self.capacity {
            let &seq = self.packets.keys().next()?;
            let packet = self.packets.remove(&seq)?;
            self.last_released = Some(seq);
            return Some(packet);
        }

        None
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(seq: u16) -> BufferedPacket {
        BufferedPacket { sequence_number: seq, timestamp: seq as u32 * 160, marker: false, payload_type: 0, payload: vec![] }
    }

    #[test]
    fn releases_in_sequence_order_despite_reordered_arrival() {
        let mut buf = JitterBuffer::new(8);
        buf.push(packet(2));
        buf.push(packet(1));
        buf.push(packet(0));

        assert_eq!(buf.pop_ready().unwrap().sequence_number, 0);
        assert_eq!(buf.pop_ready().unwrap().sequence_number, 1);
        assert_eq!(buf.pop_ready().unwrap().sequence_number, 2);
        assert!(buf.pop_ready().is_none());
    }

    #[test]
    fn drops_packets_older_than_last_released() {
        let mut buf = JitterBuffer::new(8);
        buf.push(packet(5));
        assert_eq!(buf.pop_ready().unwrap().sequence_number, 5);
        assert!(!buf.push(packet(5)));
        assert!(!buf.push(packet(3)));
    }

    #[test]
    fn handles_sequence_number_wraparound() {
        let mut buf = JitterBuffer::new(8);
        buf.push(packet(0xFFFE));
        assert_eq!(buf.pop_ready().unwrap().sequence_number, 0xFFFE);
        buf.push(packet(0xFFFF));
        buf.push(packet(0));
        assert_eq!(buf.pop_ready().unwrap().sequence_number, 0xFFFF);
        assert_eq!(buf.pop_ready().unwrap().sequence_number, 0);
    }

    #[test]
    fn caps_at_capacity_by_releasing_oldest() {
        let mut buf = JitterBuffer::new(2);
        buf.push(packet(10));
        buf.push(packet(11));
        assert!(buf.push(packet(12)));
        assert!(buf.len() <= 2);
    }
}
