//! Per-direction RTP state machine: SSRC tracking, sequencing, jitter
//! buffering, DTMF (RFC 2833) encode/decode, outbound chunking and
//! inactivity timeouts (spec.md §4.3).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::config::RtpConfig;
use crate::control::{ControlSink, DtmfEvent, NotifyReason};
use crate::group::Processor;
use crate::jitter::{BufferedPacket, JitterBuffer};
use crate::media::{MediaConsumer, MediaFrame, MediaSource};
use crate::packet::{RtpHeader, RtpPacket, TelephoneEvent};
use crate::srtp::SecurityContext;
use crate::transport::{RtpSink, Transport};
use crate::{RtpSequenceNumber, RtpSsrc, RtpTimestamp, COMFORT_NOISE_PAYLOAD_TYPE, DEFAULT_PREFERRED_CHUNK};

/// Expected-SSRC policy on the receive side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpectedSsrc {
    Unset,
    Any,
    Locked(RtpSsrc),
}

struct ReceiveState {
    expected_ssrc: ExpectedSsrc,
    /// Set by [`Session::request_resync`]; the next packet whose SSRC
    /// differs from the locked one relatches instead of being dropped as
    /// wrong-source, mirroring the original's `m_resync` flag.
    resync_pending: bool,
    last_sequence: Option<RtpSequenceNumber>,
    last_timestamp: Option<RtpTimestamp>,
    jitter: JitterBuffer,
    data_payload_type: Option<u8>,
    silence_payload_type: Option<u8>,
    event_assembler: Option<DtmfAssembly>,
    ever_accepted: bool,
    last_accept: Option<std::time::Instant>,
    notified_once: bool,
}

struct DtmfAssembly {
    key: char,
    start_timestamp: RtpTimestamp,
    last_duration: u16,
    delivered: bool,
}

struct SendState {
    ssrc: RtpSsrc,
    next_sequence: RtpSequenceNumber,
    base_timestamp: RtpTimestamp,
    data_payload_type: u8,
    event_payload_type: u8,
    padding_len: u8,
}

/// Whether an attached consumer wants its buffers split into fixed-size
/// chunks (linear mu-law/A-law style audio) or sent whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    Splitable { preferred: usize },
    Whole,
}

/// Owns receive and send state for one RTP stream, ticked by a
/// [`crate::group::Group`] alongside its [`Transport`].
pub struct Session {
    target_id: String,
    transport: Arc<Transport>,
    receive: Mutex<ReceiveState>,
    send: Mutex<SendState>,
    source: Mutex<Option<Box<dyn MediaSource>>>,
    consumer: Mutex<Option<Box<dyn MediaConsumer>>>,
    control: Arc<dyn ControlSink>,
    chunk_policy: ChunkPolicy,
    transport_buffer_bytes: usize,
    timeout_ms: u64,
    warn_later: bool,
    finished: std::sync::atomic::AtomicBool,
    send_security: Mutex<Option<Arc<SecurityContext>>>,
    receive_security: Mutex<Option<Arc<SecurityContext>>>,
    /// Count of datagrams dropped as wrong-source (wrong-address drops
    /// surfaced by the transport, plus wrong-SSRC drops seen here) since
    /// the last flush. Flushed once per tick rather than per packet, per
    /// [`ControlSink::wrong_source`]'s documented coalescing contract.
    wrong_source_count: AtomicU32,
}

impl Session {
    pub fn new(
        target_id: impl Into<String>,
        transport: Arc<Transport>,
        control: Arc<dyn ControlSink>,
        config: &RtpConfig,
        any_ssrc: bool,
    ) -> Arc<Self> {
        let mut rng = rand::thread_rng();
        let send = SendState {
            ssrc: rng.gen(),
            next_sequence: rng.gen(),
            base_timestamp: rng.gen(),
            data_payload_type: 0,
            event_payload_type: 101,
            padding_len: config.padding_len,
        };
        let receive = ReceiveState {
            expected_ssrc: if any_ssrc { ExpectedSsrc::Any } else { ExpectedSsrc::Unset },
            resync_pending: false,
            last_sequence: None,
            last_timestamp: None,
            jitter: JitterBuffer::new(config.buffer_samples.max(1) as usize),
            data_payload_type: None,
            silence_payload_type: None,
            event_assembler: None,
            ever_accepted: false,
            last_accept: None,
            notified_once: false,
        };

        Arc::new(Self {
            target_id: target_id.into(),
            transport,
            receive: Mutex::new(receive),
            send: Mutex::new(send),
            source: Mutex::new(None),
            consumer: Mutex::new(None),
            control,
            chunk_policy: ChunkPolicy::Splitable { preferred: DEFAULT_PREFERRED_CHUNK },
            transport_buffer_bytes: config.buffer_samples as usize,
            timeout_ms: config.timeout_ms,
            warn_later: config.warn_later,
            finished: std::sync::atomic::AtomicBool::new(false),
            send_security: Mutex::new(None),
            receive_security: Mutex::new(None),
            wrong_source_count: AtomicU32::new(0),
        })
    }

    pub fn set_source(&self, source: Box<dyn MediaSource>) {
        *self.source.lock() = Some(source);
    }

    pub fn set_consumer(&self, consumer: Box<dyn MediaConsumer>) {
        *self.consumer.lock() = Some(consumer);
    }

    /// Attach a per-direction SRTP context (spec.md §4.4). Construction of
    /// the context itself already validated the suite and key material;
    /// once attached here every outbound packet is protected and every
    /// inbound packet must verify before it reaches the normal RTP path.
    pub fn set_security_send(&self, ctx: Arc<SecurityContext>) {
        *self.send_security.lock() = Some(ctx);
    }

    pub fn set_security_receive(&self, ctx: Arc<SecurityContext>) {
        *self.receive_security.lock() = Some(ctx);
    }

    /// Assign this payload type to RFC 2833 telephony events.
    pub fn set_event_payload_type(&self, pt: u8) {
        self.send.lock().event_payload_type = pt;
    }

    pub fn set_data_payload_type(&self, pt: u8) {
        self.send.lock().data_payload_type = pt;
    }

    fn handle_rtp_packet(&self, packet: RtpPacket) {
        let event_pt = self.send.lock().event_payload_type;
        let mut receive = self.receive.lock();

        match receive.expected_ssrc {
            ExpectedSsrc::Locked(expected) if expected != packet.header.ssrc => {
                if receive.resync_pending {
                    receive.resync_pending = false;
                    receive.expected_ssrc = ExpectedSsrc::Locked(packet.header.ssrc);
                } else {
                    drop(receive);
                    self.note_wrong_ssrc();
                    return;
                }
            }
            ExpectedSsrc::Unset => {
                receive.expected_ssrc = ExpectedSsrc::Locked(packet.header.ssrc);
            }
            _ => {}
        }

        receive.last_sequence = Some(packet.header.sequence_number);
        receive.last_timestamp = Some(packet.header.timestamp);
        receive.ever_accepted = true;
        receive.last_accept = Some(std::time::Instant::now());
        receive.notified_once = false;

        if packet.header.payload_type == COMFORT_NOISE_PAYLOAD_TYPE && receive.silence_payload_type.is_none() {
            receive.silence_payload_type = Some(COMFORT_NOISE_PAYLOAD_TYPE);
        }

        if packet.header.payload_type == event_pt {
            if let Ok(event) = TelephoneEvent::parse(&packet.payload) {
                self.handle_dtmf_event(&mut receive, &packet.header, event);
            }
            return;
        }

        receive.data_payload_type.get_or_insert(packet.header.payload_type);
        receive.jitter.push(BufferedPacket {
            sequence_number: packet.header.sequence_number,
            timestamp: packet.header.timestamp,
            marker: packet.header.marker,
            payload_type: packet.header.payload_type,
            payload: packet.payload.to_vec(),
        });
    }

    fn handle_dtmf_event(&self, receive: &mut ReceiveState, header: &RtpHeader, event: TelephoneEvent) {
        let key = key_for_event_code(event.event);
        let Some(key) = key else { return };

        match &mut receive.event_assembler {
            Some(assembly) if assembly.start_timestamp == header.timestamp && assembly.key == key => {
                assembly.last_duration = event.duration;
                if event.end && !assembly.delivered {
                    assembly.delivered = true;
                    let control = Arc::clone(&self.control);
                    let target_id = self.target_id.clone();
                    let duration_ms = event.duration as u32 / 8;
                    tokio::spawn(async move {
                        control.dtmf(DtmfEvent { target_id, key, duration_ms, source: "rfc2833" }).await;
                    });
                }
            }
            _ => {
                receive.event_assembler = Some(DtmfAssembly {
                    key,
                    start_timestamp: header.timestamp,
                    last_duration: event.duration,
                    delivered: event.end,
                });
                if event.end {
                    let control = Arc::clone(&self.control);
                    let target_id = self.target_id.clone();
                    let duration_ms = event.duration as u32 / 8;
                    tokio::spawn(async move {
                        control.dtmf(DtmfEvent { target_id, key, duration_ms, source: "rfc2833" }).await;
                    });
                }
            }
        }
    }

    /// Verify and decrypt an inbound SRTP packet before it enters the
    /// normal RTP path. Tag failures and parse failures are both surfaced
    /// as the same [`crate::Error::Rtp`]-shaped drop reason upstream; never
    /// distinguishable by the caller, per spec.md §4.4.
    fn unprotect(&self, ctx: &SecurityContext, data: &[u8]) -> crate::Result<RtpPacket> {
        let (header, header_len) = RtpHeader::parse_with_len(data)?;
        let ciphertext = &data[header_len..];
        let clear = ctx.unprotect(&header, &data[..header_len], ciphertext)?;
        RtpPacket::from_header_and_raw_payload(header, clear)
    }

    /// Serialize `packet` and, if a send-side SRTP context is attached,
    /// encrypt it before handing the bytes to the transport.
    async fn transmit(&self, packet: &RtpPacket) {
        let security = self.send_security.lock().clone();
        let wire = match security {
            Some(ctx) => {
                let header_bytes = packet.serialize_header();
                match ctx.protect(&packet.header, &header_bytes, &packet.payload) {
                    Ok(protected) => protected,
                    Err(err) => {
                        warn!(target_id = %self.target_id, ?err, "srtp encryption failed, dropping packet");
                        return;
                    }
                }
            }
            None => packet.serialize(),
        };
        let _ = self.transport.send_rtp(&wire).await;
    }

    /// Request that the next packet whose SSRC doesn't match the locked
    /// one relatch onto it instead of being dropped as wrong-source,
    /// mirroring the original engine's `RTPProcessor::resync()`. Used when
    /// the signalling layer knows the remote endpoint legitimately changed
    /// its SSRC (e.g. after a hold/resume or codec renegotiation).
    pub fn request_resync(&self) {
        self.receive.lock().resync_pending = true;
    }

    fn note_wrong_ssrc(&self) {
        self.wrong_source_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Flush accumulated wrong-source drops (this session's wrong-SSRC
    /// count plus the transport's wrong-address count) as at most one
    /// coalesced [`ControlSink::wrong_source`] notification. Called once
    /// per tick rather than per dropped packet.
    fn flush_wrong_source(&self) {
        let from_ssrc = self.wrong_source_count.swap(0, Ordering::Relaxed);
        let from_addr = self.transport.take_wrong_src_count();
        let total = from_ssrc + from_addr;
        if total == 0 {
            return;
        }
        let control = Arc::clone(&self.control);
        let target_id = self.target_id.clone();
        tokio::spawn(async move {
            control.wrong_source(&target_id, None, total).await;
        });
    }

    /// Drain frames whose sequence has arrived and push each to the
    /// attached [`MediaConsumer`]. Called from `tick`.
    fn drain_jitter(&self) {
        let mut receive = self.receive.lock();
        let mut consumer = self.consumer.lock();
        let Some(consumer) = consumer.as_mut() else { return };
        while let Some(packet) = receive.jitter.pop_ready() {
            let frame = MediaFrame {
                payload_type: packet.payload_type,
                timestamp: packet.timestamp,
                marker: packet.marker,
                data: packet.payload,
            };
            if let Err(err) = consumer.accept_frame(frame) {
                warn!(target_id = %self.target_id, ?err, "media consumer rejected frame");
            }
        }
    }

    /// Pull one frame from the attached [`MediaSource`], if any, chunk it
    /// per [`ChunkPolicy`], and send each chunk as RTP.
    async fn pump_source(&self) {
        let frame = {
            let mut source = self.source.lock();
            source.as_mut().and_then(|s| s.next_frame())
        };
        let Some(frame) = frame else { return };
        self.send_frame(frame).await;
    }

    async fn send_frame(&self, frame: MediaFrame) {
        let chunk_len = match self.chunk_policy {
            ChunkPolicy::Splitable { preferred }
                if preferred > 0 && frame.data.len() % preferred == 0 && self.transport_buffer_bytes > preferred =>
            {
                preferred
            }
            _ => self.transport_buffer_bytes.min(frame.data.len()),
        }
        .max(1);

        for (i, chunk) in frame.data.chunks(chunk_len).enumerate() {
            let mut send = self.send.lock();
            let seq = send.next_sequence;
            send.next_sequence = send.next_sequence.wrapping_add(1);
            let timestamp = send.base_timestamp.wrapping_add(frame.timestamp);
            let pt = if frame.payload_type == send.data_payload_type { frame.payload_type } else { send.data_payload_type };
            let ssrc = send.ssrc;
            drop(send);

            let mut header = RtpHeader::new(pt, seq, timestamp, ssrc);
            header.marker = frame.marker && i == 0;
            let packet = RtpPacket::new(header, bytes::Bytes::copy_from_slice(chunk));
            self.transmit(&packet).await;
        }
    }

    /// Emit one DTMF digit as an RFC 2833 event stream: an initial packet,
    /// repeated packets with increasing duration for the held interval,
    /// then three end-marker packets.
    #[instrument(skip(self))]
    pub async fn send_dtmf(&self, key: char, hold_ms: u32, packet_step_ms: u32) -> crate::Result<()> {
        let event_code = TelephoneEvent::event_code_for_key(key)?;
        let ssrc = self.send.lock().ssrc;
        let timestamp = {
            let mut send = self.send.lock();
            let ts = send.base_timestamp;
            send.base_timestamp = send.base_timestamp.wrapping_add(160);
            ts
        };

        let step_units = (packet_step_ms.max(1) * 8) as u16;
        let mut duration = step_units;
        let steps = (hold_ms / packet_step_ms.max(1)).max(1);

        for i in 0..steps {
            let event = TelephoneEvent { event: event_code, end: false, volume: 0, duration };
            self.send_event_packet(event, timestamp, ssrc, i == 0).await;
            duration = duration.saturating_add(step_units);
        }

        let final_event = TelephoneEvent { event: event_code, end: true, volume: 0, duration };
        for _ in 0..3 {
            self.send_event_packet(final_event, timestamp, ssrc, false).await;
        }
        Ok(())
    }

    async fn send_event_packet(&self, event: TelephoneEvent, timestamp: RtpTimestamp, ssrc: RtpSsrc, marker: bool) {
        let (seq, event_pt) = {
            let mut send = self.send.lock();
            let seq = send.next_sequence;
            send.next_sequence = send.next_sequence.wrapping_add(1);
            (seq, send.event_payload_type)
        };
        let mut header = RtpHeader::new(event_pt, seq, timestamp, ssrc);
        header.marker = marker;
        let packet = RtpPacket::new(header, event.serialize());
        self.transmit(&packet).await;
    }

    fn check_timeout(&self) {
        if self.timeout_ms == 0 {
            return;
        }
        let mut receive = self.receive.lock();
        let elapsed = receive.last_accept.map(|t| t.elapsed().as_millis() as u64);
        let timed_out = match elapsed {
            Some(ms) => ms >= self.timeout_ms,
            None => receive.ever_accepted == false,
        };
        if !timed_out && receive.ever_accepted {
            return;
        }
        if receive.notified_once && !self.warn_later {
            return;
        }
        let initial = !receive.ever_accepted || !receive.notified_once;
        receive.notified_once = true;
        drop(receive);

        let control = Arc::clone(&self.control);
        let target_id = self.target_id.clone();
        tokio::spawn(async move {
            control.timeout(&target_id, initial, NotifyReason::NoMedia).await;
        });
    }

    pub fn finish(&self) {
        self.finished.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

fn key_for_event_code(code: u8) -> Option<char> {
    match code {
        0..=9 => Some((b'0' + code) as char),
        10 => Some('*'),
        11 => Some('#'),
        12..=15 => Some((b'A' + (code - 12)) as char),
        _ => None,
    }
}

#[async_trait]
impl RtpSink for Session {
    async fn on_rtp(&self, data: &[u8]) {
        let security = self.receive_security.lock().clone();
        let packet = match security {
            Some(ctx) => self.unprotect(&ctx, data),
            None => RtpPacket::parse(data),
        };
        match packet {
            Ok(packet) => self.handle_rtp_packet(packet),
            Err(err) => debug!(target_id = %self.target_id, ?err, "dropping unparsable or unauthenticated RTP packet"),
        }
    }

    async fn on_rtcp(&self, _data: &[u8]) {
        // RTCP sender/receiver reports are consumed for statistics only;
        // no per-packet session behaviour depends on them today.
    }
}

#[async_trait]
impl Processor for Session {
    async fn tick(&self, _now: std::time::Instant) {
        self.drain_jitter();
        self.pump_source().await;
        self.check_timeout();
        self.flush_wrong_source();
    }

    fn is_finished(&self) -> bool {
        self.finished.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlSink;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        dtmf_keys: StdMutex<Vec<char>>,
        timeouts: AtomicU32,
        wrong_source_calls: AtomicU32,
        wrong_source_total: AtomicU32,
    }

    #[async_trait]
    impl ControlSink for RecordingSink {
        async fn dtmf(&self, event: DtmfEvent) {
            self.dtmf_keys.lock().unwrap().push(event.key);
        }
        async fn timeout(&self, _target_id: &str, _initial: bool, _reason: NotifyReason) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
        async fn wrong_source(&self, _target_id: &str, _ssrc: Option<RtpSsrc>, count: u32) {
            self.wrong_source_calls.fetch_add(1, Ordering::SeqCst);
            self.wrong_source_total.fetch_add(count, Ordering::SeqCst);
        }
        async fn reflector_dropped(&self, _a: &str, _b: Option<&str>, _reason: NotifyReason) {}
    }

    fn test_transport() -> Arc<Transport> {
        Transport::new(crate::transport::TransportKind::Rtp)
    }

    #[tokio::test]
    async fn decodes_a_dtmf_event_once() {
        let sink = Arc::new(RecordingSink::default());
        let session = Session::new("leg-a", test_transport(), sink.clone(), &RtpConfig::default(), false);

        let header = RtpHeader::new(101, 1, 1000, 0xAAAA);
        let event = TelephoneEvent { event: 5, end: true, volume: 0, duration: 800 };
        let packet = RtpPacket::new(header, event.serialize());
        session.on_rtp(&packet.serialize()).await;

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(*sink.dtmf_keys.lock().unwrap(), vec!['5']);
    }

    #[tokio::test]
    async fn locks_ssrc_on_first_packet_and_rejects_mismatch() {
        let sink = Arc::new(RecordingSink::default());
        let session = Session::new("leg-a", test_transport(), sink, &RtpConfig::default(), false);

        let header = RtpHeader::new(0, 1, 160, 0x1111);
        let packet = RtpPacket::new(header, bytes::Bytes::from_static(b"audiodata"));
        session.on_rtp(&packet.serialize()).await;

        let other_header = RtpHeader::new(0, 2, 320, 0x2222);
        let other_packet = RtpPacket::new(other_header, bytes::Bytes::from_static(b"audiodata"));
        session.on_rtp(&other_packet.serialize()).await;

        let receive = session.receive.lock();
        assert_eq!(receive.expected_ssrc, ExpectedSsrc::Locked(0x1111));
    }

    #[tokio::test]
    async fn resync_relatches_onto_a_new_ssrc() {
        let sink = Arc::new(RecordingSink::default());
        let session = Session::new("leg-a", test_transport(), sink, &RtpConfig::default(), false);

        let header = RtpHeader::new(0, 1, 160, 0x1111);
        let packet = RtpPacket::new(header, bytes::Bytes::from_static(b"audiodata"));
        session.on_rtp(&packet.serialize()).await;

        session.request_resync();

        let other_header = RtpHeader::new(0, 2, 320, 0x2222);
        let other_packet = RtpPacket::new(other_header, bytes::Bytes::from_static(b"audiodata"));
        session.on_rtp(&other_packet.serialize()).await;

        let receive = session.receive.lock();
        assert_eq!(receive.expected_ssrc, ExpectedSsrc::Locked(0x2222));
        assert!(!receive.resync_pending);
    }

    #[tokio::test]
    async fn wrong_ssrc_drops_are_coalesced_into_one_flush() {
        let sink = Arc::new(RecordingSink::default());
        let session = Session::new("leg-a", test_transport(), sink.clone(), &RtpConfig::default(), false);

        let header = RtpHeader::new(0, 1, 160, 0x1111);
        let packet = RtpPacket::new(header, bytes::Bytes::from_static(b"audiodata"));
        session.on_rtp(&packet.serialize()).await;

        for seq in 2..5u16 {
            let other_header = RtpHeader::new(0, seq, 320, 0x2222);
            let other_packet = RtpPacket::new(other_header, bytes::Bytes::from_static(b"audiodata"));
            session.on_rtp(&other_packet.serialize()).await;
        }
        assert_eq!(sink.wrong_source_calls.load(Ordering::SeqCst), 0);

        session.tick(std::time::Instant::now()).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(sink.wrong_source_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.wrong_source_total.load(Ordering::SeqCst), 3);
    }

    struct XorProvider;

    impl crate::srtp::CipherProvider for XorProvider {
        fn check_cipher(&self, suite: &str) -> bool {
            suite == "TEST_XOR"
        }
        fn encrypt(
            &self,
            _suite: &str,
            keys: &crate::srtp::KeyMaterial,
            _index: u64,
            _header: &[u8],
            payload: &[u8],
        ) -> crate::Result<bytes::Bytes> {
            let k = keys.key[0];
            Ok(payload.iter().map(|b| b ^ k).collect::<Vec<u8>>().into())
        }
        fn decrypt(
            &self,
            _suite: &str,
            keys: &crate::srtp::KeyMaterial,
            _index: u64,
            _header: &[u8],
            ciphertext: &[u8],
        ) -> crate::Result<bytes::Bytes> {
            if ciphertext.is_empty() {
                return Err(crate::Error::AuthenticationFailed);
            }
            let k = keys.key[0];
            Ok(ciphertext.iter().map(|b| b ^ k).collect::<Vec<u8>>().into())
        }
    }

    #[tokio::test]
    async fn decrypts_srtp_protected_inbound_audio() {
        let sink = Arc::new(RecordingSink::default());
        let session = Session::new("leg-a", test_transport(), sink, &RtpConfig::default(), true);

        let keys = crate::srtp::KeyMaterial::new(vec![0x5A], vec![0x00]);
        let ctx = Arc::new(
            crate::srtp::SecurityContext::new("TEST_XOR", keys, Arc::new(XorProvider)).unwrap(),
        );
        session.set_security_receive(ctx.clone());

        let header = RtpHeader::new(0, 1, 160, 0x9999);
        let plain = RtpPacket::new(header.clone(), bytes::Bytes::from_static(b"clear-audio"));
        let protected = ctx.protect(&header, &plain.serialize_header(), &plain.payload).unwrap();

        session.on_rtp(&protected).await;

        let receive = session.receive.lock();
        assert_eq!(receive.expected_ssrc, ExpectedSsrc::Locked(0x9999));
    }
}
