//! Passive liveness tracker attached alongside a Transport's processor
//! (spec.md §4.5). A Monitor never touches payload bytes; it only counts
//! and times, then raises a one-shot (or repeating, per `warn_later`)
//! timeout notification through a [`crate::control::ControlSink`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::control::{ControlSink, NotifyReason};

struct Counters {
    rtp_packets: u64,
    rtcp_packets: u64,
    rtp_bytes: u64,
}

/// Tracks inbound activity for one leg and raises a timeout notification
/// when nothing has arrived for `timeout`.
pub struct Monitor {
    identity: Mutex<Option<String>>,
    first_seen: Mutex<Option<Instant>>,
    last_seen_ms: AtomicU64,
    last_payload_type: AtomicU64,
    counters: Mutex<Counters>,
    timeout: Duration,
    warn_later: bool,
    notified_once: AtomicBool,
    epoch: Instant,
}

impl Monitor {
    /// `identity` tags notifications raised by this monitor (e.g. a
    /// reflector leg id); `timeout_ms == 0` disables timeout checking.
    pub fn new(identity: Option<String>, timeout_ms: u64, warn_later: bool) -> Self {
        Self {
            identity: Mutex::new(identity),
            first_seen: Mutex::new(None),
            last_seen_ms: AtomicU64::new(0),
            last_payload_type: AtomicU64::new(u64::MAX),
            counters: Mutex::new(Counters { rtp_packets: 0, rtcp_packets: 0, rtp_bytes: 0 }),
            timeout: Duration::from_millis(timeout_ms),
            warn_later,
            notified_once: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    fn mark_seen(&self) {
        let mut first = self.first_seen.lock();
        if first.is_none() {
            *first = Some(Instant::now());
        }
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
        self.notified_once.store(false, Ordering::Relaxed);
    }

    /// Record an inbound RTP packet. `payload_type` tagging happens at a
    /// higher layer; this only feeds the byte/packet counters and liveness
    /// clock that [`crate::transport::Transport`] drives directly.
    pub fn note_rtp(&self, len: usize) {
        self.mark_seen();
        let mut counters = self.counters.lock();
        counters.rtp_packets += 1;
        counters.rtp_bytes += len as u64;
    }

    pub fn note_rtcp(&self, _len: usize) {
        self.mark_seen();
        self.counters.lock().rtcp_packets += 1;
    }

    pub fn note_payload_type(&self, pt: u8) {
        self.last_payload_type.store(pt as u64, Ordering::Relaxed);
    }

    /// Clear this monitor's identity, e.g. on hangup. Counters survive so
    /// a final snapshot can still be read afterward.
    pub fn clear_identity(&self) {
        *self.identity.lock() = None;
    }

    /// Set or replace this monitor's identity, e.g. once a reflector leg's
    /// peer answers.
    pub fn set_identity(&self, identity: impl Into<String>) {
        *self.identity.lock() = Some(identity.into());
    }

    pub fn identity(&self) -> Option<String> {
        self.identity.lock().clone()
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let counters = self.counters.lock();
        MonitorSnapshot {
            rtp_packets: counters.rtp_packets,
            rtcp_packets: counters.rtcp_packets,
            rtp_bytes: counters.rtp_bytes,
            last_payload_type: {
                let pt = self.last_payload_type.load(Ordering::Relaxed);
                if pt == u64::MAX { None } else { Some(pt as u8) }
            },
        }
    }

    /// Check elapsed silence against the configured timeout and, if it has
    /// expired, notify `sink`. Called from a tick; a no-op if `timeout_ms`
    /// was zero or the identity has been cleared. A leg that has never seen
    /// any traffic times out from its creation instant, same as one that
    /// has gone quiet after receiving packets.
    pub async fn check_timeout(&self, sink: &dyn ControlSink) {
        if self.timeout.is_zero() {
            return;
        }
        let Some(identity) = self.identity() else { return };
        let ever_seen = self.first_seen.lock().is_some();
        let elapsed = if ever_seen {
            let last_ms = self.last_seen_ms.load(Ordering::Relaxed);
            Duration::from_millis(self.epoch.elapsed().as_millis() as u64 - last_ms)
        } else {
            self.epoch.elapsed()
        };
        if elapsed < self.timeout {
            return;
        }
        let already_notified = self.notified_once.swap(true, Ordering::Relaxed);
        if already_notified && !self.warn_later {
            return;
        }
        sink.timeout(&identity, !already_notified, NotifyReason::NoMedia).await;
    }
}

/// Point-in-time read of a Monitor's counters, safe to hand to an
/// administrative status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub rtp_packets: u64,
    pub rtcp_packets: u64,
    pub rtp_bytes: u64,
    pub last_payload_type: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct RecordingSink {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ControlSink for RecordingSink {
        async fn dtmf(&self, _event: crate::control::DtmfEvent) {}
        async fn timeout(&self, _target_id: &str, _initial: bool, _reason: NotifyReason) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        async fn wrong_source(&self, _target_id: &str, _ssrc: Option<crate::RtpSsrc>, _count: u32) {}
        async fn reflector_dropped(&self, _a: &str, _b: Option<&str>, _reason: NotifyReason) {}
    }

    #[tokio::test]
    async fn notifies_once_after_timeout() {
        let monitor = Monitor::new(Some("leg-a".into()), 10, false);
        monitor.note_rtp(160);
        let sink = RecordingSink::default();

        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.check_timeout(&sink).await;
        monitor.check_timeout(&sink).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notifies_initial_when_no_packet_ever_arrives() {
        let monitor = Monitor::new(Some("leg-a".into()), 10, false);
        let sink = RecordingSink::default();
        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.check_timeout(&sink).await;
        monitor.check_timeout(&sink).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_reflects_counted_packets() {
        let monitor = Monitor::new(None, 0, false);
        monitor.note_rtp(100);
        monitor.note_rtp(50);
        monitor.note_rtcp(28);
        let snap = monitor.snapshot();
        assert_eq!(snap.rtp_packets, 2);
        assert_eq!(snap.rtp_bytes, 150);
        assert_eq!(snap.rtcp_packets, 1);
    }
}
