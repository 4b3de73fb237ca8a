//! Upward notification sink for events the media plane cannot act on itself
//! (spec.md §4.6): DTMF digits, inactivity timeouts, source-address
//! anomalies and reflector teardown. Call signalling, billing and the
//! scripting engine all consume these through one trait so the media plane
//! never reaches upward through a concrete channel type.

use async_trait::async_trait;

use crate::RtpSsrc;

/// Why a timeout or drop notification fired, mirroring the vocabulary the
/// original engine's message bus used (`nomedia`, `timeout`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReason {
    /// No RTP has been seen for longer than the configured timeout.
    NoMedia,
    /// Generic inactivity timeout not otherwise qualified.
    Timeout,
}

impl NotifyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            NotifyReason::NoMedia => "nomedia",
            NotifyReason::Timeout => "timeout",
        }
    }
}

/// A decoded DTMF digit event, ready to hand to signalling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtmfEvent {
    pub target_id: String,
    pub key: char,
    pub duration_ms: u32,
    /// Always `"rfc2833"` today; kept as a field so an in-band detector
    /// could report through the same sink without changing the trait.
    pub source: &'static str,
}

/// Sink for the handful of events a [`crate::session::Session`] or
/// [`crate::reflector::Reflector`] needs to push upward. Implemented by
/// whatever owns call state; the media plane only ever holds a
/// `dyn ControlSink`.
#[async_trait]
pub trait ControlSink: Send + Sync {
    /// A DTMF digit was decoded from an RFC 2833 telephony-event stream.
    async fn dtmf(&self, event: DtmfEvent);

    /// No RTP has arrived on `target_id` for the configured timeout.
    /// `initial` is true only for the first notification on this silence
    /// run; later repeats (gated by `RtpConfig::warn_later`) pass `false`.
    async fn timeout(&self, target_id: &str, initial: bool, reason: NotifyReason);

    /// Inbound datagrams are arriving from an address other than the
    /// current remote. `count` is the number seen since the last report,
    /// allowing the implementation to coalesce rather than fire per-packet.
    async fn wrong_source(&self, target_id: &str, ssrc: Option<RtpSsrc>, count: u32);

    /// A [`crate::reflector::Reflector`] tore down, either because one leg
    /// hung up or because of an asymmetric failure (one leg delivering
    /// media, the other silent).
    async fn reflector_dropped(&self, id_a: &str, id_b: Option<&str>, reason: NotifyReason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        dtmf_count: AtomicU32,
        last_reason: Mutex<Option<NotifyReason>>,
    }

    #[async_trait]
    impl ControlSink for RecordingSink {
        async fn dtmf(&self, _event: DtmfEvent) {
            self.dtmf_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn timeout(&self, _target_id: &str, _initial: bool, reason: NotifyReason) {
            *self.last_reason.lock().unwrap() = Some(reason);
        }

        async fn wrong_source(&self, _target_id: &str, _ssrc: Option<RtpSsrc>, _count: u32) {}

        async fn reflector_dropped(&self, _id_a: &str, _id_b: Option<&str>, _reason: NotifyReason) {}
    }

    #[tokio::test]
    async fn records_dtmf_and_timeout() {
        let sink = RecordingSink::default();
        sink.dtmf(DtmfEvent {
            target_id: "leg-a".into(),
            key: '5',
            duration_ms: 100,
            source: "rfc2833",
        })
        .await;
        sink.timeout("leg-a", true, NotifyReason::NoMedia).await;

        assert_eq!(sink.dtmf_count.load(Ordering::SeqCst), 1);
        assert_eq!(*sink.last_reason.lock().unwrap(), Some(NotifyReason::NoMedia));
    }

    #[test]
    fn reason_strings_match_original_vocabulary() {
        assert_eq!(NotifyReason::NoMedia.as_str(), "nomedia");
        assert_eq!(NotifyReason::Timeout.as_str(), "timeout");
    }
}
