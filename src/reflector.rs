//! Pairs two Transports back-to-back so validated datagrams flow directly
//! from one leg to the other without entering a Session (spec.md §4.5).

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::config::RtpConfig;
use crate::control::{ControlSink, NotifyReason};
use crate::group::{Group, Processor};
use crate::monitor::Monitor;
use crate::registry::{self, ReflectorInfo};
use crate::transport::{Transport, TransportKind};

struct Identities {
    id_a: String,
    id_b: Option<String>,
}

/// A cross-wired pair of transports. Leg A's transport hands every
/// validated RTP/RTCP datagram straight to leg B's transport and
/// vice-versa; each leg has its own [`Monitor`] for independent liveness
/// tracking.
pub struct Reflector {
    group: Arc<Group>,
    transport_a: Arc<Transport>,
    transport_b: Arc<Transport>,
    monitor_a: Arc<Monitor>,
    monitor_b: Arc<Monitor>,
    identities: Mutex<Identities>,
    control: Arc<dyn ControlSink>,
}

impl Reflector {
    /// Allocate a dedicated Group, two Transports and two Monitors, and
    /// wire each transport's processor to the other. `id_b` starts empty
    /// and is set once the peer answers.
    pub fn new(id_a: impl Into<String>, config: &RtpConfig, control: Arc<dyn ControlSink>) -> Arc<Self> {
        let group = Group::new(config);
        let transport_a = Transport::new(TransportKind::Rtp);
        let transport_b = Transport::new(TransportKind::Rtp);
        let monitor_a = Arc::new(Monitor::new(Some(id_a.into()), config.timeout_ms, config.warn_later));
        let monitor_b = Arc::new(Monitor::new(None, config.timeout_ms, config.warn_later));

        transport_a.set_processor(transport_b.clone());
        transport_b.set_processor(transport_a.clone());
        transport_a.set_monitor(monitor_a.clone());
        transport_b.set_monitor(monitor_b.clone());

        group.join(transport_a.clone());
        group.join(transport_b.clone());

        let id_a = monitor_a.identity().unwrap_or_default();
        registry::register_reflector(ReflectorInfo { id_a: id_a.clone(), id_b: None });

        let reflector = Arc::new(Self {
            group: group.clone(),
            transport_a,
            transport_b,
            monitor_a,
            monitor_b,
            identities: Mutex::new(Identities { id_a, id_b: None }),
            control,
        });

        group.join(Arc::new(TimeoutWatcher { reflector: Arc::downgrade(&reflector) }));
        reflector
    }

    pub fn transport_a(&self) -> &Arc<Transport> {
        &self.transport_a
    }

    pub fn transport_b(&self) -> &Arc<Transport> {
        &self.transport_b
    }

    /// Record the peer's identity once it answers, enabling leg B's
    /// timeout notifications. If a peer identity was already recorded and
    /// this call names a different one, the pairing is asymmetric -- the
    /// signalling layer re-answered leg B onto a different call than the
    /// one this reflector was built for -- and the pair is dropped loudly
    /// via [`Reflector::reflect_drop`] instead of being silently relatched.
    pub async fn set_peer_identity(&self, id_b: impl Into<String>) {
        let id_b = id_b.into();
        let mismatched = {
            let identities = self.identities.lock();
            matches!(&identities.id_b, Some(existing) if *existing != id_b)
        };
        if mismatched {
            self.reflect_drop(Some(id_b)).await;
            return;
        }
        self.monitor_b.set_identity(id_b.clone());
        let mut identities = self.identities.lock();
        identities.id_b = Some(id_b.clone());
        registry::register_reflector(ReflectorInfo { id_a: identities.id_a.clone(), id_b: Some(id_b) });
    }

    /// Tear down one leg's identity. The reflector is destroyed (its
    /// transports finished and removed from the registry) once both legs
    /// have been cleared.
    pub async fn hangup_leg_a(&self) {
        self.monitor_a.clear_identity();
        self.maybe_destroy().await;
    }

    pub async fn hangup_leg_b(&self) {
        self.monitor_b.clear_identity();
        self.maybe_destroy().await;
    }

    /// Ordinary dual-leg hangup: both legs cleared their identity in the
    /// normal course of the call ending. This is expected, routine teardown
    /// -- unlike [`Reflector::reflect_drop`], it never notifies the control
    /// sink; the signalling layer already knows the call ended, since it's
    /// the one that cleared both identities.
    async fn maybe_destroy(&self) {
        if self.monitor_a.identity().is_none() && self.monitor_b.identity().is_none() {
            let (id_a, id_b) = {
                let identities = self.identities.lock();
                (identities.id_a.clone(), identities.id_b.clone())
            };
            info!(%id_a, ?id_b, "reflector torn down");
            registry::unregister_reflector(&id_a);
            self.transport_a.finish();
            self.transport_b.finish();
        }
    }

    /// Unexpected teardown: the peer answered with an identity that
    /// conflicts with the one already recorded for this pairing. Unlike
    /// [`Reflector::maybe_destroy`]'s silent routine teardown, this notifies
    /// the control sink so the signalling layer knows media for this call
    /// was dropped out from under it.
    async fn reflect_drop(&self, attempted_id_b: Option<String>) {
        let id_a = {
            let identities = self.identities.lock();
            identities.id_a.clone()
        };
        info!(%id_a, ?attempted_id_b, "reflector dropped: mismatched peer identity");
        self.control.reflector_dropped(&id_a, attempted_id_b.as_deref(), NotifyReason::NoMedia).await;
        registry::unregister_reflector(&id_a);
        self.monitor_a.clear_identity();
        self.monitor_b.clear_identity();
        self.transport_a.finish();
        self.transport_b.finish();
    }

    /// Check both legs for inactivity and notify the control sink of any
    /// that have gone silent. An asymmetric failure -- one leg delivering
    /// media while the other stays silent -- surfaces as a timeout on the
    /// silent leg alone, without tearing down the still-active leg.
    pub async fn check_timeouts(&self) {
        self.monitor_a.check_timeout(self.control.as_ref()).await;
        self.monitor_b.check_timeout(self.control.as_ref()).await;
    }

    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    fn destroyed(&self) -> bool {
        self.monitor_a.identity().is_none() && self.monitor_b.identity().is_none()
    }
}

/// Ticks a Reflector's two Monitors for inactivity once per Group cycle.
/// Holds only a weak reference so the Reflector's own drop isn't pinned by
/// its Group membership.
struct TimeoutWatcher {
    reflector: Weak<Reflector>,
}

#[async_trait]
impl Processor for TimeoutWatcher {
    async fn tick(&self, _now: std::time::Instant) {
        if let Some(reflector) = self.reflector.upgrade() {
            reflector.check_timeouts().await;
        }
    }

    fn is_finished(&self) -> bool {
        match self.reflector.upgrade() {
            Some(reflector) => reflector.destroyed(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        drops: AtomicU32,
    }

    #[async_trait]
    impl ControlSink for RecordingSink {
        async fn dtmf(&self, _event: crate::control::DtmfEvent) {}
        async fn timeout(&self, _target_id: &str, _initial: bool, _reason: NotifyReason) {}
        async fn wrong_source(&self, _target_id: &str, _ssrc: Option<crate::RtpSsrc>, _count: u32) {}
        async fn reflector_dropped(&self, _a: &str, _b: Option<&str>, _reason: NotifyReason) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn destroys_silently_after_both_legs_clear() {
        let sink = Arc::new(RecordingSink::default());
        let reflector = Reflector::new("leg-a", &RtpConfig::default(), sink.clone());
        reflector.set_peer_identity("leg-b").await;

        reflector.hangup_leg_a().await;
        assert_eq!(sink.drops.load(Ordering::SeqCst), 0);

        // Ordinary dual-leg hangup never notifies the control sink -- the
        // signalling layer already knows the call ended.
        reflector.hangup_leg_b().await;
        assert_eq!(sink.drops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mismatched_peer_identity_drops_the_pair_loudly() {
        let sink = Arc::new(RecordingSink::default());
        let reflector = Reflector::new("leg-a", &RtpConfig::default(), sink.clone());
        reflector.set_peer_identity("leg-b").await;
        assert_eq!(sink.drops.load(Ordering::SeqCst), 0);

        // A different answer for leg B than the one already recorded is an
        // asymmetric mismatch, not a relatch.
        reflector.set_peer_identity("leg-c").await;
        assert_eq!(sink.drops.load(Ordering::SeqCst), 1);
    }
}
