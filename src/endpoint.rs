//! Convenience façade wiring an [`RtpConfig`] into a bound [`Transport`] +
//! [`Session`] pair, joined into a caller-supplied [`Group`].
//!
//! The component modules (`transport`, `session`, `group`) expose the raw
//! building blocks spec.md §4 describes; nothing in those modules actually
//! consumes a whole `RtpConfig` end to end the way an embedding application
//! does once signalling negotiation has picked a codec and the call is
//! ready for media. `RtpEndpoint` is that remaining assembly step: pick a
//! port out of the configured range, bind RTCP if requested, apply the
//! configured TOS class, and hand both halves to the Group that will tick
//! them.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::info;

use crate::config::RtpConfig;
use crate::control::ControlSink;
use crate::group::Group;
use crate::session::Session;
use crate::transport::{Transport, TransportKind};
use crate::Result;

/// A bound Transport paired with the Session driving it, both already
/// joined into `group`.
pub struct RtpEndpoint {
    pub transport: Arc<Transport>,
    pub session: Arc<Session>,
    drill_hole: bool,
    auto_addr: bool,
}

impl RtpEndpoint {
    /// Bind a transport somewhere in `config`'s port range, attach a
    /// Session configured from `config`, and join both into `group`.
    ///
    /// `target_id` tags every notification this endpoint's Session or
    /// Transport raises through `control`.
    pub async fn bind(
        target_id: impl Into<String>,
        config: &RtpConfig,
        group: &Arc<Group>,
        control: Arc<dyn ControlSink>,
    ) -> Result<Self> {
        let target_id = target_id.into();
        let transport = Transport::new(TransportKind::Rtp);
        let ip = config.local_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        transport
            .bind_range(ip, config.min_port, config.max_port, config.want_rtcp)
            .await?;
        transport.set_tos(config.tos);

        let session = Session::new(target_id.clone(), transport.clone(), control, config, config.any_ssrc);
        transport.set_processor(session.clone());

        group.join(transport.clone());
        group.join(session.clone());

        info!(
            target_id = %target_id,
            notify_msg = %config.notify_msg,
            local = ?transport.local_addr(),
            "media endpoint bound",
        );

        Ok(Self { transport, session, drill_hole: config.drill_hole, auto_addr: config.auto_addr })
    }

    /// Point this endpoint's transport at a resolved remote peer. Whether
    /// the transport follows a later source-address change is governed
    /// entirely by `RtpConfig::auto_addr`, not by the caller. If
    /// `RtpConfig::drill_hole` was set, this also fires the NAT pinhole
    /// datagrams before returning, matching spec.md §4.1's "pre-send"
    /// ordering.
    pub async fn set_remote(&self, addr: SocketAddr) {
        self.transport.set_remote(addr, self.auto_addr);
        if self.drill_hole {
            self.transport.drill_hole().await;
        }
    }
}
