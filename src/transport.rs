//! RTP/RTCP socket pair: non-blocking receive, source validation, NAT
//! auto-remote adjustment, and raw send (spec.md §4.1).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tracing::{debug, info, instrument, warn};

use crate::config::Tos;
use crate::group::Processor;
use crate::monitor::Monitor;
use crate::packet::{MIN_RTCP_LEN, MIN_RTP_LEN, MIN_UDPTL_LEN};
use crate::registry::{self, TransportInfo};
use crate::{Error, Result};

/// Apply an IP TOS/DSCP class to a bound socket. Best-effort: failures are
/// logged, never propagated, since a dropped TOS byte degrades QoS but
/// never correctness.
#[cfg(unix)]
fn apply_tos(socket: &UdpSocket, tos: Tos) {
    use std::os::unix::io::{AsRawFd, FromRawFd};
    let raw = socket.as_raw_fd();
    // Wrap the borrowed fd just long enough to call setsockopt; forget it
    // immediately so the tokio socket keeps sole ownership of the fd.
    let borrowed = unsafe { socket2::Socket::from_raw_fd(raw) };
    if let Err(err) = borrowed.set_tos(tos.to_byte() as u32) {
        debug!(?err, "failed to set IP_TOS on RTP socket");
    }
    std::mem::forget(borrowed);
}

#[cfg(not(unix))]
fn apply_tos(_socket: &UdpSocket, _tos: Tos) {}

/// Kind of datagram this transport's RTP socket carries. UDPTL (T.38 fax
/// relay) shares the same even/odd binding and NAT-sniffing machinery as
/// RTP but has a shorter minimum frame length and no version byte to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Rtp,
    Udptl,
}

/// Receives validated datagrams forwarded by a [`Transport`]. Implemented
/// by [`crate::session::Session`] and, for reflector pairings, by another
/// `Transport` directly.
#[async_trait]
pub trait RtpSink: Send + Sync {
    async fn on_rtp(&self, data: &[u8]);
    async fn on_rtcp(&self, data: &[u8]);
    /// Called when a datagram arrived on the RTP socket from an address
    /// other than the current remote and was not eligible for an
    /// auto-remote switch. Used to drive wrong-source reporting.
    fn inc_wrong_src(&self) {}
}

struct Sockets {
    rtp: UdpSocket,
    rtcp: Option<UdpSocket>,
}

struct State {
    sockets: Option<Sockets>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    remote_rtcp: Option<SocketAddr>,
    remote_pref: Option<SocketAddr>,
    auto_remote: bool,
    processor: Option<Arc<dyn RtpSink>>,
    monitor: Option<Arc<Monitor>>,
    wrong_src_count: u32,
    finished: bool,
}

/// An RTP (or UDPTL) transport: the even-numbered socket plus, optionally,
/// the adjacent odd RTCP companion.
pub struct Transport {
    id: String,
    kind: TransportKind,
    state: Mutex<State>,
}

impl Transport {
    pub fn new(kind: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            id: registry::new_id(),
            kind,
            state: Mutex::new(State {
                sockets: None,
                local_addr: None,
                remote_addr: None,
                remote_rtcp: None,
                remote_pref: None,
                auto_remote: false,
                processor: None,
                monitor: None,
                wrong_src_count: 0,
                finished: false,
            }),
        })
    }

    /// Process-wide registry identity for this transport (spec.md §5).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register (or refresh) this transport's identity snapshot in the
    /// process-wide registry, keyed by its locally bound port.
    fn register(&self, local: SocketAddr) {
        registry::register_transport(TransportInfo {
            id: self.id.clone(),
            local_port: local.port(),
            remote: self.state.lock().remote_addr,
            ssrc: None,
        });
    }

    /// Attach the processor that receives validated datagrams.
    pub fn set_processor(&self, processor: Arc<dyn RtpSink>) {
        self.state.lock().processor = Some(processor);
    }

    pub fn set_monitor(&self, monitor: Arc<Monitor>) {
        self.state.lock().monitor = Some(monitor);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().local_addr
    }

    /// Apply an IP TOS/DSCP class to whichever sockets are currently
    /// bound. Safe to call before or after RTCP binding; a no-op if
    /// nothing is bound yet.
    pub fn set_tos(&self, tos: Tos) {
        let state = self.state.lock();
        if let Some(sockets) = &state.sockets {
            apply_tos(&sockets.rtp, tos);
            if let Some(rtcp) = &sockets.rtcp {
                apply_tos(rtcp, tos);
            }
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.state.lock().remote_addr
    }

    /// Bind the RTP socket (and, if `want_rtcp`, the adjacent RTCP socket)
    /// to `addr`. If the RTP socket lands on an odd port, the sockets are
    /// swapped: the bound socket becomes RTCP and a fresh RTP socket is
    /// bound one port down. Exact port requested by the caller; the
    /// scanning policy over a port range lives in [`Transport::bind_range`].
    #[instrument(skip(self), fields(kind = ?self.kind))]
    pub async fn bind_local(&self, addr: SocketAddr, want_rtcp: bool) -> Result<()> {
        let rtp = UdpSocket::bind(addr).await.map_err(|source| Error::Bind { addr, source })?;
        let bound = rtp.local_addr().map_err(|source| Error::Bind { addr, source })?;

        if !want_rtcp {
            {
                let mut state = self.state.lock();
                state.local_addr = Some(bound);
                state.sockets = Some(Sockets { rtp, rtcp: None });
            }
            self.register(bound);
            return Ok(());
        }

        if bound.port() % 2 == 1 {
            // Odd port: this socket becomes RTCP, bind a fresh RTP socket
            // one port down.
            let rtp_addr = SocketAddr::new(bound.ip(), bound.port() - 1);
            let fresh_rtp = UdpSocket::bind(rtp_addr)
                .await
                .map_err(|source| Error::Bind { addr: rtp_addr, source })?;
            {
                let mut state = self.state.lock();
                state.local_addr = Some(rtp_addr);
                state.sockets = Some(Sockets { rtp: fresh_rtp, rtcp: Some(rtp) });
            }
            self.register(rtp_addr);
            return Ok(());
        }

        let rtcp_addr = SocketAddr::new(bound.ip(), bound.port() + 1);
        let rtcp = UdpSocket::bind(rtcp_addr)
            .await
            .map_err(|source| Error::Bind { addr: rtcp_addr, source })?;
        {
            let mut state = self.state.lock();
            state.local_addr = Some(bound);
            state.sockets = Some(Sockets { rtp, rtcp: Some(rtcp) });
        }
        self.register(bound);
        Ok(())
    }

    /// Pick a random even port in `[min, max)` and bind there, retrying up
    /// to 10 times on collision. If `min == max` the range is widened once
    /// to `[min, min + 1)` before giving up.
    pub async fn bind_range(&self, ip: std::net::IpAddr, min: u16, max: u16, want_rtcp: bool) -> Result<()> {
        if min > max {
            return Err(Error::InvalidPortRange { min, max });
        }
        let (min, max) = if min == max { (min, min.saturating_add(1)) } else { (min, max) };
        if min == max {
            return Err(Error::InvalidPortRange { min, max });
        }

        const ATTEMPTS: u32 = 10;
        let mut last_err = None;
        for _ in 0..ATTEMPTS {
            let even_slots = ((max - min) / 2).max(1);
            let port = min + 2 * rand::thread_rng().gen_range(0..even_slots);
            let addr = SocketAddr::new(ip, port);
            match self.bind_local(addr, want_rtcp).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(port, "bind attempt failed, retrying");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or(Error::PortRangeExhausted { min, max }))
    }

    /// Point this transport at a remote peer. `sniff` enables NAT
    /// auto-remote adjustment: the transport will follow the source
    /// address of inbound datagrams arriving from `addr` (the "preferred"
    /// remote), switching to it exactly once.
    pub fn set_remote(&self, addr: SocketAddr, sniff: bool) {
        let mut state = self.state.lock();
        state.auto_remote = sniff;
        state.remote_addr = Some(addr);
        state.remote_rtcp = Some(SocketAddr::new(addr.ip(), addr.port() + 1));
        if sniff {
            state.remote_pref = Some(addr);
        } else {
            state.remote_pref = None;
        }
    }

    /// Send one RTP datagram to the current remote. No-op if the
    /// transport isn't bound or has no remote yet, or if the payload is
    /// shorter than the minimum frame length for this transport's kind.
    pub async fn send_rtp(&self, data: &[u8]) -> Result<()> {
        let min_len = match self.kind {
            TransportKind::Rtp => MIN_RTP_LEN,
            TransportKind::Udptl => MIN_UDPTL_LEN,
        };
        if data.len() < min_len {
            return Ok(());
        }
        let (dest, sock_is_bound) = {
            let state = self.state.lock();
            (state.remote_addr, state.sockets.is_some())
        };
        let Some(dest) = dest else { return Ok(()) };
        if !sock_is_bound {
            return Ok(());
        }
        let state = self.state.lock();
        if let Some(sockets) = &state.sockets {
            sockets.rtp.try_send_to(data, dest).map_err(Error::Send)?;
        }
        Ok(())
    }

    /// Send one RTCP datagram to the current remote's RTCP companion port.
    pub async fn send_rtcp(&self, data: &[u8]) -> Result<()> {
        if data.len() < MIN_RTCP_LEN {
            return Ok(());
        }
        let state = self.state.lock();
        let Some(dest) = state.remote_rtcp else { return Ok(()) };
        if let Some(sockets) = &state.sockets {
            if let Some(rtcp) = &sockets.rtcp {
                rtcp.try_send_to(data, dest).map_err(Error::Send)?;
            }
        }
        Ok(())
    }

    /// Send one zero-length-payload datagram to each bound remote, to open
    /// a NAT pinhole before real traffic flows.
    pub async fn drill_hole(&self) -> bool {
        const PUNCH: [u8; 4] = [0, 0, 0, 0];
        let (rtp_dest, rtcp_dest) = {
            let state = self.state.lock();
            (state.remote_addr, state.remote_rtcp)
        };
        let Some(rtp_dest) = rtp_dest else { return false };
        let state = self.state.lock();
        let Some(sockets) = &state.sockets else { return false };
        let sent = sockets.rtp.try_send_to(&PUNCH, rtp_dest).is_ok();
        if sent {
            if let (Some(rtcp), Some(rtcp_dest)) = (&sockets.rtcp, rtcp_dest) {
                let _ = rtcp.try_send_to(&PUNCH, rtcp_dest);
            }
        }
        sent
    }

    fn min_len(&self) -> usize {
        match self.kind {
            TransportKind::Rtp => MIN_RTP_LEN,
            TransportKind::Udptl => MIN_UDPTL_LEN,
        }
    }

    async fn drain_rtp(&self) {
        let mut buf = [0u8; crate::DEFAULT_MAX_PACKET_SIZE];
        loop {
            let (len, from, bound) = {
                let state = self.state.lock();
                let Some(sockets) = &state.sockets else { return };
                match sockets.rtp.try_recv_from(&mut buf) {
                    Ok((len, from)) => (len, from, true),
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                    Err(_) => return,
                }
            };
            if !bound || len < self.min_len() {
                continue;
            }
            if self.kind == TransportKind::Rtp && (buf[0] & 0xc0) != 0x80 {
                continue;
            }

            let (deliver, processor, monitor) = {
                let mut state = self.state.lock();
                let Some(remote) = state.remote_addr else { continue };

                let mut preferred = false;
                if (state.auto_remote || { preferred = Some(from) == state.remote_pref; preferred })
                    && from != remote
                {
                    info!(%from, preferred, "auto-changing remote address");
                    if preferred {
                        state.remote_pref = None;
                    }
                    state.remote_addr = Some(from);
                    state.remote_rtcp = Some(SocketAddr::new(from.ip(), from.port() + 1));
                }
                state.auto_remote = false;

                let deliver = state.remote_addr == Some(from);
                if !deliver {
                    state.wrong_src_count += 1;
                }
                (deliver, state.processor.clone(), state.monitor.clone())
            };

            if deliver {
                if let Some(processor) = &processor {
                    processor.on_rtp(&buf[..len]).await;
                }
                if let Some(monitor) = &monitor {
                    monitor.note_rtp(len);
                }
            } else if let Some(processor) = &processor {
                processor.inc_wrong_src();
            }
        }
    }

    async fn drain_rtcp(&self) {
        let mut buf = [0u8; crate::DEFAULT_MAX_PACKET_SIZE];
        loop {
            let (len, from) = {
                let state = self.state.lock();
                let Some(sockets) = &state.sockets else { return };
                let Some(rtcp) = &sockets.rtcp else { return };
                match rtcp.try_recv_from(&mut buf) {
                    Ok(pair) => pair,
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                    Err(_) => return,
                }
            };
            if len < MIN_RTCP_LEN {
                continue;
            }
            let (matches, processor, monitor) = {
                let state = self.state.lock();
                (state.remote_rtcp == Some(from), state.processor.clone(), state.monitor.clone())
            };
            if !matches {
                continue;
            }
            if let Some(processor) = &processor {
                processor.on_rtcp(&buf[..len]).await;
            }
            if let Some(monitor) = &monitor {
                monitor.note_rtcp(len);
            }
        }
    }

    /// Number of datagrams received from an address other than the
    /// current remote since the last check, cleared on read.
    pub fn take_wrong_src_count(&self) -> u32 {
        let mut state = self.state.lock();
        std::mem::take(&mut state.wrong_src_count)
    }

    /// Mark this transport as finished; the owning [`crate::group::Group`]
    /// will drop it on its next reap pass.
    pub fn finish(&self) {
        self.state.lock().finished = true;
    }
}

#[async_trait]
impl Processor for Transport {
    async fn tick(&self, _now: std::time::Instant) {
        self.drain_rtp().await;
        self.drain_rtcp().await;
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        registry::unregister_transport(&self.id);
    }
}

#[async_trait]
impl RtpSink for Transport {
    /// Used for reflector pairing: forwarding a validated datagram from
    /// one leg means sending it out the other leg's remote unchanged.
    async fn on_rtp(&self, data: &[u8]) {
        let _ = self.send_rtp(data).await;
    }

    async fn on_rtcp(&self, data: &[u8]) {
        let _ = self.send_rtcp(data).await;
    }
}

/// Helper retained for tests and callers that only need socket-pair
/// parity checking without a full bound transport.
pub fn ports_are_adjacent_even_pair(rtp_port: u16, rtcp_port: u16) -> bool {
    rtp_port % 2 == 0 && rtcp_port == rtp_port + 1
}
