//! Configuration surface for the media transport core (spec.md §6).
//!
//! Parsing these values out of a config file or provisioning message is the
//! embedding application's job; this crate only defines the knobs and their
//! defaults, in the teacher's `ClientConfigBuilder` style.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// IP TOS / DSCP class requested for RTP sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tos {
    #[default]
    LowDelay,
    Throughput,
    Reliability,
    MinCost,
}

impl Tos {
    /// Classic IPv4 TOS byte values for each class (RFC 1349 precedence-free bits).
    pub fn to_byte(self) -> u8 {
        match self {
            Tos::LowDelay => 0x10,
            Tos::Throughput => 0x08,
            Tos::Reliability => 0x04,
            Tos::MinCost => 0x02,
        }
    }
}

/// Process-wide and per-Group/Transport/Session configuration.
///
/// Deserializable so an embedding application can load it straight out of
/// its own provisioning format; this crate never reads a config file
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtpConfig {
    /// Inclusive lower bound of the even-port allocation range.
    pub min_port: u16,
    /// Exclusive upper bound of the even-port allocation range.
    pub max_port: u16,
    /// Transport buffer size in samples, used to size outbound chunking.
    pub buffer_samples: u32,
    /// Process-wide floor on a Group's tick interval, clamped to [1, 20] ms.
    pub min_sleep_ms: u64,
    /// This Group's tick interval, clamped to [1, 50] ms.
    pub def_sleep_ms: u64,
    /// Sniff the source address of inbound datagrams and auto-switch the remote.
    pub auto_addr: bool,
    /// Accept any inbound SSRC rather than locking to the first one seen.
    pub any_ssrc: bool,
    /// Bind the RTCP companion socket.
    pub want_rtcp: bool,
    /// Send NAT pinhole datagrams before real traffic flows.
    pub drill_hole: bool,
    /// Inactivity threshold in milliseconds; 0 disables timeout notifications.
    pub timeout_ms: u64,
    /// Emit repeat timeout notifications after the first one.
    pub warn_later: bool,
    /// Fixed RTP padding length in bytes.
    pub padding_len: u8,
    /// IP TOS class requested on bound sockets.
    pub tos: Tos,
    /// Local bind address override; `None` lets the OS pick.
    pub local_ip: Option<IpAddr>,
    /// Name used in upward timeout notifications.
    pub notify_msg: String,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            min_port: 16384,
            max_port: 32768,
            buffer_samples: 240,
            min_sleep_ms: 5,
            def_sleep_ms: 5,
            auto_addr: true,
            any_ssrc: false,
            want_rtcp: true,
            drill_hole: false,
            timeout_ms: 3000,
            warn_later: false,
            padding_len: 0,
            tos: Tos::default(),
            local_ip: None,
            notify_msg: "timeout".to_string(),
        }
    }
}

impl RtpConfig {
    pub fn builder() -> RtpConfigBuilder {
        RtpConfigBuilder::new()
    }

    /// `def_sleep_ms` clamped to [1, 50], per spec.md §3's Group invariant.
    pub fn group_sleep_ms(&self) -> u64 {
        self.def_sleep_ms.clamp(1, 50)
    }

    /// `min_sleep_ms` clamped to [1, 20], the process-wide floor.
    pub fn min_sleep_ms_clamped(&self) -> u64 {
        self.min_sleep_ms.clamp(1, 20)
    }
}

/// Builder for [`RtpConfig`], mirroring the teacher crate's `ClientConfigBuilder`.
#[derive(Debug, Clone, Default)]
pub struct RtpConfigBuilder {
    config: RtpConfig,
}

impl RtpConfigBuilder {
    pub fn new() -> Self {
        Self { config: RtpConfig::default() }
    }

    pub fn port_range(mut self, min: u16, max: u16) -> Self {
        self.config.min_port = min;
        self.config.max_port = max;
        self
    }

    pub fn buffer_samples(mut self, samples: u32) -> Self {
        self.config.buffer_samples = samples;
        self
    }

    pub fn min_sleep_ms(mut self, ms: u64) -> Self {
        self.config.min_sleep_ms = ms;
        self
    }

    pub fn def_sleep_ms(mut self, ms: u64) -> Self {
        self.config.def_sleep_ms = ms;
        self
    }

    pub fn auto_addr(mut self, enable: bool) -> Self {
        self.config.auto_addr = enable;
        self
    }

    pub fn any_ssrc(mut self, enable: bool) -> Self {
        self.config.any_ssrc = enable;
        self
    }

    pub fn want_rtcp(mut self, enable: bool) -> Self {
        self.config.want_rtcp = enable;
        self
    }

    pub fn drill_hole(mut self, enable: bool) -> Self {
        self.config.drill_hole = enable;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    pub fn warn_later(mut self, enable: bool) -> Self {
        self.config.warn_later = enable;
        self
    }

    pub fn padding_len(mut self, len: u8) -> Self {
        self.config.padding_len = len;
        self
    }

    pub fn tos(mut self, tos: Tos) -> Self {
        self.config.tos = tos;
        self
    }

    pub fn local_ip(mut self, ip: IpAddr) -> Self {
        self.config.local_ip = Some(ip);
        self
    }

    pub fn notify_msg(mut self, name: impl Into<String>) -> Self {
        self.config.notify_msg = name.into();
        self
    }

    pub fn build(self) -> RtpConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = RtpConfig::default();
        assert_eq!(config.min_port, 16384);
        assert_eq!(config.max_port, 32768);
        assert_eq!(config.timeout_ms, 3000);
        assert!(config.auto_addr);
        assert!(!config.any_ssrc);
        assert!(config.want_rtcp);
    }

    #[test]
    fn group_sleep_is_clamped() {
        let config = RtpConfig::builder().def_sleep_ms(500).build();
        assert_eq!(config.group_sleep_ms(), 50);
        let config = RtpConfig::builder().def_sleep_ms(0).build();
        assert_eq!(config.group_sleep_ms(), 1);
    }
}
