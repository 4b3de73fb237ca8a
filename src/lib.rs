//! Real-time media transport core for a telephony engine.
//!
//! This crate is the media plane only: an RTP/RTCP transport pair bound to a
//! UDP port range, a cooperative scheduler that ticks a set of processors at
//! a bounded interval, a session state machine with jitter buffering and
//! telephony-event (DTMF) handling, an SRTP secure layer orchestrated over an
//! injected cipher provider, and an RTP reflector that cross-wires two
//! endpoints. Call signalling, configuration-file parsing, the admin
//! console, the scripting engine, message-bus dispatch, codec
//! implementations and key-exchange policy are all external collaborators
//! reached through the traits in [`media`], [`control`], and [`srtp`].

pub mod config;
pub mod control;
pub mod endpoint;
pub mod error;
pub mod group;
pub mod jitter;
pub mod media;
pub mod monitor;
pub mod packet;
pub mod payload_types;
pub mod reflector;
pub mod registry;
pub mod session;
pub mod srtp;
pub mod time;
pub mod transport;

pub use error::{Error, Result};

/// RTP sequence number (RFC 3550 §5.1), wraps at 16 bits.
pub type RtpSequenceNumber = u16;

/// RTP timestamp (RFC 3550 §5.1), wraps at 32 bits.
pub type RtpTimestamp = u32;

/// RTP synchronization source identifier.
pub type RtpSsrc = u32;

/// Default cap on a single datagram this crate will allocate a buffer for.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1500;

/// Default preferred chunk size (bytes) used when splitting outbound audio,
/// matching spec.md §4.3's 160-byte default (20 ms of 8 kHz mu-law/A-law).
pub const DEFAULT_PREFERRED_CHUNK: usize = 160;

/// Comfort-noise payload type (RFC 3389), recognised to latch the silence payload.
pub const COMFORT_NOISE_PAYLOAD_TYPE: u8 = 13;
