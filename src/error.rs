//! Crate-wide error type
//!
//! Every fallible operation in this crate returns `Result<T>`. Nothing
//! unwinds: protocol and crypto errors are dropped silently by the caller
//! (see the data-path modules), while construction and I/O errors are
//! surfaced here as values.

use std::net::SocketAddr;

/// Errors produced by the RTP/RTCP media transport core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to create or bind a UDP socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A send on an already-bound socket failed.
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    /// A non-blocking receive failed for a reason other than would-block.
    #[error("recv failed: {0}")]
    Recv(#[source] std::io::Error),

    /// No even port could be allocated within the configured range.
    #[error("no free port in range [{min}, {max})")]
    PortRangeExhausted { min: u16, max: u16 },

    /// The requested port range is not usable (e.g. min >= max with no widening possible).
    #[error("invalid port range [{min}, {max})")]
    InvalidPortRange { min: u16, max: u16 },

    /// Construction was attempted with an inconsistent or missing configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A buffer was shorter than the minimum required to decode a structure.
    #[error("buffer too small: need {required} bytes, have {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// An RTCP packet failed to parse.
    #[error("rtcp error: {0}")]
    Rtcp(String),

    /// An RTP header failed to parse (bad version, truncated).
    #[error("rtp error: {0}")]
    Rtp(String),

    /// The requested SRTP/SDES suite is not supported by the configured cipher provider.
    #[error("unsupported SRTP suite: {0}")]
    UnsupportedSuite(String),

    /// SRTP key/salt material was missing or the wrong length for the suite.
    #[error("invalid SRTP key material: {0}")]
    InvalidKeyMaterial(String),

    /// SRTP authentication tag verification failed; never distinguish this from a short packet.
    #[error("srtp authentication failed")]
    AuthenticationFailed,

    /// A Session/Group/Reflector operation was attempted in an invalid state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Two reflector legs reported conflicting peer identities.
    #[error("reflector leg mismatch: expected {expected}, got {got}")]
    ReflectorMismatch { expected: String, got: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
