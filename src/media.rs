//! Upper-edge traits connecting a [`crate::session::Session`] to whatever
//! produces and consumes decoded audio/video frames. The codec itself is
//! always external (spec.md Non-goals); this crate only moves bytes.

use crate::Result;

/// A decoded media frame ready for transmission, or just received and
/// decoded from the network. Payload bytes are opaque to this crate.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub payload_type: u8,
    pub timestamp: u32,
    pub marker: bool,
    pub data: Vec<u8>,
}

/// Something that produces frames for a [`crate::session::Session`] to
/// chunk and transmit as RTP. Typically a codec, a file player, or a
/// conference mixer output.
pub trait MediaSource: Send {
    /// Pull the next frame to send, if one is ready. `None` means no frame
    /// is currently available; the session falls back to comfort noise or
    /// silence per its configuration rather than blocking.
    fn next_frame(&mut self) -> Option<MediaFrame>;
}

/// Something that accepts frames a [`crate::session::Session`] decoded
/// from inbound RTP. Typically a codec or a recording sink.
pub trait MediaConsumer: Send {
    /// Deliver one decoded frame. Errors here are logged by the session
    /// and do not interrupt the RTP stream.
    fn accept_frame(&mut self, frame: MediaFrame) -> Result<()>;
}
