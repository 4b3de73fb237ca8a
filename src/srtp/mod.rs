//! Secure RTP orchestration layer (spec.md §4.4).
//!
//! This module never implements a cipher itself. It resolves a named
//! suite to an injected [`CipherProvider`], derives the SRTP packet index
//! from the rollover counter and sequence number, and enforces
//! verify-then-decrypt / encrypt-then-tag ordering. AES, HMAC and GCM
//! implementations live entirely behind the provider the embedding
//! application supplies.

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{Bytes, BytesMut};

use crate::packet::RtpHeader;
use crate::{Error, Result, RtpSequenceNumber};

/// Direction a [`CipherProvider`] is asked to operate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Master key/salt material for one direction, opaque beyond length.
#[derive(Clone)]
pub struct KeyMaterial {
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl KeyMaterial {
    pub fn new(key: Vec<u8>, salt: Vec<u8>) -> Self {
        Self { key, salt }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_len", &self.key.len())
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

/// External cipher implementation, resolved by suite name. The core only
/// orchestrates: packet-index derivation, header/payload framing and
/// verify-before-decrypt ordering all live here, but the actual AES/HMAC
/// math is the provider's job.
pub trait CipherProvider: Send + Sync {
    /// True if this provider can operate the named suite, e.g.
    /// `"AES_CM_128_HMAC_SHA1_80"`.
    fn check_cipher(&self, suite: &str) -> bool;

    /// Encrypt `payload` in place and return ciphertext with the
    /// authentication tag appended.
    fn encrypt(&self, suite: &str, keys: &KeyMaterial, packet_index: u64, header: &[u8], payload: &[u8]) -> Result<Bytes>;

    /// Verify the authentication tag and decrypt. Any failure -- bad tag,
    /// truncated input, unsupported suite -- must return the same error
    /// variant so a peer cannot distinguish them by timing or message.
    fn decrypt(&self, suite: &str, keys: &KeyMaterial, packet_index: u64, header: &[u8], ciphertext: &[u8]) -> Result<Bytes>;
}

/// Per-direction SRTP state: suite name, key material and the rollover
/// bookkeeping needed to derive the 48-bit packet index from the 16-bit
/// wire sequence number.
pub struct SecurityContext {
    suite: String,
    keys: KeyMaterial,
    provider: std::sync::Arc<dyn CipherProvider>,
    rollover_counter: AtomicU32,
    last_sequence: AtomicU32,
    seen_any: std::sync::atomic::AtomicBool,
}

impl SecurityContext {
    /// Construct a context, rejecting the suite up front via
    /// [`CipherProvider::check_cipher`] so bad key material is never
    /// accepted for an unsupported suite.
    pub fn new(suite: impl Into<String>, keys: KeyMaterial, provider: std::sync::Arc<dyn CipherProvider>) -> Result<Self> {
        let suite = suite.into();
        if !provider.check_cipher(&suite) {
            return Err(Error::UnsupportedSuite(suite));
        }
        if keys.key.is_empty() || keys.salt.is_empty() {
            return Err(Error::InvalidKeyMaterial("key and salt must be non-empty".into()));
        }
        Ok(Self {
            suite,
            keys,
            provider,
            rollover_counter: AtomicU32::new(0),
            last_sequence: AtomicU32::new(0),
            seen_any: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Derive this packet's 48-bit index and advance the rollover counter
    /// if `sequence` wrapped around since the last call. Only valid to
    /// call once per packet, in packet arrival/send order.
    fn next_packet_index(&self, sequence: RtpSequenceNumber) -> u64 {
        let seq = sequence as u32;
        if self.seen_any.swap(true, Ordering::AcqRel) {
            let last = self.last_sequence.load(Ordering::Acquire);
            // A large backward jump in the 16-bit sequence space means the
            // counter wrapped forward; a large forward jump near the top
            // of the space restores a counter that had wrapped early.
            if last > 0xC000 && seq < 0x4000 {
                self.rollover_counter.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.last_sequence.store(seq, Ordering::Release);
        ((self.rollover_counter.load(Ordering::Acquire) as u64) << 16) | seq as u64
    }

    /// Encrypt an already-serialized RTP packet: `header_bytes` is the
    /// fixed/CSRC header (authenticated but not encrypted), `payload` is
    /// the RTP payload to protect.
    pub fn protect(&self, header: &RtpHeader, header_bytes: &[u8], payload: &[u8]) -> Result<Bytes> {
        let index = self.next_packet_index(header.sequence_number);
        let ciphertext = self.provider.encrypt(&self.suite, &self.keys, index, header_bytes, payload)?;
        let mut out = BytesMut::with_capacity(header_bytes.len() + ciphertext.len());
        out.extend_from_slice(header_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out.freeze())
    }

    /// Verify and decrypt an inbound SRTP packet. `header_bytes` is the
    /// same authenticated header region used at encrypt time.
    pub fn unprotect(&self, header: &RtpHeader, header_bytes: &[u8], ciphertext: &[u8]) -> Result<Bytes> {
        let index = self.next_packet_index(header.sequence_number);
        self.provider
            .decrypt(&self.suite, &self.keys, index, header_bytes, ciphertext)
            .map_err(|_| Error::AuthenticationFailed)
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }
}
