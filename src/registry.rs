//! Process-wide bookkeeping of live transports and reflectors.
//!
//! The original engine kept a single global list of RTP sessions so that an
//! admin console or the message bus could enumerate active calls without
//! threading a handle through every layer. This crate keeps that shape: one
//! process-wide table, guarded by one lock, holding only identity and
//! summary counters -- never the sockets themselves.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::RtpSsrc;

/// Snapshot of a registered transport's identity, enough for an external
/// console to list active media without touching the live socket.
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub id: String,
    pub local_port: u16,
    pub remote: Option<std::net::SocketAddr>,
    pub ssrc: Option<RtpSsrc>,
}

/// Snapshot of a registered reflector pairing.
#[derive(Debug, Clone)]
pub struct ReflectorInfo {
    pub id_a: String,
    pub id_b: Option<String>,
}

#[derive(Default)]
struct Registry {
    transports: HashMap<String, TransportInfo>,
    reflectors: HashMap<String, ReflectorInfo>,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));

/// Generate an identity for a transport or reflector leg that wasn't given
/// one explicitly by the signalling layer.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Register (or overwrite) a transport's identity snapshot.
pub fn register_transport(info: TransportInfo) {
    REGISTRY.lock().transports.insert(info.id.clone(), info);
}

/// Remove a transport from the registry, typically on hangup.
pub fn unregister_transport(id: &str) {
    REGISTRY.lock().transports.remove(id);
}

/// Fetch a copy of a transport's current snapshot, if registered.
pub fn transport(id: &str) -> Option<TransportInfo> {
    REGISTRY.lock().transports.get(id).cloned()
}

/// List every currently registered transport.
pub fn list_transports() -> Vec<TransportInfo> {
    REGISTRY.lock().transports.values().cloned().collect()
}

/// Register (or overwrite) a reflector pairing.
pub fn register_reflector(info: ReflectorInfo) {
    REGISTRY.lock().reflectors.insert(info.id_a.clone(), info);
}

/// Remove a reflector pairing, keyed by its `id_a`.
pub fn unregister_reflector(id_a: &str) {
    REGISTRY.lock().reflectors.remove(id_a);
}

/// List every currently registered reflector pairing.
pub fn list_reflectors() -> Vec<ReflectorInfo> {
    REGISTRY.lock().reflectors.values().cloned().collect()
}
