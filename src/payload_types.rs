//! Static symbolic-name <-> numeric payload-type dictionary (spec.md §6).
//!
//! The core never interprets payload bytes by name; this table exists only
//! to translate between the signalling layer's codec names and the numeric
//! RTP payload type written on the wire.

/// `(symbolic name, payload type)` pairs for the statically assigned types
/// this engine commonly negotiates. Dynamic types (96-127) are assigned by
/// the signalling layer and are not looked up here.
const TABLE: &[(&str, u8)] = &[
    ("mulaw", 0),
    ("gsm", 3),
    ("g723", 4),
    ("dvi4/8000", 5),
    ("dvi4/16000", 6),
    ("alaw", 8),
    ("g722", 9),
    ("g728", 15),
    ("g729", 18),
    ("h261", 31),
    ("mpv", 32),
    ("mp2t", 33),
    ("h263", 34),
];

/// Look up the numeric payload type for a symbolic codec name.
///
/// Matching is case-insensitive. Names not present in the static table
/// (e.g. `ilbc`, `amr`, `speex`, `mjpeg`, `mp4v`) are dynamically-assigned
/// in practice and must be resolved by the signalling layer instead.
pub fn payload_type_for_name(name: &str) -> Option<u8> {
    TABLE
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, pt)| *pt)
}

/// Look up the symbolic codec name for a numeric payload type.
pub fn name_for_payload_type(pt: u8) -> Option<&'static str> {
    TABLE.iter().find(|(_, p)| *p == pt).map(|(n, _)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_known_names() {
        assert_eq!(payload_type_for_name("mulaw"), Some(0));
        assert_eq!(payload_type_for_name("PCMA"), None); // not in the static table by that alias
        assert_eq!(payload_type_for_name("alaw"), Some(8));
        assert_eq!(payload_type_for_name("ALAW"), Some(8));
    }

    #[test]
    fn round_trips_name_and_type() {
        assert_eq!(name_for_payload_type(0), Some("mulaw"));
        assert_eq!(name_for_payload_type(200), None);
    }
}
