//! Phone identifier normalization
//!
//! The underlying client addresses direct chats as `<digits>@c.us`, while the
//! Cloud API speaks bare digit strings (`wa_id`). Callers may send either form,
//! with or without a leading `+`.

/// Routing suffix for direct (one-to-one) chats
pub const CHAT_SUFFIX: &str = "@c.us";

/// Both forms of a normalized identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneId {
    /// Transport-ready identifier, always carrying a routing suffix
    pub chat_id: String,
    /// Bare identifier with no suffix and no leading `+`
    pub wa_id: String,
}

/// Normalize a loosely formatted identifier.
///
/// An existing routing suffix is kept as-is so group or broadcast ids survive;
/// bare numbers get [`CHAT_SUFFIX`].
pub fn normalize(raw: &str) -> PhoneId {
    let raw = raw.trim();
    let (number, suffix) = match raw.find('@') {
        Some(at) => raw.split_at(at),
        None => (raw, CHAT_SUFFIX),
    };
    let wa_id = number
        .trim_start_matches(|c: char| c == '+' || c.is_whitespace())
        .trim_end()
        .to_string();

    PhoneId {
        chat_id: format!("{}{}", wa_id, suffix),
        wa_id,
    }
}

/// Strip the routing suffix and any leading `+`, returning the bare form
pub fn bare(raw: &str) -> String {
    normalize(raw).wa_id
}
