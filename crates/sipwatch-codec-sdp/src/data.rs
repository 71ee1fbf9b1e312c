//! SDP types: one `SdpData` per message body, holding an optional
//! session-level connection and zero or more media descriptions.

/// A `c=<nettype> <addrtype> <address>` line, valid either at session level
/// (applies to all media that don't override it) or per-media.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SdpConnection {
    pub nettype: String,
    pub addrtype: String,
    pub address: String,
}

/// One payload format referenced by a media line's format list, resolved
/// to a human name either from the built-in static table or from an
/// explicit `a=rtpmap` attribute for dynamic payload types.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SdpFormat {
    pub payload_type: u8,
    pub name: Option<String>,
}

/// One `m=<media> <port> <proto> <fmt>...` line and the attributes/
/// connection that apply to it.
#[derive(Clone, Debug)]
pub struct SdpMedia {
    pub media_type: String,
    pub port: u16,
    pub proto: String,
    pub formats: Vec<SdpFormat>,
    /// `None` means this media inherits the session-level connection.
    pub connection: Option<SdpConnection>,
    pub rtcp_port: Option<u16>,
    /// MRCP channel identifier from an `a=channel:<id>` attribute, when
    /// present (RFC 6787 media control channels layered over SDP).
    pub channel: Option<String>,
}

impl SdpMedia {
    pub fn new(media_type: String, port: u16, proto: String) -> Self {
        Self {
            media_type,
            port,
            proto,
            formats: Vec::new(),
            connection: None,
            rtcp_port: None,
            channel: None,
        }
    }
}

/// The full parsed SDP body belonging to one SIP message.
#[derive(Clone, Debug, Default)]
pub struct SdpData {
    pub session_connection: Option<SdpConnection>,
    pub media: Vec<SdpMedia>,
}

impl SdpData {
    pub fn new() -> Self {
        Self::default()
    }

    /// The effective connection for media at index `idx`: its own if set,
    /// otherwise the session-level one.
    pub fn effective_connection(&self, idx: usize) -> Option<&SdpConnection> {
        self.media.get(idx).and_then(|m| m.connection.as_ref()).or(self.session_connection.as_ref())
    }
}

/// Well-known top-level media types (RFC 4566 §5.14), matching the
/// original dissector's `media_types[]` table; anything else is still
/// accepted and stored verbatim (SDP does not close this set).
pub const KNOWN_MEDIA_TYPES: &[&str] = &["audio", "video", "text", "application", "message", "image"];

pub fn is_known_media_type(media_type: &str) -> bool {
    KNOWN_MEDIA_TYPES.iter().any(|m| m.eq_ignore_ascii_case(media_type))
}
