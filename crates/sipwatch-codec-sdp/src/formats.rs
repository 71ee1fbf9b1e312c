//! The built-in RTP static payload type table (RFC 3551 §6) used to name
//! payload types that a media line references without its own `a=rtpmap`.
//! Reproduced with the same ids, encoding/clock-rate strings and short
//! aliases as the original C dissector's `formats[]` table.

/// One statically-assigned RTP payload type.
#[derive(Clone, Copy, Debug)]
pub struct RtpFormat {
    pub payload_type: u8,
    /// `encoding/clock-rate[/channels]`, e.g. `"PCMU/8000"`.
    pub name: &'static str,
    /// Short alias accepted when matching against filter expressions.
    pub alias: &'static str,
}

macro_rules! format_table {
    ($(($pt:expr, $name:expr, $alias:expr)),* $(,)?) => {
        &[$(RtpFormat { payload_type: $pt, name: $name, alias: $alias }),*]
    };
}

pub const STATIC_FORMATS: &[RtpFormat] = format_table![
    (0, "PCMU/8000", "g711u"),
    (3, "GSM/8000", "gsm"),
    (4, "G723/8000", "g723"),
    (5, "DVI4/8000", "dvi"),
    (6, "DVI4/16000", "dvi"),
    (7, "LPC/8000", "lpc"),
    (8, "PCMA/8000", "g711a"),
    (9, "G722/8000", "g722"),
    (10, "L16/44100", "l16"),
    (11, "L16/44100", "l16"),
    (12, "QCELP/8000", "qcelp"),
    (13, "CN/8000", "cn"),
    (14, "MPA/90000", "mpa"),
    (15, "G728/8000", "g728"),
    (16, "DVI4/11025", "dvi"),
    (17, "DVI4/22050", "dvi"),
    (18, "G729/8000", "g729"),
    (25, "CelB/90000", "celb"),
    (26, "JPEG/90000", "jpeg"),
    (28, "nv/90000", "nv"),
    (31, "H261/90000", "h261"),
    (32, "MPV/90000", "mpv"),
    (33, "MP2T/90000", "mp2t"),
    (34, "H263/90000", "h263"),
];

/// Dynamic payload types (RFC 3551 §3) are not statically named; the range
/// is 96-127 and must be resolved via an explicit `a=rtpmap` on the media
/// line carrying them.
pub const DYNAMIC_RANGE: std::ops::RangeInclusive<u8> = 96..=127;

pub fn lookup_static(payload_type: u8) -> Option<&'static RtpFormat> {
    STATIC_FORMATS.iter().find(|f| f.payload_type == payload_type)
}

pub fn is_dynamic(payload_type: u8) -> bool {
    DYNAMIC_RANGE.contains(&payload_type)
}
