//! Line-oriented SDP parsing: `c=`, `m=` and `a=` lines, matching the
//! dispatch-by-first-character loop of the original dissector. Every line
//! here is a simple whitespace/slash-separated grammar, so straight string
//! splitting is used rather than a parser combinator.

use crate::data::{SdpConnection, SdpFormat, SdpMedia};
use crate::error::SdpParseError;

pub fn parse_connection(value: &str) -> Result<SdpConnection, SdpParseError> {
    let mut parts = value.split_whitespace();
    let nettype = parts.next().ok_or_else(|| SdpParseError::MalformedConnection(value.to_string()))?;
    let addrtype = parts.next().ok_or_else(|| SdpParseError::MalformedConnection(value.to_string()))?;
    let address = parts.next().ok_or_else(|| SdpParseError::MalformedConnection(value.to_string()))?;
    Ok(SdpConnection {
        nettype: nettype.to_string(),
        addrtype: addrtype.to_string(),
        address: address.split('/').next().unwrap_or(address).to_string(),
    })
}

pub fn parse_media(value: &str) -> Result<SdpMedia, SdpParseError> {
    let mut parts = value.split_whitespace();
    let media_type = parts.next().ok_or_else(|| SdpParseError::MalformedMedia(value.to_string()))?;
    let port_field = parts.next().ok_or_else(|| SdpParseError::MalformedMedia(value.to_string()))?;
    let proto = parts.next().ok_or_else(|| SdpParseError::MalformedMedia(value.to_string()))?;

    let port: u16 = port_field
        .split('/')
        .next()
        .unwrap_or(port_field)
        .parse()
        .map_err(|_| SdpParseError::MalformedMedia(value.to_string()))?;

    let mut media = SdpMedia::new(media_type.to_string(), port, proto.to_string());
    for fmt in parts {
        if let Ok(pt) = fmt.parse::<u8>() {
            media.formats.push(SdpFormat { payload_type: pt, name: None });
        }
    }
    Ok(media)
}

/// Parses an `a=rtpmap:<payload-type> <encoding>/<clock-rate>[/<channels>]`
/// attribute value (the part after `rtpmap:`), returning the payload type
/// and the rendered `encoding/clock[/channels]` name.
pub fn parse_rtpmap(value: &str) -> Option<(u8, String)> {
    let mut parts = value.trim().splitn(2, char::is_whitespace);
    let payload_type: u8 = parts.next()?.parse().ok()?;
    let name = parts.next()?.trim();
    if name.is_empty() {
        return None;
    }
    Some((payload_type, name.to_string()))
}

/// Parses an `a=rtcp:<port>` attribute value.
pub fn parse_rtcp_port(value: &str) -> Option<u16> {
    value.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_connection() {
        let conn = parse_connection("IN IP4 10.0.0.1").unwrap();
        assert_eq!(conn.nettype, "IN");
        assert_eq!(conn.addrtype, "IP4");
        assert_eq!(conn.address, "10.0.0.1");
    }

    #[test]
    fn parses_media_line_with_formats() {
        let media = parse_media("audio 49170 RTP/AVP 0 8 101").unwrap();
        assert_eq!(media.media_type, "audio");
        assert_eq!(media.port, 49170);
        assert_eq!(media.formats.len(), 3);
    }

    #[test]
    fn parses_rtpmap_with_channels() {
        let (pt, name) = parse_rtpmap("0 PCMU/8000").unwrap();
        assert_eq!(pt, 0);
        assert_eq!(name, "PCMU/8000");

        let (pt, name) = parse_rtpmap("97 L16/44100/2").unwrap();
        assert_eq!(pt, 97);
        assert_eq!(name, "L16/44100/2");
    }
}
