//! Wires SDP line parsing into the dissector chain. Mirrors the original
//! dissector's single pass over `c=`/`m=`/`a=` lines: each `m=` line opens
//! a new media description that subsequent `c=`/`a=` lines apply to, until
//! the next `m=` line or the end of the body.

use bytes::Bytes;
use sipwatch_core::{DissectError, Dissector, DissectorId, Packet};

use crate::data::SdpData;
use crate::parse::{parse_connection, parse_media, parse_rtcp_port, parse_rtpmap};
use crate::{is_known_media_type, lookup_static};

pub const ID_SDP: DissectorId = DissectorId::new(11);

pub struct SdpDissector;

impl Dissector for SdpDissector {
    fn name(&self) -> &'static str {
        "sdp"
    }

    fn id(&self) -> DissectorId {
        ID_SDP
    }

    fn dissect(&self, packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError> {
        let text = std::str::from_utf8(&input).map_err(|_| DissectError::decode(self.name(), "non-UTF-8 SDP body"))?;

        let mut data = SdpData::new();
        let mut current_media: Option<usize> = None;

        for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
            let line = line.trim_end_matches('\r');
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                continue;
            }
            let kind = line.as_bytes()[0];
            let value = &line[2..];

            match kind {
                b'c' => {
                    let conn = parse_connection(value).map_err(|e| DissectError::decode(self.name(), e.to_string()))?;
                    match current_media {
                        Some(idx) => data.media[idx].connection = Some(conn),
                        None => data.session_connection = Some(conn),
                    }
                }
                b'm' => {
                    let mut media = parse_media(value).map_err(|e| DissectError::decode(self.name(), e.to_string()))?;
                    if !is_known_media_type(&media.media_type) {
                        tracing::debug!(media_type = %media.media_type, "unrecognized SDP media type, keeping verbatim");
                    }
                    for fmt in &mut media.formats {
                        fmt.name = lookup_static(fmt.payload_type).map(|f| f.name.to_string());
                    }
                    data.media.push(media);
                    current_media = Some(data.media.len() - 1);
                }
                b'a' => {
                    let Some(idx) = current_media else { continue };
                    if let Some(rest) = value.strip_prefix("rtpmap:") {
                        if let Some((pt, name)) = parse_rtpmap(rest) {
                            if crate::is_dynamic(pt) {
                                if let Some(fmt) = data.media[idx].formats.iter_mut().find(|f| f.payload_type == pt) {
                                    fmt.name = Some(name);
                                }
                            }
                        }
                    } else if let Some(rest) = value.strip_prefix("rtcp:") {
                        data.media[idx].rtcp_port = parse_rtcp_port(rest);
                    } else if let Some(rest) = value.strip_prefix("channel:") {
                        data.media[idx].channel = Some(rest.trim().to_string());
                    }
                }
                _ => {}
            }
        }

        packet.protocol_data_mut().insert(ID_SDP, data);
        Ok(None)
    }
}

pub fn sdp_of(packet: &Packet) -> Option<&SdpData> {
    packet.protocol_data().get::<SdpData>(ID_SDP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sipwatch_core::Address;

    fn test_packet() -> Packet {
        Packet::new(Address::new("10.0.0.1".parse().unwrap(), 5060), Address::new("10.0.0.2".parse().unwrap(), 5060), 0, 0)
    }

    #[test]
    fn media_inherits_session_connection() {
        let body = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 49170 RTP/AVP 0\r\n";
        let mut packet = test_packet();
        SdpDissector.dissect(&mut packet, Bytes::from(body)).unwrap();
        let data = sdp_of(&packet).unwrap();
        assert_eq!(data.effective_connection(0).unwrap().address, "10.0.0.1");
        assert_eq!(data.media[0].formats[0].name.as_deref(), Some("PCMU/8000"));
    }

    #[test]
    fn mrcp_channel_attribute_is_recorded() {
        let body = "v=0\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=application 9 TCP/MRCPv2 1\r\na=channel:32AECB23433802@speechsynth\r\n";
        let mut packet = test_packet();
        SdpDissector.dissect(&mut packet, Bytes::from(body)).unwrap();
        let data = sdp_of(&packet).unwrap();
        assert_eq!(data.media[0].channel.as_deref(), Some("32AECB23433802@speechsynth"));
    }

    #[test]
    fn rtpmap_on_a_standard_payload_type_is_ignored() {
        let body = "v=0\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 49170 RTP/AVP 0\r\na=rtpmap:0 FOO/8000\r\n";
        let mut packet = test_packet();
        SdpDissector.dissect(&mut packet, Bytes::from(body)).unwrap();
        let data = sdp_of(&packet).unwrap();
        assert_eq!(data.media[0].formats[0].name.as_deref(), Some("PCMU/8000"));
    }

    #[test]
    fn dynamic_payload_named_via_rtpmap() {
        let body = "v=0\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 49170 RTP/AVP 97\r\na=rtpmap:97 opus/48000/2\r\n";
        let mut packet = test_packet();
        SdpDissector.dissect(&mut packet, Bytes::from(body)).unwrap();
        let data = sdp_of(&packet).unwrap();
        assert_eq!(data.media[0].formats[0].name.as_deref(), Some("opus/48000/2"));
    }

    #[test]
    fn media_specific_connection_overrides_session() {
        let body = "v=0\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=video 51372 RTP/AVP 34\r\nc=IN IP4 10.0.0.9\r\n";
        let mut packet = test_packet();
        SdpDissector.dissect(&mut packet, Bytes::from(body)).unwrap();
        let data = sdp_of(&packet).unwrap();
        assert_eq!(data.effective_connection(0).unwrap().address, "10.0.0.9");
    }
}
