//! HEP v3 (Homer Encapsulation Protocol) decoding.
//!
//! No crate in the dependency corpus implements HEP, so this is a small
//! hand-rolled chunk-based binary decoder built directly over `bytes`/
//! `byteorder`, following the generic chunk vendor id (`0x0000`) table.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use sipwatch_core::Address;
use thiserror::Error;

const HEP_MAGIC: &[u8; 4] = b"HEP3";
const CHUNK_HEADER_LEN: usize = 6;

const CHUNK_IP_FAMILY: u16 = 1;
const CHUNK_IP_PROTOCOL: u16 = 2;
const CHUNK_IPV4_SRC: u16 = 3;
const CHUNK_IPV4_DST: u16 = 4;
const CHUNK_IPV6_SRC: u16 = 5;
const CHUNK_IPV6_DST: u16 = 6;
const CHUNK_SRC_PORT: u16 = 7;
const CHUNK_DST_PORT: u16 = 8;
const CHUNK_TS_SEC: u16 = 9;
const CHUNK_TS_USEC: u16 = 10;
const CHUNK_AUTH_KEY: u16 = 14;
const CHUNK_PAYLOAD: u16 = 15;

#[derive(Debug, Error)]
pub enum HepError {
    #[error("not a HEPv3 message")]
    BadMagic,

    #[error("truncated HEP message")]
    Truncated,

    #[error("missing required chunk {0}")]
    MissingChunk(u16),

    #[error("authentication failed")]
    AuthFailed,
}

pub struct DecodedHep {
    pub src: Address,
    pub dst: Address,
    pub timestamp: Option<(i64, u32)>,
    pub payload: Bytes,
}

fn push_chunk(buf: &mut Vec<u8>, chunk_type: u16, data: &[u8]) {
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&chunk_type.to_be_bytes());
    buf.extend_from_slice(&((CHUNK_HEADER_LEN + data.len()) as u16).to_be_bytes());
    buf.extend_from_slice(data);
}

/// Encodes `payload` as a HEP v3 datagram for the `capture output` sink
/// (spec.md §4.C9), the mirror image of [`decode`]. `secret`, when set,
/// is carried as the vendor auth chunk so a receiving listener configured
/// with the same secret accepts the re-encapsulated traffic.
pub fn encode(src: Address, dst: Address, unix_secs: i64, unix_nanos: u32, payload: &[u8], secret: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    match (src.ip(), dst.ip()) {
        (IpAddr::V4(src_ip), IpAddr::V4(dst_ip)) => {
            push_chunk(&mut body, CHUNK_IP_FAMILY, &[2]);
            push_chunk(&mut body, CHUNK_IPV4_SRC, &src_ip.octets());
            push_chunk(&mut body, CHUNK_IPV4_DST, &dst_ip.octets());
        }
        (src_ip, dst_ip) => {
            push_chunk(&mut body, CHUNK_IP_FAMILY, &[10]);
            let src_v6 = match src_ip {
                IpAddr::V6(a) => a,
                IpAddr::V4(a) => a.to_ipv6_mapped(),
            };
            let dst_v6 = match dst_ip {
                IpAddr::V6(a) => a,
                IpAddr::V4(a) => a.to_ipv6_mapped(),
            };
            push_chunk(&mut body, CHUNK_IPV6_SRC, &src_v6.octets());
            push_chunk(&mut body, CHUNK_IPV6_DST, &dst_v6.octets());
        }
    }
    push_chunk(&mut body, CHUNK_SRC_PORT, &src.port().to_be_bytes());
    push_chunk(&mut body, CHUNK_DST_PORT, &dst.port().to_be_bytes());
    push_chunk(&mut body, CHUNK_TS_SEC, &(unix_secs as u32).to_be_bytes());
    push_chunk(&mut body, CHUNK_TS_USEC, &(unix_nanos / 1000).to_be_bytes());
    if let Some(secret) = secret {
        push_chunk(&mut body, CHUNK_AUTH_KEY, secret.as_bytes());
    }
    push_chunk(&mut body, CHUNK_PAYLOAD, payload);

    let mut out = Vec::with_capacity(6 + body.len());
    out.extend_from_slice(HEP_MAGIC);
    out.extend_from_slice(&((6 + body.len()) as u16).to_be_bytes());
    out.extend_from_slice(&body);
    out
}

/// Decodes one HEP v3 UDP datagram. If `secret` is `Some`, a message
/// missing the authentication chunk or carrying a mismatching one is
/// rejected with [`HepError::AuthFailed`] rather than accepted silently.
pub fn decode(buf: &[u8], secret: Option<&str>) -> Result<DecodedHep, HepError> {
    if buf.len() < 6 || &buf[0..4] != HEP_MAGIC {
        return Err(HepError::BadMagic);
    }
    let total_len = usize::from(BigEndian::read_u16(&buf[4..6]));
    let buf = &buf[..total_len.min(buf.len())];

    let mut offset = 6;
    let mut ip_family = 0u8;
    let mut ipv4_src: Option<Ipv4Addr> = None;
    let mut ipv4_dst: Option<Ipv4Addr> = None;
    let mut ipv6_src: Option<Ipv6Addr> = None;
    let mut ipv6_dst: Option<Ipv6Addr> = None;
    let mut src_port = 0u16;
    let mut dst_port = 0u16;
    let mut ts_sec: Option<i64> = None;
    let mut ts_usec: Option<u32> = None;
    let mut payload: Option<Bytes> = None;
    let mut auth_ok = secret.is_none();

    while offset + CHUNK_HEADER_LEN <= buf.len() {
        let _vendor_id = BigEndian::read_u16(&buf[offset..offset + 2]);
        let chunk_type = BigEndian::read_u16(&buf[offset + 2..offset + 4]);
        let chunk_len = usize::from(BigEndian::read_u16(&buf[offset + 4..offset + 6]));
        if chunk_len < CHUNK_HEADER_LEN || offset + chunk_len > buf.len() {
            return Err(HepError::Truncated);
        }
        let data = &buf[offset + CHUNK_HEADER_LEN..offset + chunk_len];

        match chunk_type {
            CHUNK_IP_FAMILY if !data.is_empty() => ip_family = data[0],
            CHUNK_IP_PROTOCOL => {}
            CHUNK_IPV4_SRC if data.len() >= 4 => ipv4_src = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3])),
            CHUNK_IPV4_DST if data.len() >= 4 => ipv4_dst = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3])),
            CHUNK_IPV6_SRC if data.len() >= 16 => ipv6_src = Some(Ipv6Addr::from(<[u8; 16]>::try_from(data).unwrap())),
            CHUNK_IPV6_DST if data.len() >= 16 => ipv6_dst = Some(Ipv6Addr::from(<[u8; 16]>::try_from(data).unwrap())),
            CHUNK_SRC_PORT if data.len() >= 2 => src_port = BigEndian::read_u16(data),
            CHUNK_DST_PORT if data.len() >= 2 => dst_port = BigEndian::read_u16(data),
            CHUNK_TS_SEC if data.len() >= 4 => ts_sec = Some(BigEndian::read_u32(data) as i64),
            CHUNK_TS_USEC if data.len() >= 4 => ts_usec = Some(BigEndian::read_u32(data)),
            CHUNK_AUTH_KEY => {
                if let Some(expected) = secret {
                    auth_ok = std::str::from_utf8(data).map(|s| s == expected).unwrap_or(false);
                }
            }
            CHUNK_PAYLOAD => payload = Some(Bytes::copy_from_slice(data)),
            _ => {}
        }

        offset += chunk_len;
    }

    if !auth_ok {
        return Err(HepError::AuthFailed);
    }

    let (src_ip, dst_ip): (IpAddr, IpAddr) = match ip_family {
        2 => (
            IpAddr::V4(ipv4_src.ok_or(HepError::MissingChunk(CHUNK_IPV4_SRC))?),
            IpAddr::V4(ipv4_dst.ok_or(HepError::MissingChunk(CHUNK_IPV4_DST))?),
        ),
        10 => (
            IpAddr::V6(ipv6_src.ok_or(HepError::MissingChunk(CHUNK_IPV6_SRC))?),
            IpAddr::V6(ipv6_dst.ok_or(HepError::MissingChunk(CHUNK_IPV6_DST))?),
        ),
        _ => return Err(HepError::MissingChunk(CHUNK_IP_FAMILY)),
    };

    let payload = payload.ok_or(HepError::MissingChunk(CHUNK_PAYLOAD))?;
    let timestamp = ts_sec.map(|s| (s, ts_usec.unwrap_or(0).saturating_mul(1000)));

    Ok(DecodedHep {
        src: Address::new(src_ip, src_port),
        dst: Address::new(dst_ip, dst_port),
        timestamp,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_chunk(buf: &mut Vec<u8>, chunk_type: u16, data: &[u8]) {
        buf.extend_from_slice(&0u16.to_be_bytes()); // vendor id
        buf.extend_from_slice(&chunk_type.to_be_bytes());
        buf.extend_from_slice(&((CHUNK_HEADER_LEN + data.len()) as u16).to_be_bytes());
        buf.extend_from_slice(data);
    }

    fn build_hep(payload: &[u8], auth: Option<&str>) -> Vec<u8> {
        let mut body = Vec::new();
        push_chunk(&mut body, CHUNK_IP_FAMILY, &[2]);
        push_chunk(&mut body, CHUNK_IPV4_SRC, &[10, 0, 0, 1]);
        push_chunk(&mut body, CHUNK_IPV4_DST, &[10, 0, 0, 2]);
        push_chunk(&mut body, CHUNK_SRC_PORT, &5060u16.to_be_bytes());
        push_chunk(&mut body, CHUNK_DST_PORT, &5061u16.to_be_bytes());
        if let Some(secret) = auth {
            push_chunk(&mut body, CHUNK_AUTH_KEY, secret.as_bytes());
        }
        push_chunk(&mut body, CHUNK_PAYLOAD, payload);

        let mut out = Vec::new();
        out.extend_from_slice(HEP_MAGIC);
        out.extend_from_slice(&((6 + body.len()) as u16).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn decodes_basic_message_without_auth() {
        let raw = build_hep(b"INVITE sip:bob SIP/2.0\r\n", None);
        let decoded = decode(&raw, None).unwrap();
        assert_eq!(decoded.src.port(), 5060);
        assert_eq!(decoded.dst.port(), 5061);
        assert_eq!(&decoded.payload[..], b"INVITE sip:bob SIP/2.0\r\n");
    }

    #[test]
    fn rejects_mismatching_auth_key() {
        let raw = build_hep(b"x", Some("wrong"));
        let err = decode(&raw, Some("correct")).unwrap_err();
        assert!(matches!(err, HepError::AuthFailed));
    }

    #[test]
    fn accepts_matching_auth_key() {
        let raw = build_hep(b"x", Some("correct"));
        assert!(decode(&raw, Some("correct")).is_ok());
    }

    #[test]
    fn encode_then_decode_round_trips_endpoints_and_payload() {
        let src = Address::new("10.0.0.1".parse().unwrap(), 5060);
        let dst = Address::new("10.0.0.2".parse().unwrap(), 5061);
        let raw = encode(src, dst, 1_700_000_000, 123_000, b"INVITE sip:bob SIP/2.0\r\n", Some("secret"));
        let decoded = decode(&raw, Some("secret")).unwrap();
        assert_eq!(decoded.src, src);
        assert_eq!(decoded.dst, dst);
        assert_eq!(&decoded.payload[..], b"INVITE sip:bob SIP/2.0\r\n");
    }

    #[test]
    fn rejects_missing_auth_key_when_required() {
        let raw = build_hep(b"x", None);
        let err = decode(&raw, Some("correct")).unwrap_err();
        assert!(matches!(err, HepError::AuthFailed));
    }
}
