//! IPv4/IPv6 dissectors, including IPv4 fragment reassembly.
//!
//! Reassembly state is owned by the dissector instance (not global), is
//! guarded by a `parking_lot::Mutex` since [`sipwatch_core::Dissector::dissect`]
//! takes `&self`, and abandons fragment sets that have been incomplete for
//! more than [`FRAGMENT_TIMEOUT`].

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use sipwatch_core::{Address, DissectError, Dissector, DissectorId, Packet};

pub const ID_IPV4: DissectorId = DissectorId::new(2);
pub const ID_IPV6: DissectorId = DissectorId::new(3);

pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;

/// Fragment sets older than this are dropped and logged at `warn` level.
pub const FRAGMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parsed IP layer metadata, common to v4 and v6, attached for storage
/// attribute extraction (protocol number, fragmentation flag).
pub struct IpLayer {
    pub protocol: u8,
    pub was_fragmented: bool,
}

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
struct FragKey {
    src: Ipv4Addr,
    dst: Ipv4Addr,
    protocol: u8,
    identification: u16,
}

struct FragEntry {
    // (fragment byte offset, fragment payload)
    pieces: Vec<(usize, Bytes)>,
    total_len: Option<usize>,
    first_seen: Instant,
}

impl FragEntry {
    fn new(first_seen: Instant) -> Self {
        Self {
            pieces: Vec::new(),
            total_len: None,
            first_seen,
        }
    }

    fn is_complete(&self) -> bool {
        let Some(total) = self.total_len else {
            return false;
        };
        let mut covered = 0usize;
        let mut sorted = self.pieces.clone();
        sorted.sort_by_key(|(offset, _)| *offset);
        for (offset, payload) in &sorted {
            if *offset > covered {
                return false;
            }
            covered = covered.max(offset + payload.len());
        }
        covered >= total
    }

    fn reassemble(&self) -> Bytes {
        let total = self.total_len.unwrap_or(0);
        let mut buf = BytesMut::zeroed(total);
        for (offset, payload) in &self.pieces {
            let end = (*offset + payload.len()).min(total);
            if *offset < end {
                buf[*offset..end].copy_from_slice(&payload[..end - offset]);
            }
        }
        buf.freeze()
    }
}

pub struct Ipv4Dissector {
    fragments: Mutex<HashMap<FragKey, FragEntry>>,
}

impl Ipv4Dissector {
    pub fn new() -> Self {
        Self {
            fragments: Mutex::new(HashMap::new()),
        }
    }

    fn sweep_expired(&self, fragments: &mut HashMap<FragKey, FragEntry>) {
        let now = Instant::now();
        fragments.retain(|key, entry| {
            let alive = now.duration_since(entry.first_seen) < FRAGMENT_TIMEOUT;
            if !alive {
                tracing::warn!(
                    src = %key.src,
                    dst = %key.dst,
                    protocol = key.protocol,
                    identification = key.identification,
                    "abandoning incomplete IPv4 fragment set after timeout"
                );
            }
            alive
        });
    }
}

impl Default for Ipv4Dissector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dissector for Ipv4Dissector {
    fn name(&self) -> &'static str {
        "ipv4"
    }

    fn id(&self) -> DissectorId {
        ID_IPV4
    }

    fn dissect(&self, packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError> {
        if input.len() < 20 {
            return Err(DissectError::truncated(self.name(), 20, input.len()));
        }

        let version = input[0] >> 4;
        if version != 4 {
            return Err(DissectError::decode(self.name(), format!("unexpected IP version {version}")));
        }
        let ihl = usize::from(input[0] & 0x0f) * 4;
        if ihl < 20 || input.len() < ihl {
            return Err(DissectError::decode(self.name(), format!("invalid IHL {ihl}")));
        }
        let total_len = usize::from(BigEndian::read_u16(&input[2..4]));
        let identification = BigEndian::read_u16(&input[4..6]);
        let flags_frag = BigEndian::read_u16(&input[6..8]);
        let dont_fragment = flags_frag & 0x4000 != 0;
        let more_fragments = flags_frag & 0x2000 != 0;
        let fragment_offset = usize::from(flags_frag & 0x1fff) * 8;
        let protocol = input[9];
        let src = Ipv4Addr::new(input[12], input[13], input[14], input[15]);
        let dst = Ipv4Addr::new(input[16], input[17], input[18], input[19]);

        packet.set_src(Address::new(src.into(), packet.src().port()));
        packet.set_dst(Address::new(dst.into(), packet.dst().port()));

        let end = total_len.min(input.len()).max(ihl);
        let payload = input.slice(ihl..end);

        if dont_fragment || (!more_fragments && fragment_offset == 0) {
            packet.protocol_data_mut().insert(
                ID_IPV4,
                IpLayer {
                    protocol,
                    was_fragmented: false,
                },
            );
            return Ok(Some(payload));
        }

        let key = FragKey {
            src,
            dst,
            protocol,
            identification,
        };

        let mut fragments = self.fragments.lock();
        self.sweep_expired(&mut fragments);
        let entry = fragments.entry(key).or_insert_with(|| FragEntry::new(Instant::now()));
        entry.pieces.push((fragment_offset, payload));
        if !more_fragments {
            entry.total_len = Some(fragment_offset + entry.pieces.last().map(|(_, p)| p.len()).unwrap_or(0));
        }

        if entry.is_complete() {
            let reassembled = entry.reassemble();
            fragments.remove(&key);
            drop(fragments);
            packet.protocol_data_mut().insert(
                ID_IPV4,
                IpLayer {
                    protocol,
                    was_fragmented: true,
                },
            );
            packet.push_frame(reassembled.clone());
            return Ok(Some(reassembled));
        }

        Ok(None)
    }
}

pub struct Ipv6Dissector;

impl Dissector for Ipv6Dissector {
    fn name(&self) -> &'static str {
        "ipv6"
    }

    fn id(&self) -> DissectorId {
        ID_IPV6
    }

    fn dissect(&self, packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError> {
        if input.len() < 40 {
            return Err(DissectError::truncated(self.name(), 40, input.len()));
        }
        let version = input[0] >> 4;
        if version != 6 {
            return Err(DissectError::decode(self.name(), format!("unexpected IP version {version}")));
        }
        let payload_len = usize::from(BigEndian::read_u16(&input[4..6]));
        let next_header = input[6];
        let src = Ipv6Addr::from(<[u8; 16]>::try_from(&input[8..24]).unwrap());
        let dst = Ipv6Addr::from(<[u8; 16]>::try_from(&input[24..40]).unwrap());

        packet.set_src(Address::new(src.into(), packet.src().port()));
        packet.set_dst(Address::new(dst.into(), packet.dst().port()));
        packet.protocol_data_mut().insert(
            ID_IPV6,
            IpLayer {
                protocol: next_header,
                was_fragmented: false,
            },
        );

        let end = (40 + payload_len).min(input.len());
        Ok(Some(input.slice(40..end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_packet() -> Packet {
        Packet::new(Address::new("0.0.0.0".parse().unwrap(), 0), Address::new("0.0.0.0".parse().unwrap(), 0), 0, 0)
    }

    fn build_ipv4(total_len: u16, flags_frag: u16, ident: u16, protocol: u8, payload: &[u8]) -> Bytes {
        let mut buf = vec![0u8; 20];
        buf[0] = 0x45;
        BigEndian::write_u16(&mut buf[2..4], total_len);
        BigEndian::write_u16(&mut buf[4..6], ident);
        BigEndian::write_u16(&mut buf[6..8], flags_frag);
        buf[9] = protocol;
        buf[12..16].copy_from_slice(&[10, 0, 0, 1]);
        buf[16..20].copy_from_slice(&[10, 0, 0, 2]);
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    #[test]
    fn unfragmented_packet_passes_through() {
        let payload = b"hello";
        let frame = build_ipv4(20 + payload.len() as u16, 0, 1, PROTO_UDP, payload);
        let mut packet = test_packet();
        let dissector = Ipv4Dissector::new();
        let rest = dissector.dissect(&mut packet, frame).unwrap();
        assert_eq!(rest, Some(Bytes::from_static(payload)));
        assert_eq!(packet.src().ip().to_string(), "10.0.0.1");
    }

    #[test]
    fn two_fragments_reassemble() {
        let dissector = Ipv4Dissector::new();
        let mut packet = test_packet();

        // first fragment: offset 0, more fragments set, 8 bytes payload
        let frag1 = build_ipv4(28, 0x2000, 99, PROTO_UDP, b"AAAAAAAA");
        let rest = dissector.dissect(&mut packet, frag1).unwrap();
        assert_eq!(rest, None);

        // second fragment: offset 8 bytes (offset field = 1 in 8-byte units), no more fragments
        let frag2 = build_ipv4(24, 1, 99, PROTO_UDP, b"BBBB");
        let rest = dissector.dissect(&mut packet, frag2).unwrap();
        assert_eq!(rest, Some(Bytes::from_static(b"AAAAAAAABBBB")));

        let fragments = dissector.fragments.lock();
        assert!(fragments.is_empty());
    }
}
