//! TCP dissector: resolves ports and reassembles segments per flow into
//! complete SIP messages using the `Content-Length`-driven framing that
//! SIP-over-TCP relies on instead of TCP's own message boundaries.
//!
//! Reassembly state (one entry per directional flow) is owned by the
//! dissector instance. Out-of-order segments are held in a small bounded
//! window; a gap that does not close before [`GAP_TIMEOUT`] is abandoned
//! and logged, matching the abandoned-fragment behavior of the IP layer.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use sipwatch_core::{Address, DissectError, Dissector, DissectorId, Packet};

pub const ID_TCP: DissectorId = DissectorId::new(5);

/// Out-of-order segments waiting for the gap before them to close are
/// abandoned after this long.
pub const GAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of out-of-order segments buffered per flow before the
/// oldest is dropped to bound memory use under a hostile or broken sender.
const MAX_GAP_SEGMENTS: usize = 64;

#[derive(Clone, Eq, PartialEq, Hash)]
struct FlowKey {
    src: Address,
    dst: Address,
}

/// Which framing a flow's reassembled byte stream is chunked with, decided
/// once per flow from the first recognizable bytes seen. SIP-over-TCP and
/// TLS-over-TCP (SIPS) both ride plain TCP but delimit messages with
/// unrelated schemes -- `Content-Length` versus a TLS record's own 5-byte
/// header -- so a flow can't be drained generically; it has to commit to
/// one drain routine for its lifetime.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Framing {
    SipText,
    TlsRecord,
}

struct FlowState {
    buffer: BytesMut,
    next_seq: Option<u32>,
    gaps: BTreeMap<u32, (Bytes, Instant)>,
    ready: VecDeque<Bytes>,
    framing: Framing,
}

impl FlowState {
    fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            next_seq: None,
            gaps: BTreeMap::new(),
            ready: VecDeque::new(),
            framing: Framing::SipText,
        }
    }

    fn sweep_stale_gaps(&mut self, flow_log: impl Fn(u32)) {
        let now = Instant::now();
        let stale: Vec<u32> = self
            .gaps
            .iter()
            .filter(|(_, (_, seen))| now.duration_since(*seen) >= GAP_TIMEOUT)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in stale {
            self.gaps.remove(&seq);
            flow_log(seq);
        }
    }

    /// Establishes the flow's starting sequence number. The first segment
    /// ever observed for a flow is not necessarily the first one sent --
    /// capture can start mid-stream, or segments can simply arrive
    /// reordered -- so bootstrapping `next_seq` from whatever arrives
    /// first would silently corrupt reassembly if that segment is not
    /// really the start. Instead, every segment is held until one is seen
    /// that looks like the start of a SIP message; that one anchors
    /// `next_seq`, and every held segment at or after it is absorbed in
    /// order.
    fn bootstrap(&mut self, seq: u32, payload: Bytes) {
        if looks_like_message_start(&payload) {
            self.framing = Framing::SipText;
            self.buffer.extend_from_slice(&payload);
            self.next_seq = Some(seq.wrapping_add(payload.len() as u32));
            self.absorb_gaps();
            return;
        }
        if looks_like_tls_record_start(&payload) {
            self.framing = Framing::TlsRecord;
            self.buffer.extend_from_slice(&payload);
            self.next_seq = Some(seq.wrapping_add(payload.len() as u32));
            self.absorb_gaps();
            return;
        }

        if self.gaps.len() >= MAX_GAP_SEGMENTS {
            if let Some(&oldest) = self.gaps.keys().next() {
                self.gaps.remove(&oldest);
            }
        }
        self.gaps.insert(seq, (payload, Instant::now()));
    }

    fn accept(&mut self, seq: u32, payload: Bytes) {
        if payload.is_empty() {
            return;
        }

        let Some(next) = self.next_seq else {
            self.bootstrap(seq, payload);
            return;
        };

        if seq == next {
            self.buffer.extend_from_slice(&payload);
            self.next_seq = Some(next.wrapping_add(payload.len() as u32));
            self.absorb_gaps();
        } else if seq.wrapping_sub(next) < u32::MAX / 2 && seq > next {
            // Segment arrives ahead of the expected sequence: hold it.
            if self.gaps.len() >= MAX_GAP_SEGMENTS {
                if let Some(&oldest) = self.gaps.keys().next() {
                    self.gaps.remove(&oldest);
                }
            }
            self.gaps.insert(seq, (payload, Instant::now()));
        }
        // seq < next (accounting for wraparound): fully-seen retransmission, dropped idempotently.
    }

    fn absorb_gaps(&mut self) {
        loop {
            let Some(next) = self.next_seq else { break };
            let Some((payload, _)) = self.gaps.remove(&next) else { break };
            self.buffer.extend_from_slice(&payload);
            self.next_seq = Some(next.wrapping_add(payload.len() as u32));
        }
    }

    /// Extracts as many complete frames as the buffer currently holds,
    /// using whichever framing this flow bootstrapped with.
    fn drain_frames(&mut self) {
        match self.framing {
            Framing::SipText => self.drain_frames_sip(),
            Framing::TlsRecord => self.drain_frames_tls(),
        }
    }

    fn drain_frames_sip(&mut self) {
        loop {
            let Some(header_end) = find_header_end(&self.buffer) else {
                break;
            };
            let Some(content_length) = parse_content_length(&self.buffer[..header_end]) else {
                break;
            };
            let total = header_end + content_length;
            if self.buffer.len() < total {
                break;
            }
            let message = self.buffer.split_to(total).freeze();
            self.ready.push_back(message);
        }
    }

    /// Splits off complete TLS records (5-byte header + declared length),
    /// one per `ready` entry, each still carrying its own header so the
    /// TLS dissector can parse it exactly as it would a record delivered
    /// whole over UDP-style framing.
    fn drain_frames_tls(&mut self) {
        loop {
            if self.buffer.len() < 5 {
                break;
            }
            let record_len = BigEndian::read_u16(&self.buffer[3..5]) as usize;
            let total = 5 + record_len;
            if self.buffer.len() < total {
                break;
            }
            let record = self.buffer.split_to(total).freeze();
            self.ready.push_back(record);
        }
    }
}

/// Known SIP request methods, used only to recognize where a message
/// begins inside an unanchored TCP flow -- not a substitute for the real
/// method parsing `sipwatch-codec-sip` does once the bytes reach it.
const KNOWN_METHODS: &[&[u8]] = &[
    b"INVITE ", b"ACK ", b"BYE ", b"CANCEL ", b"REGISTER ", b"OPTIONS ", b"REFER ", b"NOTIFY ", b"SUBSCRIBE ", b"PRACK ", b"INFO ", b"UPDATE ", b"MESSAGE ", b"PUBLISH ",
];

fn looks_like_message_start(payload: &[u8]) -> bool {
    payload.starts_with(b"SIP/2.0 ") || KNOWN_METHODS.iter().any(|m| payload.starts_with(m))
}

/// A TLS record's header is `content_type(1) || version_major(1) ||
/// version_minor(1) || length(2)`. `content_type` is one of a handful of
/// known values and a TLS client always opens a connection with a
/// Handshake record, so checking for that plus a plausible major version
/// byte is enough to distinguish it from a SIP request/status line.
fn looks_like_tls_record_start(payload: &[u8]) -> bool {
    payload.len() >= 5 && payload[0] == 22 && payload[1] == 3
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    for line in text.split("\r\n") {
        let mut parts = line.splitn(2, ':');
        let name = parts.next()?.trim();
        if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
            let value = parts.next()?.trim();
            return value.parse().ok();
        }
    }
    Some(0)
}

pub struct TcpDissector {
    flows: Mutex<HashMap<FlowKey, FlowState>>,
}

impl TcpDissector {
    pub fn new() -> Self {
        Self {
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Pops one previously reassembled message for `flow` that was not
    /// returned by the triggering `dissect` call because more than one
    /// complete message was present in a single segment. The capture event
    /// loop drains this after each packet so that back-to-back pipelined
    /// requests on the same connection are not left buffered.
    pub fn take_pending(&self, src: Address, dst: Address) -> Option<Bytes> {
        let mut flows = self.flows.lock();
        flows.get_mut(&FlowKey { src, dst }).and_then(|flow| flow.ready.pop_front())
    }
}

impl Default for TcpDissector {
    fn default() -> Self {
        Self::new()
    }
}

pub const TCP_MIN_HEADER_LEN: usize = 20;

impl Dissector for TcpDissector {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn id(&self) -> DissectorId {
        ID_TCP
    }

    fn dissect(&self, packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError> {
        if input.len() < TCP_MIN_HEADER_LEN {
            return Err(DissectError::truncated(self.name(), TCP_MIN_HEADER_LEN, input.len()));
        }

        let src_port = BigEndian::read_u16(&input[0..2]);
        let dst_port = BigEndian::read_u16(&input[2..4]);
        let seq = BigEndian::read_u32(&input[4..8]);
        let data_offset = usize::from(input[12] >> 4) * 4;
        if data_offset < TCP_MIN_HEADER_LEN || input.len() < data_offset {
            return Err(DissectError::decode(self.name(), format!("invalid data offset {data_offset}")));
        }

        let src = Address::new(packet.src().ip(), src_port);
        let dst = Address::new(packet.dst().ip(), dst_port);
        packet.set_src(src);
        packet.set_dst(dst);

        let payload = input.slice(data_offset..);
        if payload.is_empty() {
            return Ok(None);
        }

        let key = FlowKey { src, dst };
        let mut flows = self.flows.lock();
        let flow = flows.entry(key).or_insert_with(FlowState::new);
        flow.sweep_stale_gaps(|seq| {
            tracing::warn!(seq, src = %src, dst = %dst, "abandoning TCP out-of-order gap after timeout");
        });
        flow.accept(seq, payload);
        flow.drain_frames();
        Ok(flow.ready.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_packet() -> Packet {
        Packet::new(Address::new("10.0.0.1".parse().unwrap(), 0), Address::new("10.0.0.2".parse().unwrap(), 0), 0, 0)
    }

    fn tcp_segment(src_port: u16, dst_port: u16, seq: u32, payload: &[u8]) -> Bytes {
        let mut buf = vec![0u8; TCP_MIN_HEADER_LEN];
        BigEndian::write_u16(&mut buf[0..2], src_port);
        BigEndian::write_u16(&mut buf[2..4], dst_port);
        BigEndian::write_u32(&mut buf[4..8], seq);
        buf[12] = (5 << 4) as u8;
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    #[test]
    fn single_segment_full_message_is_framed() {
        let dissector = TcpDissector::new();
        let mut packet = test_packet();
        let body = b"v=0\r\n";
        let msg = format!("SIP/2.0 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), std::str::from_utf8(body).unwrap());
        let segment = tcp_segment(5060, 5061, 1000, msg.as_bytes());
        let rest = dissector.dissect(&mut packet, segment).unwrap();
        assert_eq!(rest, Some(Bytes::from(msg)));
    }

    #[test]
    fn split_message_reassembles_across_segments() {
        let dissector = TcpDissector::new();
        let mut packet = test_packet();
        let full = b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n";
        let (first, second) = full.split_at(10);

        let seg1 = tcp_segment(5060, 5061, 2000, first);
        assert_eq!(dissector.dissect(&mut packet, seg1).unwrap(), None);

        let seg2 = tcp_segment(5060, 5061, 2000 + first.len() as u32, second);
        let rest = dissector.dissect(&mut packet, seg2).unwrap();
        assert_eq!(rest, Some(Bytes::from_static(full)));
    }

    #[test]
    fn three_way_split_message_reassembles_out_of_order() {
        let dissector = TcpDissector::new();
        let mut packet = test_packet();
        let body = b"v=0\r\n";
        let full = format!("INVITE sip:bob@example.com SIP/2.0\r\nContent-Length: {}\r\n\r\n{}", body.len(), std::str::from_utf8(body).unwrap());
        let full = full.as_bytes();
        let third = full.len() / 3;
        let (part1, rest) = full.split_at(third);
        let (part2, part3) = rest.split_at(third);

        let seq1 = 4000u32;
        let seq2 = seq1 + part1.len() as u32;
        let seq3 = seq2 + part2.len() as u32;

        // Arrival order is 2, 1, 3.
        let seg2 = tcp_segment(5060, 5061, seq2, part2);
        assert_eq!(dissector.dissect(&mut packet, seg2).unwrap(), None);

        let seg1 = tcp_segment(5060, 5061, seq1, part1);
        assert_eq!(dissector.dissect(&mut packet, seg1).unwrap(), None);

        let seg3 = tcp_segment(5060, 5061, seq3, part3);
        let rest = dissector.dissect(&mut packet, seg3).unwrap();
        assert_eq!(rest, Some(Bytes::copy_from_slice(full)));
    }

    #[test]
    fn retransmitted_segment_is_ignored() {
        let dissector = TcpDissector::new();
        let mut packet = test_packet();
        let full = b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n";

        let seg1 = tcp_segment(5060, 5061, 3000, full);
        let first = dissector.dissect(&mut packet, seg1.clone()).unwrap();
        assert_eq!(first, Some(Bytes::from_static(full)));

        // duplicate retransmission of the same bytes must not duplicate the framed message
        let retransmit = dissector.dissect(&mut packet, seg1).unwrap();
        assert_eq!(retransmit, None);
    }
}
