//! The packet object threaded through the dissector chain: capture
//! metadata plus the raw frame bytes and whatever structured data each
//! dissector along the way chose to attach.

use bytes::Bytes;

use crate::address::Address;
use crate::attribute::AttributeSet;
use crate::dissector::DissectorId;
use crate::protocol_data::ProtocolDataMap;

/// Capture timestamp, carrying both the wall-clock time (for display and
/// correlation with external systems like HEP senders) and a
/// capture-local monotonic sequence number (for total ordering when two
/// packets share a wall-clock timestamp at sub-tick capture rates).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Timestamp {
    pub unix_secs: i64,
    pub unix_nanos: u32,
    pub sequence: u64,
}

impl Timestamp {
    pub const fn new(unix_secs: i64, unix_nanos: u32, sequence: u64) -> Self {
        Self {
            unix_secs,
            unix_nanos,
            sequence,
        }
    }
}

/// One packet as it flows through the dissector chain.
///
/// A packet may be backed by more than one raw frame when a transport
/// dissector reassembles fragments or segments before handing a
/// contiguous payload further up the chain; `frames` preserves the
/// original wire-order slices for anything that wants to re-derive the
/// original bytes (e.g. writing a capture file back out).
pub struct Packet {
    src: Address,
    dst: Address,
    timestamp: Timestamp,
    frames: Vec<Bytes>,
    protocol_data: ProtocolDataMap,
    attributes: AttributeSet,
}

impl Packet {
    pub fn new(src: Address, dst: Address, unix_secs: i64, unix_nanos: u32) -> Self {
        Self {
            src,
            dst,
            timestamp: Timestamp::new(unix_secs, unix_nanos, 0),
            frames: Vec::new(),
            protocol_data: ProtocolDataMap::new(),
            attributes: AttributeSet::new(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.timestamp.sequence = sequence;
        self
    }

    pub fn src(&self) -> Address {
        self.src
    }

    pub fn dst(&self) -> Address {
        self.dst
    }

    /// Updates the source endpoint once a later dissector (IP, then UDP/TCP)
    /// has resolved more of the address than the capture layer knew at
    /// construction time.
    pub fn set_src(&mut self, src: Address) {
        self.src = src;
    }

    pub fn set_dst(&mut self, dst: Address) {
        self.dst = dst;
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Appends one raw wire-order frame (e.g. an IP fragment or TCP
    /// segment) contributing to this packet's eventual reassembled
    /// payload.
    pub fn push_frame(&mut self, frame: Bytes) {
        self.frames.push(frame);
    }

    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// Total byte length across all raw frames, used for storage memory
    /// accounting.
    pub fn frame_bytes_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }

    pub fn protocol_data(&self) -> &ProtocolDataMap {
        &self.protocol_data
    }

    pub fn protocol_data_mut(&mut self) -> &mut ProtocolDataMap {
        &mut self.protocol_data
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeSet {
        &mut self.attributes
    }

    pub fn has_protocol(&self, id: DissectorId) -> bool {
        self.protocol_data.contains(id)
    }
}
