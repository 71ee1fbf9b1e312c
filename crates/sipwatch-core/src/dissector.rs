//! The dissector chain contract: a DAG of protocol dissectors, each
//! consuming the bytes left over by its parent and handing the rest to
//! whichever child claims the payload.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::DissectError;
use crate::packet::Packet;

/// Stable identifier for a registered dissector.
///
/// Ids are assigned by whoever builds the [`DissectorRegistry`] (typically
/// once, at startup) and are cheap to copy and use as map keys throughout
/// the packet's lifetime, including as [`crate::protocol_data::ProtocolDataMap`]
/// keys.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DissectorId(u32);

impl DissectorId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

/// A single protocol layer in the chain.
///
/// `dissect` receives the bytes left over from the parent dissector and
/// returns the remaining payload for whichever child dissector claims it
/// next, or `Ok(None)` if this dissector is the last one able to make sense
/// of the packet (e.g. an SDP body with no further nested protocol) or if
/// it has buffered the input pending reassembly (a partial IP fragment or
/// TCP segment) and has nothing to hand onward yet.
///
/// Input and output are both owned, reference-counted [`Bytes`] rather than
/// borrowed slices: a reassembling dissector (IP fragments, TCP segments)
/// must be able to return a freshly assembled buffer that outlives the
/// individual wire frames it was built from, which a borrow tied to the
/// input's lifetime cannot express.
pub trait Dissector: Send + Sync {
    /// Stable, human-readable name used in error messages and tracing
    /// fields. Not necessarily unique across dissectors from different
    /// crates, but unique within one [`DissectorRegistry`].
    fn name(&self) -> &'static str;

    fn id(&self) -> DissectorId;

    /// Attempt to parse `input` as this dissector's protocol, attaching any
    /// parsed state to `packet` and returning the payload (if any) that
    /// belongs to a nested protocol.
    fn dissect(&self, packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError>;
}

/// Registry of dissectors plus the DAG of which dissector may hand off to
/// which. The DAG is a simple adjacency list: each dissector lists the ids
/// of dissectors that are allowed to follow it. Dispatch after a given
/// dissector tries each child in registration order and stops at the first
/// one that successfully claims the payload.
pub struct DissectorRegistry {
    dissectors: HashMap<DissectorId, Box<dyn Dissector>>,
    children: HashMap<DissectorId, Vec<DissectorId>>,
    roots: Vec<DissectorId>,
}

impl DissectorRegistry {
    pub fn new() -> Self {
        Self {
            dissectors: HashMap::new(),
            children: HashMap::new(),
            roots: Vec::new(),
        }
    }

    pub fn register(&mut self, dissector: Box<dyn Dissector>) -> DissectorId {
        let id = dissector.id();
        self.dissectors.insert(id, dissector);
        self.children.entry(id).or_default();
        id
    }

    /// Marks `id` as a valid chain entry point (e.g. the link-layer
    /// dissector for a live capture, or the IP dissector for HEP-delivered
    /// payloads).
    pub fn add_root(&mut self, id: DissectorId) {
        self.roots.push(id);
    }

    /// Declares that `child` may follow `parent` in the chain.
    pub fn add_edge(&mut self, parent: DissectorId, child: DissectorId) {
        self.children.entry(parent).or_default().push(child);
    }

    pub fn get(&self, id: DissectorId) -> Option<&dyn Dissector> {
        self.dissectors.get(&id).map(|b| b.as_ref())
    }

    pub fn roots(&self) -> &[DissectorId] {
        &self.roots
    }

    /// Runs the chain starting from `start`, at each level trying every
    /// candidate in registration order and committing to the first one
    /// that successfully claims the payload (does not return `Err`).
    /// This is how a node with more than one possible successor (e.g. TCP
    /// handing off to either TLS or SIP directly, per spec.md §4.C3's
    /// "UDP -> SIP or UDP -> STUN" example) picks one by inspecting the
    /// bytes: each candidate's own `dissect` is its own heuristic.
    ///
    /// Returns the ids of the dissectors that ran, in order. A dissector
    /// that returns `Ok(None)` ends the walk there, whether because it
    /// consumed the whole payload or because it is still buffering a
    /// reassembly. A level where every candidate errors ends the walk
    /// without adding to `ran`, matching spec.md §4.C3's "a dissector
    /// raising a parse error causes the packet to be dropped" semantics.
    pub fn run_chain(&self, start: DissectorId, packet: &mut Packet, input: Bytes) -> Vec<DissectorId> {
        let mut ran = Vec::new();
        let mut candidates = vec![start];
        let mut current_input = input;

        loop {
            let mut winner = None;
            for &candidate_id in &candidates {
                let Some(dissector) = self.get(candidate_id) else {
                    continue;
                };
                match dissector.dissect(packet, current_input.clone()) {
                    Ok(outcome) => {
                        winner = Some((candidate_id, outcome));
                        break;
                    }
                    Err(err) => {
                        tracing::trace!(dissector = dissector.name(), error = %err, "candidate rejected payload");
                    }
                }
            }

            let Some((id, outcome)) = winner else {
                if candidates.len() == 1 && self.get(candidates[0]).is_none() {
                    tracing::warn!(dissector_id = candidates[0].value(), "unknown dissector id in chain");
                } else if !candidates.is_empty() {
                    tracing::debug!("dissection stopped: no candidate claimed the payload");
                }
                break;
            };
            ran.push(id);

            match outcome {
                Some(rest) if !rest.is_empty() => {
                    let children = self.children.get(&id).cloned().unwrap_or_default();
                    if children.is_empty() {
                        break;
                    }
                    candidates = children;
                    current_input = rest;
                }
                _ => break,
            }
        }

        ran
    }
}

impl Default for DissectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(DissectorId, &'static str);

    impl Dissector for Echo {
        fn name(&self) -> &'static str {
            self.1
        }

        fn id(&self) -> DissectorId {
            self.0
        }

        fn dissect(&self, _packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError> {
            if input.is_empty() {
                Ok(None)
            } else {
                Ok(Some(input.slice(1..)))
            }
        }
    }

    #[test]
    fn chain_walks_until_payload_exhausted() {
        let mut registry = DissectorRegistry::new();
        let a = registry.register(Box::new(Echo(DissectorId::new(1), "a")));
        let b = registry.register(Box::new(Echo(DissectorId::new(2), "b")));
        registry.add_root(a);
        registry.add_edge(a, b);

        let mut packet = Packet::new(
            crate::address::Address::new("127.0.0.1".parse().unwrap(), 5060),
            crate::address::Address::new("127.0.0.1".parse().unwrap(), 5061),
            0,
            0,
        );
        let ran = registry.run_chain(a, &mut packet, Bytes::from_static(b"xy"));
        assert_eq!(ran, vec![a, b]);
    }

    #[test]
    fn unknown_child_stops_the_chain() {
        let mut registry = DissectorRegistry::new();
        let a = registry.register(Box::new(Echo(DissectorId::new(1), "a")));
        registry.add_root(a);

        let mut packet = Packet::new(
            crate::address::Address::new("127.0.0.1".parse().unwrap(), 5060),
            crate::address::Address::new("127.0.0.1".parse().unwrap(), 5061),
            0,
            0,
        );
        let ran = registry.run_chain(a, &mut packet, Bytes::from_static(b"xy"));
        assert_eq!(ran, vec![a]);
    }
}
