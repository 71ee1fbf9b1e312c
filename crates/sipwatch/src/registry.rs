//! Builds the complete dissector chain: the transport crate's
//! link/IP/UDP/TCP DAG, with SIP wired as a child of UDP and TCP, and SDP
//! as a child of SIP. SIP is also registered as an extra root so
//! HEP-sourced packets, which never carry a real link-layer frame, can
//! enter the chain directly.

use sipwatch_codec_sdp::{SdpDissector, ID_SDP};
use sipwatch_codec_sip::{SipDissector, ID_SIP};
use sipwatch_core::DissectorRegistry;
use sipwatch_transport::{ID_TCP, ID_UDP};

#[cfg(feature = "tls")]
use std::sync::Arc;

#[cfg(feature = "tls")]
use sipwatch_transport::{KeyLog, ID_TLS};

pub fn build_registry() -> DissectorRegistry {
    let mut registry = DissectorRegistry::new();
    sipwatch_transport::register_all(&mut registry);
    wire_sip_and_sdp(&mut registry);
    registry
}

/// Same as [`build_registry`], with TLS wired in as a child of TCP and a
/// parent of SIP, keyed off `keylog` for passive decryption.
#[cfg(feature = "tls")]
pub fn build_registry_with_keylog(keylog: Arc<KeyLog>) -> DissectorRegistry {
    let mut registry = DissectorRegistry::new();
    sipwatch_transport::register_all_with_keylog(&mut registry, keylog);
    wire_sip_and_sdp(&mut registry);
    registry.add_edge(ID_TLS, ID_SIP);
    registry
}

fn wire_sip_and_sdp(registry: &mut DissectorRegistry) {
    registry.register(Box::new(SipDissector));
    registry.register(Box::new(SdpDissector));

    registry.add_edge(ID_UDP, ID_SIP);
    registry.add_edge(ID_TCP, ID_SIP);
    registry.add_edge(ID_SIP, ID_SDP);
    registry.add_root(ID_SIP);
}
