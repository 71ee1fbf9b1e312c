//! Link, network and transport-layer dissectors: Ethernet, IPv4/IPv6 (with
//! fragment reassembly), UDP and TCP (with Content-Length-framed segment
//! reassembly), plus an optional TLS key-log-assisted layer.

pub mod ip;
pub mod link;
pub mod tcp;
pub mod udp;

#[cfg(feature = "tls")]
pub mod tls;

pub use ip::{IpLayer, Ipv4Dissector, Ipv6Dissector, ID_IPV4, ID_IPV6};
pub use link::{EthernetDissector, EthernetFrame, ID_ETHERNET};
pub use tcp::{TcpDissector, ID_TCP};
pub use udp::{UdpDissector, ID_UDP};

#[cfg(feature = "tls")]
pub use tls::{KeyLog, TlsDissector, TlsRecord, ID_TLS};

/// Registers the full link/IP/UDP/TCP chain into `registry`, wiring the
/// standard DAG: ethernet -> ipv4/ipv6 -> udp/tcp. Plain (non-TLS) builds
/// use this; builds with the `tls` feature should call
/// [`register_all_with_keylog`] instead so TCP can also hand off to TLS.
pub fn register_all(registry: &mut sipwatch_core::DissectorRegistry) {
    let ethernet = registry.register(Box::new(EthernetDissector));
    let ipv4 = registry.register(Box::new(Ipv4Dissector::new()));
    let ipv6 = registry.register(Box::new(Ipv6Dissector));
    let udp = registry.register(Box::new(UdpDissector));
    let tcp = registry.register(Box::new(TcpDissector::new()));

    registry.add_root(ethernet);
    registry.add_root(ipv4);
    registry.add_root(ipv6);
    registry.add_edge(ethernet, ipv4);
    registry.add_edge(ethernet, ipv6);
    registry.add_edge(ipv4, udp);
    registry.add_edge(ipv4, tcp);
    registry.add_edge(ipv6, udp);
    registry.add_edge(ipv6, tcp);
}

/// Same as [`register_all`], plus the TLS dissector wired as a TCP child,
/// keyed off `keylog` for passive decryption. The caller keeps its own
/// handle on `keylog` so it can feed it lines read from a configured NSS
/// key log file as they arrive.
#[cfg(feature = "tls")]
pub fn register_all_with_keylog(registry: &mut sipwatch_core::DissectorRegistry, keylog: std::sync::Arc<KeyLog>) {
    register_all(registry);
    let tls = registry.register(Box::new(TlsDissector::new(keylog)));
    registry.add_edge(ID_TCP, tls);
}
