//! Endpoint addressing: an IP address plus a transport port, treated as a
//! single value type throughout the dissection chain and storage layer.

use std::fmt;
use std::net::IpAddr;

/// Address family tag, kept distinct from [`IpAddr`]'s own variant so call
/// sites that only care about v4 vs v6 don't need to match on the full enum.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// `(family, bytes, port)` endpoint, per spec.md §3.
///
/// Equality and hashing cover all fields; two addresses with the same IP but
/// different ports are distinct.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Address {
    ip: IpAddr,
    port: u16,
}

impl Address {
    pub const fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn family(&self) -> AddressFamily {
        match self.ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self { ip: self.ip, port }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{port}", port = self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{port}", port = self.port),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_display_is_ip_colon_port() {
        let addr = Address::new("10.0.0.1".parse().unwrap(), 5060);
        assert_eq!(addr.to_string(), "10.0.0.1:5060");
        assert_eq!(addr.family(), AddressFamily::V4);
    }

    #[test]
    fn v6_display_brackets_the_address() {
        let addr = Address::new("::1".parse().unwrap(), 5061);
        assert_eq!(addr.to_string(), "[::1]:5061");
        assert_eq!(addr.family(), AddressFamily::V6);
    }

    #[test]
    fn equality_considers_port() {
        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert_ne!(Address::new(ip, 5060), Address::new(ip, 5061));
    }
}
