//! Ethernet II link-layer dissector: strips the 14-byte header and hands
//! the payload to the IPv4 or IPv6 dissector based on the ethertype field.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use sipwatch_core::{DissectError, Dissector, DissectorId, Packet};

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
pub const ETHERTYPE_VLAN: u16 = 0x8100;

pub const ID_ETHERNET: DissectorId = DissectorId::new(1);

/// Ethertype observed on the frame, attached so that storage/filter code
/// can distinguish IPv4 from IPv6 traffic without re-parsing the header.
pub struct EthernetFrame {
    pub ethertype: u16,
}

pub struct EthernetDissector;

impl Dissector for EthernetDissector {
    fn name(&self) -> &'static str {
        "ethernet"
    }

    fn id(&self) -> DissectorId {
        ID_ETHERNET
    }

    fn dissect(&self, packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError> {
        if input.len() < ETHERNET_HEADER_LEN {
            return Err(DissectError::truncated(self.name(), ETHERNET_HEADER_LEN, input.len()));
        }

        let mut ethertype = BigEndian::read_u16(&input[12..14]);
        let mut offset = ETHERNET_HEADER_LEN;

        // Skip a single 802.1Q VLAN tag; nested (QinQ) tags are not handled.
        if ethertype == ETHERTYPE_VLAN {
            if input.len() < offset + 4 {
                return Err(DissectError::truncated(self.name(), offset + 4, input.len()));
            }
            ethertype = BigEndian::read_u16(&input[offset + 2..offset + 4]);
            offset += 4;
        }

        packet.protocol_data_mut().insert(ID_ETHERNET, EthernetFrame { ethertype });

        match ethertype {
            ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => Ok(Some(input.slice(offset..))),
            other => Err(DissectError::decode(self.name(), format!("unsupported ethertype 0x{other:04x}"))),
        }
    }
}
