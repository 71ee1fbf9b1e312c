//! UDP dissector: resolves the final source/destination ports and hands
//! the datagram payload onward (to HEP, SIP, or RTP/RTCP depending on
//! which dissector is registered as this one's child).

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use sipwatch_core::{Address, DissectError, Dissector, DissectorId, Packet};

pub const UDP_HEADER_LEN: usize = 8;
pub const ID_UDP: DissectorId = DissectorId::new(4);

pub struct UdpDissector;

impl Dissector for UdpDissector {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn id(&self) -> DissectorId {
        ID_UDP
    }

    fn dissect(&self, packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError> {
        if input.len() < UDP_HEADER_LEN {
            return Err(DissectError::truncated(self.name(), UDP_HEADER_LEN, input.len()));
        }

        let src_port = BigEndian::read_u16(&input[0..2]);
        let dst_port = BigEndian::read_u16(&input[2..4]);
        let length = usize::from(BigEndian::read_u16(&input[4..6]));

        packet.set_src(Address::new(packet.src().ip(), src_port));
        packet.set_dst(Address::new(packet.dst().ip(), dst_port));

        let end = length.max(UDP_HEADER_LEN).min(input.len());
        if end <= UDP_HEADER_LEN {
            return Ok(None);
        }
        Ok(Some(input.slice(UDP_HEADER_LEN..end)))
    }
}
