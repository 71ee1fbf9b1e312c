//! Shared contract for the sipwatch dissector chain: addressing, attribute
//! registry, the packet object, per-protocol data storage and the
//! dissector trait every protocol layer implements.

pub mod address;
pub mod attribute;
pub mod dissector;
pub mod error;
pub mod packet;
pub mod protocol_data;

pub use address::{Address, AddressFamily};
pub use attribute::{AttributeDef, AttributeSet};
pub use dissector::{Dissector, DissectorId, DissectorRegistry};
pub use error::DissectError;
pub use packet::{Packet, Timestamp};
pub use protocol_data::ProtocolDataMap;
