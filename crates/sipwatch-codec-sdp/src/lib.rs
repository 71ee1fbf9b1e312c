//! SDP dissector: the built-in RTP format table plus `c=`/`m=`/`a=` line
//! parsing, producing an [`data::SdpData`] attached to the packet that
//! carried the SIP message whose body this was.

pub mod data;
pub mod dissector;
pub mod error;
pub mod formats;
pub mod parse;

pub use data::{is_known_media_type, SdpConnection, SdpData, SdpFormat, SdpMedia, KNOWN_MEDIA_TYPES};
pub use dissector::{sdp_of, SdpDissector, ID_SDP};
pub use error::SdpParseError;
pub use formats::{is_dynamic, lookup_static, RtpFormat, DYNAMIC_RANGE, STATIC_FORMATS};
