//! The stored record of one SIP message inside a [`crate::call::Call`],
//! per spec.md §3's `Message` type: start-line summary, header-derived
//! tags, the raw payload (for the storage-level match expression) and any
//! SDP body, plus a back-reference to the endpoints/timestamp the packet
//! carried.

use bytes::Bytes;
use sipwatch_codec_sdp::SdpData;
use sipwatch_codec_sip::{Method, SipMessage};
use sipwatch_core::{Address, Timestamp};

/// One SIP request or response as recorded in a [`crate::call::Call`]'s
/// message list. Cheap to clone: the raw payload and SDP body are
/// reference-counted or already owned small structures.
#[derive(Clone, Debug)]
pub struct StoredMessage {
    pub timestamp: Timestamp,
    pub src: Address,
    pub dst: Address,
    pub method: Option<Method>,
    pub status_code: Option<u16>,
    pub from_uri: Option<String>,
    pub to_uri: Option<String>,
    pub from_tag: Option<String>,
    pub to_tag: Option<String>,
    /// The complete message bytes, kept for the storage match expression
    /// and for any consumer that wants to re-render the original text.
    pub raw: Bytes,
    pub sdp: Option<SdpData>,
}

impl StoredMessage {
    pub fn from_sip(message: &SipMessage, src: Address, dst: Address, timestamp: Timestamp, sdp: Option<SdpData>) -> Self {
        Self {
            timestamp,
            src,
            dst,
            method: message.start_line.method().cloned().or_else(|| message.cseq().map(|(_, m)| m)),
            status_code: message.start_line.status_code(),
            from_uri: message.headers.first("From").or_else(|| message.headers.first("f")).map(str::to_string),
            to_uri: message.headers.first("To").or_else(|| message.headers.first("t")).map(str::to_string),
            from_tag: message.from_tag().map(str::to_string),
            to_tag: message.to_tag().map(str::to_string),
            raw: message.raw.clone(),
            sdp,
        }
    }

    pub fn is_request(&self) -> bool {
        self.status_code.is_none()
    }

    pub fn byte_len(&self) -> u64 {
        self.raw.len() as u64
    }
}
