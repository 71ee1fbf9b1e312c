//! Wires the SIP parser into the dissector chain: parses the message,
//! records it as protocol data and attributes, and hands the body onward
//! only when its `Content-Type` says another dissector (SDP) should look
//! at it.

use bytes::Bytes;
use sipwatch_core::{DissectError, Dissector, DissectorId, Packet};

use crate::attributes;
use crate::message::SipMessage;
use crate::parse::parse_message;

pub const ID_SIP: DissectorId = DissectorId::new(10);

pub struct SipDissector;

impl Dissector for SipDissector {
    fn name(&self) -> &'static str {
        "sip"
    }

    fn id(&self) -> DissectorId {
        ID_SIP
    }

    fn dissect(&self, packet: &mut Packet, input: Bytes) -> Result<Option<Bytes>, DissectError> {
        let message = parse_message(&input).map_err(|e| DissectError::decode(self.name(), e.to_string()))?;

        let attrs = packet.attributes_mut();
        if let Some(method) = message.start_line.method() {
            attrs.set(attributes::METHOD.id, method.as_str());
        }
        if let Some(status) = message.start_line.status_code() {
            attrs.set(attributes::STATUS_CODE.id, status.to_string());
        }
        if let Some(call_id) = message.call_id() {
            attrs.set(attributes::CALL_ID.id, call_id);
        }
        if let Some(from) = message.headers.first("From").or_else(|| message.headers.first("f")) {
            attrs.set(attributes::FROM_URI.id, from);
        }
        if let Some(to) = message.headers.first("To").or_else(|| message.headers.first("t")) {
            attrs.set(attributes::TO_URI.id, to);
        }

        let body = message.body.clone();
        let is_sdp_body = message
            .headers
            .first("Content-Type")
            .or_else(|| message.headers.first("c"))
            .map(|ct| ct.trim().eq_ignore_ascii_case("application/sdp"))
            .unwrap_or(false);

        packet.protocol_data_mut().insert(ID_SIP, message);

        if is_sdp_body && !body.is_empty() {
            Ok(Some(body))
        } else {
            Ok(None)
        }
    }
}

pub fn message_of(packet: &Packet) -> Option<&SipMessage> {
    packet.protocol_data().get::<SipMessage>(ID_SIP)
}
