//! Cross-call linkage: resolving `Replaces`, `Refer-To` and `Referred-By`
//! header values back to the `Call-ID` they reference, so that an
//! attended-transfer or call-pickup scenario can be shown as one group
//! instead of three unrelated calls.

use sipwatch_codec_sip::SipMessage;

/// The `Replaces` header's own grammar is `call-id;to-tag=...;from-tag=...`;
/// the call id is always the part before the first `;`.
fn call_id_from_replaces_value(value: &str) -> Option<String> {
    let call_id = value.split(';').next()?.trim();
    if call_id.is_empty() {
        None
    } else {
        Some(call_id.to_string())
    }
}

/// A `Refer-To` URI may itself carry a `Replaces=` URI parameter,
/// percent-encoded, e.g. `Refer-To: <sip:b@x?Replaces=callid%3Bto-tag%3D1>`.
fn call_id_from_refer_to(value: &str) -> Option<String> {
    let marker = "Replaces=";
    let start = value.find(marker)? + marker.len();
    let rest = &value[start..];
    let end = rest.find(['&', '>']).unwrap_or(rest.len());
    let encoded = &rest[..end];
    let decoded = percent_decode(encoded);
    call_id_from_replaces_value(&decoded)
}

fn percent_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hi = chars.next();
            let lo = chars.next();
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let Ok(byte) = u8::from_str_radix(&format!("{hi}{lo}"), 16) {
                    out.push(byte as char);
                    continue;
                }
            }
            out.push('%');
        } else {
            out.push(c);
        }
    }
    out
}

/// Collects every call id this message links to via `Replaces`,
/// `Refer-To` or `Referred-By`, deduplicated, excluding the message's own
/// `Call-ID`.
pub fn linked_call_ids(message: &SipMessage) -> Vec<String> {
    let own_call_id = message.call_id();
    let mut ids = Vec::new();

    if let Some(value) = message.headers.first("Replaces") {
        if let Some(id) = call_id_from_replaces_value(value) {
            ids.push(id);
        }
    }
    if let Some(value) = message.headers.first("Refer-To") {
        if let Some(id) = call_id_from_refer_to(value) {
            ids.push(id);
        }
    }
    if let Some(value) = message.headers.first("Referred-By") {
        if let Some(id) = call_id_from_refer_to(value) {
            ids.push(id);
        }
    }

    ids.retain(|id| Some(id.as_str()) != own_call_id);
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sipwatch_codec_sip::parse::parse_message;

    fn message_with_replaces() -> SipMessage {
        let raw = Bytes::from_static(
            b"INVITE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc1;branch=z9hG4bK1\r\n\
From: Alice <sip:alice@example.com>;tag=1\r\n\
To: Bob <sip:bob@example.com>\r\n\
Call-ID: new-call-id\r\n\
CSeq: 1 INVITE\r\n\
Replaces: original-call-id;to-tag=2;from-tag=1\r\n\
\r\n",
        );
        parse_message(&raw).unwrap()
    }

    #[test]
    fn replaces_header_resolves_to_original_call_id() {
        let message = message_with_replaces();
        assert_eq!(linked_call_ids(&message), vec!["original-call-id".to_string()]);
    }

    #[test]
    fn refer_to_embedded_replaces_param_is_decoded() {
        let raw = Bytes::from_static(
            b"REFER sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc1;branch=z9hG4bK2\r\n\
From: Alice <sip:alice@example.com>;tag=1\r\n\
To: Bob <sip:bob@example.com>\r\n\
Call-ID: refer-call-id\r\n\
CSeq: 1 REFER\r\n\
Refer-To: <sip:carol@example.com?Replaces=abc123%3Bto-tag%3D9%3Bfrom-tag%3D1>\r\n\
\r\n",
        );
        let message = parse_message(&raw).unwrap();
        assert_eq!(linked_call_ids(&message), vec!["abc123".to_string()]);
    }
}
