//! Zero-copy-style SIP parsing: scans the input once, splitting on line
//! boundaries and folding continuation lines (leading whitespace) into the
//! previous header, matching RFC 3261 §7's message grammar.

use bytes::Bytes;

use crate::error::{SipParseError, REQUIRED_HEADERS};
use crate::message::{HeaderMap, Method, SipMessage, StartLine};

const COMPACT_FORMS: &[(&str, &str)] = &[
    ("Call-ID", "i"),
    ("From", "f"),
    ("To", "t"),
    ("Via", "v"),
    ("Contact", "m"),
    ("Content-Length", "l"),
    ("Content-Type", "c"),
];

fn has_header(headers: &HeaderMap, canonical: &str) -> bool {
    if headers.contains(canonical) {
        return true;
    }
    COMPACT_FORMS
        .iter()
        .find(|(full, _)| full.eq_ignore_ascii_case(canonical))
        .map(|(_, compact)| headers.contains(compact))
        .unwrap_or(false)
}

/// Splits `text` into logical header lines, joining any line that begins
/// with a space or tab onto the previous line per RFC 3261's header
/// folding rule.
fn fold_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw_line in text.split("\r\n") {
        if raw_line.is_empty() {
            continue;
        }
        if (raw_line.starts_with(' ') || raw_line.starts_with('\t')) && !lines.is_empty() {
            let last = lines.last_mut().unwrap();
            last.push(' ');
            last.push_str(raw_line.trim_start());
        } else {
            lines.push(raw_line.to_string());
        }
    }
    lines
}

fn parse_start_line(line: &str) -> Result<StartLine, SipParseError> {
    let mut parts = line.splitn(3, ' ');
    let first = parts.next().ok_or_else(|| SipParseError::MalformedStartLine(line.to_string()))?;
    let second = parts.next().ok_or_else(|| SipParseError::MalformedStartLine(line.to_string()))?;
    let third = parts.next().ok_or_else(|| SipParseError::MalformedStartLine(line.to_string()))?;

    if first == "SIP/2.0" {
        let status_code: u16 = second.parse().map_err(|_| SipParseError::MalformedStartLine(line.to_string()))?;
        return Ok(StartLine::Response {
            status_code,
            reason: third.to_string(),
        });
    }

    if third != "SIP/2.0" {
        return Err(SipParseError::NotSip);
    }

    Ok(StartLine::Request {
        method: Method::parse(first),
        request_uri: second.to_string(),
    })
}

fn parse_header_line(line: &str, headers: &mut HeaderMap) -> Result<(), SipParseError> {
    let colon = line.find(':').ok_or_else(|| SipParseError::MalformedHeader(line.to_string()))?;
    let name = line[..colon].trim();
    let value = line[colon + 1..].trim();
    if name.is_empty() {
        return Err(SipParseError::MalformedHeader(line.to_string()));
    }
    headers.push(name, value.to_string());
    Ok(())
}

/// Parses a complete SIP message (start line, headers, body) from raw
/// bytes. The body is not UTF-8 validated: SDP and other payloads are
/// handled by later dissectors in the chain.
pub fn parse_message(raw: &Bytes) -> Result<SipMessage, SipParseError> {
    if raw.is_empty() {
        return Err(SipParseError::Empty);
    }

    let header_end = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4).unwrap_or(raw.len());

    let header_text = std::str::from_utf8(&raw[..header_end]).map_err(|_| SipParseError::MalformedHeader("non-UTF-8 header section".into()))?;

    let mut lines = fold_lines(header_text);
    if lines.is_empty() {
        return Err(SipParseError::MalformedStartLine(String::new()));
    }
    let start_line_text = lines.remove(0);
    let start_line = parse_start_line(&start_line_text)?;

    let mut headers = HeaderMap::new();
    for line in &lines {
        parse_header_line(line, &mut headers)?;
    }

    for required in REQUIRED_HEADERS {
        if !has_header(&headers, required) {
            return Err(SipParseError::MissingRequiredHeader(required));
        }
    }

    let body = raw.slice(header_end.min(raw.len())..);

    Ok(SipMessage { start_line, headers, body, raw: raw.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invite() -> Bytes {
        Bytes::from_static(
            b"INVITE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc1.example.com;branch=z9hG4bKnash\r\n\
From: Alice <sip:alice@example.com>;tag=1928301774\r\n\
To: Bob <sip:bob@example.com>\r\n\
Call-ID: a84b4c76e66710@pc1.example.com\r\n\
CSeq: 1 INVITE\r\n\
Contact: <sip:alice@pc1.example.com>\r\n\
Content-Length: 4\r\n\
\r\n\
body",
        )
    }

    #[test]
    fn parses_request_line_and_required_headers() {
        let msg = parse_message(&sample_invite()).unwrap();
        assert!(msg.is_request());
        assert_eq!(msg.call_id(), Some("a84b4c76e66710@pc1.example.com"));
        assert_eq!(msg.cseq(), Some((1, Method::Invite)));
        assert_eq!(msg.top_via_branch(), Some("z9hG4bKnash"));
        assert_eq!(&msg.body[..], b"body");
    }

    #[test]
    fn missing_required_header_is_rejected() {
        let raw = Bytes::from_static(b"INVITE sip:bob@example.com SIP/2.0\r\nVia: SIP/2.0/UDP pc1;branch=z9hG4bK1\r\n\r\n");
        let err = parse_message(&raw).unwrap_err();
        assert!(matches!(err, SipParseError::MissingRequiredHeader(_)));
    }

    #[test]
    fn folded_header_lines_are_joined() {
        let raw = Bytes::from_static(
            b"SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP pc1;branch=z9hG4bK1\r\n\
From: Alice <sip:alice@example.com>;tag=1\r\n\
To: Bob <sip:bob@example.com>\r\n\
 ;tag=2\r\n\
Call-ID: abc\r\n\
CSeq: 1 INVITE\r\n\
\r\n",
        );
        let msg = parse_message(&raw).unwrap();
        assert_eq!(msg.headers.first("To"), Some("Bob <sip:bob@example.com> ;tag=2"));
    }
}
