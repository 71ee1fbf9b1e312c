use thiserror::Error;

#[derive(Debug, Error)]
pub enum SipParseError {
    #[error("empty message")]
    Empty,

    #[error("malformed start line: {0}")]
    MalformedStartLine(String),

    #[error("not a SIP message (missing SIP/2.0 version token)")]
    NotSip,

    #[error("missing required header: {0}")]
    MissingRequiredHeader(&'static str),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),
}

pub const REQUIRED_HEADERS: &[&str] = &["Call-ID", "CSeq", "From", "To", "Via"];
