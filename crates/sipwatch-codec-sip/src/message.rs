//! The parsed SIP message: start line, header multimap and body.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// SIP request method (RFC 3261 §6, plus the common extension methods
/// needed for call-transfer correlation).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Info,
    Message,
    Notify,
    Subscribe,
    Refer,
    Update,
    Prack,
    Other(String),
}

impl Method {
    pub fn parse(s: &str) -> Self {
        match s {
            "INVITE" => Self::Invite,
            "ACK" => Self::Ack,
            "BYE" => Self::Bye,
            "CANCEL" => Self::Cancel,
            "REGISTER" => Self::Register,
            "OPTIONS" => Self::Options,
            "INFO" => Self::Info,
            "MESSAGE" => Self::Message,
            "NOTIFY" => Self::Notify,
            "SUBSCRIBE" => Self::Subscribe,
            "REFER" => Self::Refer,
            "UPDATE" => Self::Update,
            "PRACK" => Self::Prack,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Invite => "INVITE",
            Self::Ack => "ACK",
            Self::Bye => "BYE",
            Self::Cancel => "CANCEL",
            Self::Register => "REGISTER",
            Self::Options => "OPTIONS",
            Self::Info => "INFO",
            Self::Message => "MESSAGE",
            Self::Notify => "NOTIFY",
            Self::Subscribe => "SUBSCRIBE",
            Self::Refer => "REFER",
            Self::Update => "UPDATE",
            Self::Prack => "PRACK",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either half of a SIP message's first line.
#[derive(Clone, Debug)]
pub enum StartLine {
    Request { method: Method, request_uri: String },
    Response { status_code: u16, reason: String },
}

impl StartLine {
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    pub fn method(&self) -> Option<&Method> {
        match self {
            Self::Request { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Response { status_code, .. } => Some(*status_code),
            Self::Request { .. } => None,
        }
    }
}

/// Ordered, case-insensitive header multimap: header names keep their
/// original casing for display but are looked up case-insensitively, and
/// repeated headers of the same name (e.g. multiple `Via`) preserve order.
#[derive(Clone, Debug, Default)]
pub struct HeaderMap {
    // keyed by lowercase header name -> values in appearance order
    entries: BTreeMap<String, Vec<String>>,
    // original-case name for the first occurrence of each lowercase key
    display_names: BTreeMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: String) {
        let lower = name.to_ascii_lowercase();
        self.display_names.entry(lower.clone()).or_insert_with(|| name.to_string());
        self.entries.entry(lower).or_default().push(value);
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn all(&self, name: &str) -> &[String] {
        self.entries.get(&name.to_ascii_lowercase()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(lower, values)| {
            let display = self.display_names.get(lower).map(String::as_str).unwrap_or(lower.as_str());
            values.iter().map(move |v| (display, v.as_str()))
        })
    }
}

/// A fully parsed SIP message, request or response.
#[derive(Clone, Debug)]
pub struct SipMessage {
    pub start_line: StartLine,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The complete message as received (start line, headers, body),
    /// kept so that storage's payload match expression (spec.md §4.C13)
    /// can be evaluated without re-serializing the parsed structure.
    pub raw: Bytes,
}

impl SipMessage {
    /// Shorthand for `headers.first("Call-ID")`, used constantly for
    /// call-group keying.
    pub fn call_id(&self) -> Option<&str> {
        self.headers.first("Call-ID").or_else(|| self.headers.first("i"))
    }

    pub fn cseq(&self) -> Option<(u32, Method)> {
        let raw = self.headers.first("CSeq")?;
        let mut parts = raw.splitn(2, char::is_whitespace);
        let number: u32 = parts.next()?.parse().ok()?;
        let method = Method::parse(parts.next()?.trim());
        Some((number, method))
    }

    pub fn top_via_branch(&self) -> Option<&str> {
        let via = self.headers.first("Via").or_else(|| self.headers.first("v"))?;
        via.split(';').find_map(|param| {
            let param = param.trim();
            param.strip_prefix("branch=")
        })
    }

    fn tag_from_header(&self, name: &str, compact: &str) -> Option<&str> {
        let value = self.headers.first(name).or_else(|| self.headers.first(compact))?;
        value.split(';').find_map(|param| param.trim().strip_prefix("tag="))
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.tag_from_header("From", "f")
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.tag_from_header("To", "t")
    }

    pub fn is_request(&self) -> bool {
        self.start_line.is_request()
    }
}
