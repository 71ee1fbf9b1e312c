//! Transaction identity derived from a parsed message, used by the storage
//! layer to correlate requests with their responses.

use crate::message::{Method, SipMessage};

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TransactionKey {
    pub call_id: String,
    pub cseq_number: u32,
    pub cseq_method: String,
    pub branch: String,
}

impl TransactionKey {
    /// Derives the key from a message's `Call-ID`, `CSeq` and the branch
    /// parameter of its topmost `Via`. Returns `None` if any of the three
    /// required pieces is absent (the message dissector already rejects
    /// messages missing these headers entirely, so this should only fail
    /// for a branch-less `Via`, which RFC 3261 clients should never send).
    pub fn from_message(message: &SipMessage) -> Option<Self> {
        let call_id = message.call_id()?.to_string();
        let (cseq_number, cseq_method) = message.cseq()?;
        let branch = message.top_via_branch()?.to_string();
        Some(Self {
            call_id,
            cseq_number,
            cseq_method: cseq_method.as_str().to_string(),
            branch,
        })
    }
}

pub fn method_of(message: &SipMessage) -> Option<Method> {
    message.cseq().map(|(_, method)| method)
}
