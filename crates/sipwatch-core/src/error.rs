//! Error taxonomy shared by every dissector in the chain.
//!
//! Dissection failures are not fatal to the worker: a dissector that
//! returns `Err` simply stops the chain short for that packet. Callers
//! that want to count or log failures match on [`DissectError`]'s kind.

use thiserror::Error;

/// Failure of a single dissector applied to a packet.
///
/// Maps onto the `Decode` and `Reassembly` kinds of the top-level error
/// taxonomy; `sipwatch-capture` and `sipwatch-storage` define their own
/// variants for the other kinds (`InputOpen`, `FilterParse`, `Config`,
/// `Storage`).
#[derive(Debug, Error)]
pub enum DissectError {
    #[error("{dissector}: malformed input: {reason}")]
    Decode {
        dissector: &'static str,
        reason: String,
    },

    #[error("{dissector}: truncated input, need at least {needed} bytes, have {have}")]
    Truncated {
        dissector: &'static str,
        needed: usize,
        have: usize,
    },

    #[error("{dissector}: reassembly failed: {reason}")]
    Reassembly {
        dissector: &'static str,
        reason: String,
    },

    #[error("{dissector}: unknown protocol id {id}")]
    UnknownProtocol { dissector: &'static str, id: u32 },
}

impl DissectError {
    pub fn decode(dissector: &'static str, reason: impl Into<String>) -> Self {
        Self::Decode {
            dissector,
            reason: reason.into(),
        }
    }

    pub fn truncated(dissector: &'static str, needed: usize, have: usize) -> Self {
        Self::Truncated {
            dissector,
            needed,
            have,
        }
    }

    pub fn reassembly(dissector: &'static str, reason: impl Into<String>) -> Self {
        Self::Reassembly {
            dissector,
            reason: reason.into(),
        }
    }

    /// The originating dissector's static name, used for metrics/log fields.
    pub fn dissector(&self) -> &'static str {
        match self {
            Self::Decode { dissector, .. }
            | Self::Truncated { dissector, .. }
            | Self::Reassembly { dissector, .. }
            | Self::UnknownProtocol { dissector, .. } => dissector,
        }
    }
}
