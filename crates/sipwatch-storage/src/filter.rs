//! The filter engine: a conjunction of attribute predicates plus an
//! optional payload match expression. Filters are pure predicates over a
//! [`Call`] snapshot; evaluating one never mutates storage.

use regex::Regex;
use sipwatch_codec_sip::Method;

use crate::call::{Call, CallState};
use crate::error::StorageError;

#[derive(Debug)]
pub enum Predicate {
    Equals { attribute: Attribute, value: String },
    Contains { attribute: Attribute, value: String },
    Matches { attribute: Attribute, pattern: Regex },
    NumericRange { attribute: Attribute, min: Option<i64>, max: Option<i64> },
    MethodIn(Vec<Method>),
    StateIn(Vec<CallState>),
}

/// The attributes a predicate can be evaluated against. Only the fields
/// `Call` actually carries are exposed; there is no free-form attribute
/// lookup here since storage predicates are typed, unlike the dissection
/// chain's per-packet [`sipwatch_core::AttributeSet`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Attribute {
    CallId,
    FromUri,
    ToUri,
    PacketCount,
    ByteCount,
    Renegotiations,
}

impl Attribute {
    fn string_value(self, call: &Call) -> Option<String> {
        match self {
            Self::CallId => Some(call.call_id.to_string()),
            Self::FromUri => call.from_uri.clone(),
            Self::ToUri => call.to_uri.clone(),
            Self::PacketCount => Some(call.packet_count.to_string()),
            Self::ByteCount => Some(call.byte_count.to_string()),
            Self::Renegotiations => Some(call.renegotiations.to_string()),
        }
    }

    fn numeric_value(self, call: &Call) -> Option<i64> {
        match self {
            Self::PacketCount => Some(call.packet_count as i64),
            Self::ByteCount => Some(call.byte_count as i64),
            Self::Renegotiations => Some(call.renegotiations as i64),
            _ => None,
        }
    }
}

impl Predicate {
    fn matches(&self, call: &Call) -> bool {
        match self {
            Self::Equals { attribute, value } => attribute.string_value(call).as_deref() == Some(value.as_str()),
            Self::Contains { attribute, value } => attribute.string_value(call).map(|v| v.contains(value.as_str())).unwrap_or(false),
            Self::Matches { attribute, pattern } => attribute.string_value(call).map(|v| pattern.is_match(&v)).unwrap_or(false),
            Self::NumericRange { attribute, min, max } => match attribute.numeric_value(call) {
                Some(v) => min.map(|m| v >= m).unwrap_or(true) && max.map(|m| v <= m).unwrap_or(true),
                None => false,
            },
            Self::MethodIn(methods) => call.last_method.as_ref().map(|m| methods.contains(m)).unwrap_or(false),
            Self::StateIn(states) => states.contains(&call.state),
        }
    }
}

/// A complete filter: every predicate must match (logical AND), and if a
/// payload match expression is set, the call's raw body content must also
/// match it (evaluated by the caller, which has access to raw frames;
/// `Filter` itself only carries the compiled pattern).
#[derive(Debug, Default)]
pub struct Filter {
    predicates: Vec<Predicate>,
    pub payload_match: Option<Regex>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_payload_match(mut self, pattern: &str) -> Result<Self, StorageError> {
        let compiled = Regex::new(pattern).map_err(|e| StorageError::FilterParse(e.to_string()))?;
        self.payload_match = Some(compiled);
        Ok(self)
    }

    /// Evaluates the attribute predicates only; payload matching requires
    /// the raw frame bytes and is applied separately by the caller.
    pub fn matches(&self, call: &Call) -> bool {
        self.predicates.iter().all(|p| p.matches(call))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.payload_match.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn sample_call() -> Call {
        let mut call = Call::new(Arc::from("call-1"), Instant::now());
        call.from_uri = Some("sip:alice@example.com".to_string());
        call.to_uri = Some("sip:bob@example.com".to_string());
        call.packet_count = 10;
        call
    }

    #[test]
    fn equals_predicate_matches_exact_value() {
        let call = sample_call();
        let filter = Filter::new().with_predicate(Predicate::Equals {
            attribute: Attribute::CallId,
            value: "call-1".to_string(),
        });
        assert!(filter.matches(&call));
    }

    #[test]
    fn numeric_range_respects_bounds() {
        let call = sample_call();
        let filter = Filter::new().with_predicate(Predicate::NumericRange {
            attribute: Attribute::PacketCount,
            min: Some(5),
            max: Some(20),
        });
        assert!(filter.matches(&call));

        let too_narrow = Filter::new().with_predicate(Predicate::NumericRange {
            attribute: Attribute::PacketCount,
            min: Some(11),
            max: None,
        });
        assert!(!too_narrow.matches(&call));
    }

    #[test]
    fn contains_predicate_substring_matches() {
        let call = sample_call();
        let filter = Filter::new().with_predicate(Predicate::Contains {
            attribute: Attribute::FromUri,
            value: "alice".to_string(),
        });
        assert!(filter.matches(&call));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let call = sample_call();
        assert!(Filter::new().matches(&call));
    }
}
