//! The call state machine and the per-call record kept in storage.

use std::sync::Arc;
use std::time::Instant;

use sipwatch_codec_sdp::SdpData;
use sipwatch_codec_sip::Method;

use crate::message::StoredMessage;

/// Lifecycle states a correlated SIP dialog moves through.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CallState {
    CallSetup,
    InCall,
    Cancelled,
    Rejected,
    Busy,
    Diverted,
    Completed,
}

impl CallState {
    /// Terminal states are never left; a call that reaches one stays there
    /// until storage evicts it.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Rejected | Self::Busy | Self::Diverted | Self::Completed)
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: Self) -> bool {
        use CallState::*;
        match (self, to) {
            (CallSetup, InCall | Cancelled | Rejected | Busy | Diverted) => true,
            (InCall, InCall) => true, // re-INVITE renegotiation, no state change
            (InCall, Completed) => true,
            _ => false,
        }
    }
}

/// Minimal summary of one negotiated media stream, derived from the SDP
/// carried by the call's offer/answer exchange.
#[derive(Clone, Debug)]
pub struct MediaSummary {
    pub media_type: String,
    pub address: Option<String>,
    pub port: u16,
    pub codec_names: Vec<String>,
}

impl MediaSummary {
    pub fn from_sdp(sdp: &SdpData) -> Vec<Self> {
        sdp.media
            .iter()
            .enumerate()
            .map(|(idx, media)| Self {
                media_type: media.media_type.clone(),
                address: sdp.effective_connection(idx).map(|c| c.address.clone()),
                port: media.port,
                codec_names: media.formats.iter().filter_map(|f| f.name.clone()).collect(),
            })
            .collect()
    }
}

/// A correlated SIP dialog: all messages sharing a `Call-ID` (or linked to
/// it via `xcalls`), reduced to the state and metadata the filter engine
/// and display layer need.
#[derive(Clone, Debug)]
pub struct Call {
    pub call_id: Arc<str>,
    pub state: CallState,
    pub from_uri: Option<String>,
    pub to_uri: Option<String>,
    pub created_at: Instant,
    pub updated_at: Instant,
    pub terminal_at: Option<Instant>,
    pub renegotiations: u32,
    pub last_renegotiation_at: Option<Instant>,
    /// Other call ids linked to this one via `Replaces`/`Refer-To`/`Referred-By`.
    pub xcalls: Vec<Arc<str>>,
    pub media: Vec<MediaSummary>,
    pub packet_count: u64,
    pub byte_count: u64,
    pub last_method: Option<Method>,
    /// All messages belonging to this call, in arrival order. Per
    /// spec.md §3's `Call` invariant, this is never empty once the call
    /// exists and is always sorted non-decreasing by timestamp.
    pub messages: Vec<StoredMessage>,
}

impl Call {
    pub fn new(call_id: Arc<str>, now: Instant) -> Self {
        Self {
            call_id,
            state: CallState::CallSetup,
            from_uri: None,
            to_uri: None,
            created_at: now,
            updated_at: now,
            terminal_at: None,
            renegotiations: 0,
            last_renegotiation_at: None,
            xcalls: Vec::new(),
            media: Vec::new(),
            packet_count: 0,
            byte_count: 0,
            last_method: None,
            messages: Vec::new(),
        }
    }

    /// Attempts the transition, recording `terminal_at` the moment a
    /// terminal state is entered. No-op (returns `false`) on an illegal
    /// transition; callers log this as a correlation anomaly rather than
    /// panic, since a stray retransmitted final response arriving twice
    /// is a normal occurrence on the wire.
    pub fn transition_to(&mut self, to: CallState, now: Instant) -> bool {
        if self.state == to && to == CallState::InCall {
            // re-INVITE within an already-established dialog
            self.renegotiations += 1;
            self.last_renegotiation_at = Some(now);
            self.updated_at = now;
            return true;
        }
        if !self.state.can_transition_to(to) {
            return false;
        }
        self.state = to;
        self.updated_at = now;
        if to.is_terminal() {
            self.terminal_at = Some(now);
        }
        true
    }

    pub fn record_packet(&mut self, bytes: u64, now: Instant) {
        self.packet_count += 1;
        self.byte_count += bytes;
        self.updated_at = now;
    }

    pub fn link_xcall(&mut self, other: Arc<str>) {
        if !self.xcalls.iter().any(|id| **id == *other) {
            self.xcalls.push(other);
        }
    }

    /// Applies the state-machine table in spec.md §4.C11 for one newly
    /// arrived message, given whether the call has already entered
    /// `InCall` (needed to tell a re-INVITE from the establishing one and
    /// to recognize a `BYE` as ending an established dialog rather than
    /// one still being set up).
    fn derive_transition(&self, message: &StoredMessage) -> Option<CallState> {
        if message.is_request() {
            return match message.method {
                Some(Method::Invite) if self.state == CallState::InCall => Some(CallState::InCall),
                Some(Method::Invite) => Some(CallState::CallSetup),
                Some(Method::Cancel) => Some(CallState::Cancelled),
                Some(Method::Bye) if self.state == CallState::InCall => Some(CallState::Completed),
                _ => None,
            };
        }

        // A response only drives the state machine when it answers an
        // INVITE transaction; responses to BYE/REGISTER/etc. don't move
        // a call between the states spec.md §4.C11 names.
        if message.method != Some(Method::Invite) {
            return None;
        }
        let code = message.status_code?;
        match code {
            100..=199 => None,
            300..=399 => Some(CallState::Diverted),
            486 | 600 => Some(CallState::Busy),
            200..=299 => Some(CallState::InCall),
            400..=599 => Some(CallState::Rejected),
            _ => None,
        }
    }

    /// Appends `message` to this call's ordered message list, updates the
    /// endpoint/media metadata first derived from it, and drives the
    /// state machine. Returns whether this was the call's first message.
    pub fn push_message(&mut self, message: StoredMessage, now: Instant) -> bool {
        let is_first = self.messages.is_empty();
        if self.from_uri.is_none() {
            self.from_uri = message.from_uri.clone();
        }
        if self.to_uri.is_none() {
            self.to_uri = message.to_uri.clone();
        }
        if let Some(method) = &message.method {
            self.last_method = Some(method.clone());
        }
        if let Some(sdp) = &message.sdp {
            self.media = MediaSummary::from_sdp(sdp);
        }

        if let Some(next_state) = self.derive_transition(&message) {
            self.transition_to(next_state, now);
        } else {
            self.updated_at = now;
        }

        self.messages.push(message);
        is_first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_to_in_call_to_completed() {
        let now = Instant::now();
        let mut call = Call::new(Arc::from("abc"), now);
        assert!(call.transition_to(CallState::InCall, now));
        assert!(call.transition_to(CallState::Completed, now));
        assert!(call.state.is_terminal());
    }

    #[test]
    fn reinvite_increments_renegotiations_without_changing_state() {
        let now = Instant::now();
        let mut call = Call::new(Arc::from("abc"), now);
        call.transition_to(CallState::InCall, now);
        assert!(call.transition_to(CallState::InCall, now));
        assert_eq!(call.renegotiations, 1);
        assert_eq!(call.state, CallState::InCall);
    }

    #[test]
    fn completed_is_terminal_and_rejects_further_transitions() {
        let now = Instant::now();
        let mut call = Call::new(Arc::from("abc"), now);
        call.transition_to(CallState::InCall, now);
        call.transition_to(CallState::Completed, now);
        assert!(!call.transition_to(CallState::InCall, now));
    }

    #[test]
    fn cancel_from_setup_is_terminal() {
        let now = Instant::now();
        let mut call = Call::new(Arc::from("abc"), now);
        assert!(call.transition_to(CallState::Cancelled, now));
        assert!(call.terminal_at.is_some());
    }

    fn stored(method: Option<Method>, status: Option<u16>) -> StoredMessage {
        use bytes::Bytes;
        use sipwatch_core::Address;
        StoredMessage {
            timestamp: sipwatch_core::Timestamp::new(0, 0, 0),
            src: Address::new("10.0.0.1".parse().unwrap(), 5060),
            dst: Address::new("10.0.0.2".parse().unwrap(), 5060),
            method,
            status_code: status,
            from_uri: Some("sip:alice@example.com".to_string()),
            to_uri: Some("sip:bob@example.com".to_string()),
            from_tag: Some("1".to_string()),
            to_tag: None,
            raw: Bytes::from_static(b"INVITE sip:bob@example.com SIP/2.0\r\n\r\n"),
            sdp: None,
        }
    }

    #[test]
    fn simple_dialog_reaches_completed_via_push_message() {
        let now = Instant::now();
        let mut call = Call::new(Arc::from("a@x"), now);
        call.push_message(stored(Some(Method::Invite), None), now);
        assert_eq!(call.state, CallState::CallSetup);
        call.push_message(stored(Some(Method::Invite), Some(200)), now);
        assert_eq!(call.state, CallState::InCall);
        call.push_message(stored(Some(Method::Ack), None), now);
        assert_eq!(call.state, CallState::InCall);
        call.push_message(stored(Some(Method::Bye), None), now);
        assert_eq!(call.state, CallState::Completed);
        assert_eq!(call.messages.len(), 4);
        assert!(call.state.is_terminal());
    }

    #[test]
    fn busy_response_to_invite_marks_busy() {
        let now = Instant::now();
        let mut call = Call::new(Arc::from("a@x"), now);
        call.push_message(stored(Some(Method::Invite), None), now);
        call.push_message(stored(Some(Method::Invite), Some(486)), now);
        assert_eq!(call.state, CallState::Busy);
    }

    #[test]
    fn diverted_on_3xx_response_to_invite() {
        let now = Instant::now();
        let mut call = Call::new(Arc::from("a@x"), now);
        call.push_message(stored(Some(Method::Invite), None), now);
        call.push_message(stored(Some(Method::Invite), Some(302)), now);
        assert_eq!(call.state, CallState::Diverted);
    }

    #[test]
    fn reinvite_after_in_call_is_a_renegotiation_not_a_reset() {
        let now = Instant::now();
        let mut call = Call::new(Arc::from("a@x"), now);
        call.push_message(stored(Some(Method::Invite), None), now);
        call.push_message(stored(Some(Method::Invite), Some(200)), now);
        call.push_message(stored(Some(Method::Invite), None), now);
        assert_eq!(call.state, CallState::InCall);
        assert_eq!(call.renegotiations, 1);
    }
}
