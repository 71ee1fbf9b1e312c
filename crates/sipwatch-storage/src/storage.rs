//! Concurrent indexed call storage.
//!
//! The primary map is a `dashmap::DashMap<Arc<str>, Call>`, giving
//! independently-lockable shards so that ordinary mutating entry points
//! (record a packet, transition a call's state) never contend with each
//! other across unrelated calls. A thin outer `parking_lot::RwLock` guards
//! the aggregate fields (stats counters, the eviction index, the memory
//! budget, the storage-level ingest config) that must stay consistent
//! across a whole ingest step.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;

use sipwatch_codec_sdp::SdpData;
use sipwatch_codec_sip::{Method, SipMessage};
use sipwatch_core::{Address, Timestamp};

use crate::call::{Call, CallState};
use crate::config::StorageSettings;
use crate::error::StorageError;
use crate::filter::Filter;
use crate::message::StoredMessage;
use crate::stats::StorageStats;
use crate::xcalls;

struct Aggregate {
    stats: StorageStats,
    /// Oldest-first index of terminal calls, keyed by the instant they
    /// became terminal, for O(log n) eviction instead of a full scan.
    eviction_index: BTreeMap<(Instant, Arc<str>), ()>,
    memory_limit_bytes: u64,
    memory_used_bytes: u64,
    capture_dialogs_only: bool,
    match_expression: Option<Regex>,
    match_invert: bool,
    match_complete_only: bool,
}

/// The outcome of one [`Storage::ingest_sip_message`] call, for the caller
/// to decide whether to notify observers of a new or changed call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
    /// Dropped by the match expression or the `capture_dialogs_only` gate
    /// before ever reaching a call.
    Dropped,
    /// Appended to `call_id`, creating it first if `created`.
    Ingested { created: bool },
}

/// Which field to order a [`Storage::snapshot_sorted`] result by.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortKey {
    CallId,
    CreatedAt,
    UpdatedAt,
    PacketCount,
    ByteCount,
    State,
}

#[derive(Clone, Copy, Debug)]
pub struct SortSpec {
    pub key: SortKey,
    pub ascending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self { key: SortKey::CallId, ascending: true }
    }
}

pub struct Storage {
    calls: DashMap<Arc<str>, Call>,
    aggregate: RwLock<Aggregate>,
    /// Bumped on every mutation that changes what a snapshot would return,
    /// so observers can cheaply tell "nothing changed" from "poll again".
    generation: AtomicU64,
}

impl Storage {
    pub fn new(settings: &StorageSettings) -> Self {
        let match_expression = settings.match_expression.as_deref().map(Regex::new).transpose().expect("StorageSettings::match_expression validated before construction");
        Self {
            calls: DashMap::new(),
            aggregate: RwLock::new(Aggregate {
                stats: StorageStats::new(),
                eviction_index: BTreeMap::new(),
                memory_limit_bytes: settings.memory_limit_bytes,
                memory_used_bytes: 0,
                capture_dialogs_only: settings.capture_dialogs_only,
                match_expression,
                match_invert: settings.match_invert,
                match_complete_only: settings.match_complete_only,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns an existing call or creates one in `CallSetup`, updating
    /// the total-calls counter on first creation.
    pub fn get_or_create(&self, call_id: &Arc<str>, now: Instant) -> dashmap::mapref::one::RefMut<'_, Arc<str>, Call> {
        if let Some(existing) = self.calls.get_mut(call_id) {
            return existing;
        }
        self.calls.entry(call_id.clone()).or_insert_with(|| {
            let mut aggregate = self.aggregate.write();
            aggregate.stats.calls_total += 1;
            aggregate.stats.calls_active += 1;
            Call::new(call_id.clone(), now)
        })
    }

    pub fn get(&self, call_id: &Arc<str>) -> Option<Ref<'_, Arc<str>, Call>> {
        self.calls.get(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Records that `call_id` just transitioned state, updating the
    /// eviction index and terminal/active counters if the call became
    /// terminal for the first time.
    pub fn note_transition(&self, call_id: &Arc<str>, was_terminal: bool, now: Instant) {
        let Some(call) = self.calls.get(call_id) else { return };
        if !was_terminal && call.state.is_terminal() {
            let terminal_at = call.terminal_at.unwrap_or(now);
            drop(call);
            let mut aggregate = self.aggregate.write();
            aggregate.eviction_index.insert((terminal_at, call_id.clone()), ());
            aggregate.stats.calls_active = aggregate.stats.calls_active.saturating_sub(1);
            aggregate.stats.calls_terminal += 1;
        }
    }

    pub fn record_packet(&self, call_id: &Arc<str>, bytes: u64, now: Instant) {
        if let Some(mut call) = self.calls.get_mut(call_id) {
            call.record_packet(bytes, now);
        }
        let mut aggregate = self.aggregate.write();
        aggregate.stats.packets_indexed += 1;
        aggregate.stats.bytes_indexed += bytes;
        aggregate.memory_used_bytes += bytes;
        self.enforce_memory_limit_locked(&mut aggregate);
    }

    pub fn record_decode_error(&self) {
        self.aggregate.write().stats.decode_errors += 1;
    }

    pub fn set_memory_limit(&self, bytes: u64) {
        let mut aggregate = self.aggregate.write();
        aggregate.memory_limit_bytes = bytes;
        self.enforce_memory_limit_locked(&mut aggregate);
    }

    pub fn set_capture_dialogs_only(&self, only: bool) {
        self.aggregate.write().capture_dialogs_only = only;
    }

    pub fn set_match_invert(&self, invert: bool) {
        self.aggregate.write().match_invert = invert;
    }

    pub fn set_match_complete_only(&self, only: bool) {
        self.aggregate.write().match_complete_only = only;
    }

    /// Compiles and installs a new payload match expression, or clears it
    /// when `pattern` is `None`. Leaves the previous expression in place on
    /// a parse error.
    pub fn set_match_expression(&self, pattern: Option<&str>) -> Result<(), StorageError> {
        let compiled = pattern.map(Regex::new).transpose().map_err(|e| StorageError::MatchExpressionParse(e.to_string()))?;
        self.aggregate.write().match_expression = compiled;
        Ok(())
    }

    pub fn stats(&self) -> StorageStats {
        self.aggregate.read().stats
    }

    /// Bytes currently retained across all calls, against which
    /// `memory_limit_bytes` is enforced.
    pub fn memory_used_bytes(&self) -> u64 {
        self.aggregate.read().memory_used_bytes
    }

    /// Evicts the oldest terminal calls until memory use is back under the
    /// configured limit, or until there is nothing left to evict. Calls
    /// still in progress are never evicted regardless of memory pressure.
    fn enforce_memory_limit_locked(&self, aggregate: &mut Aggregate) {
        if aggregate.memory_limit_bytes == 0 {
            return;
        }
        while aggregate.memory_used_bytes > aggregate.memory_limit_bytes {
            let Some((key, _)) = aggregate.eviction_index.iter().next() else {
                break;
            };
            let key = key.clone();
            let (_, call_id) = key.clone();
            aggregate.eviction_index.remove(&key);
            if let Some((_, call)) = self.calls.remove(&call_id) {
                aggregate.memory_used_bytes = aggregate.memory_used_bytes.saturating_sub(call.byte_count);
                aggregate.stats.calls_terminal = aggregate.stats.calls_terminal.saturating_sub(1);
                aggregate.stats.calls_evicted += 1;
                tracing::debug!(call_id = %call_id, "evicted terminal call under memory pressure");
            }
        }
    }

    /// Ingests one already-dissected SIP message: checks the storage-level
    /// payload match expression and the `capture_dialogs_only` gate, then
    /// appends it to its call (creating the call if needed), drives the
    /// call's state machine, and resolves any `xcalls` linkage the message
    /// carries. Mirrors the ingestion protocol in spec.md §4.C13.
    #[allow(clippy::too_many_arguments)]
    pub fn ingest_sip_message(&self, message: &SipMessage, src: Address, dst: Address, timestamp: Timestamp, sdp: Option<SdpData>, now: Instant) -> IngestOutcome {
        let Some(call_id_str) = message.call_id() else {
            return IngestOutcome::Dropped;
        };
        let call_id: Arc<str> = Arc::from(call_id_str);

        let (match_expression, match_invert, capture_dialogs_only) = {
            let aggregate = self.aggregate.read();
            (aggregate.match_expression.clone(), aggregate.match_invert, aggregate.capture_dialogs_only)
        };

        if let Some(pattern) = &match_expression {
            let text = String::from_utf8_lossy(&message.raw);
            if pattern.is_match(&text) == match_invert {
                return IngestOutcome::Dropped;
            }
        }

        let is_invite = message.start_line.method() == Some(&Method::Invite) || message.cseq().map(|(_, m)| m == Method::Invite).unwrap_or(false);
        let already_exists = self.calls.contains_key(&call_id);
        if !already_exists && capture_dialogs_only && !is_invite {
            return IngestOutcome::Dropped;
        }

        let stored = StoredMessage::from_sip(message, src, dst, timestamp, sdp);
        let bytes = stored.byte_len();

        let created = {
            let mut call = self.get_or_create(&call_id, now);
            let was_terminal = call.state.is_terminal();
            let created = call.push_message(stored, now);
            drop(call);
            self.note_transition(&call_id, was_terminal, now);
            created
        };
        self.record_packet(&call_id, bytes, now);

        for other in xcalls::linked_call_ids(message) {
            let other_id: Arc<str> = Arc::from(other.as_str());
            if !self.calls.contains_key(&other_id) {
                continue;
            }
            if let Some(mut call) = self.calls.get_mut(&call_id) {
                call.link_xcall(other_id.clone());
            }
            if let Some(mut other_call) = self.calls.get_mut(&other_id) {
                other_call.link_xcall(call_id.clone());
            }
        }

        self.generation.fetch_add(1, Ordering::Relaxed);
        IngestOutcome::Ingested { created }
    }

    /// Returns a snapshot of every call matching `filter`, ordered by
    /// `call_id`. Snapshots clone call state rather than holding shard
    /// locks for the caller's lifetime. Excludes calls that have not
    /// reached a terminal state when `match_complete_only` is set.
    pub fn snapshot(&self, filter: &Filter) -> Vec<Call> {
        let match_complete_only = self.aggregate.read().match_complete_only;
        let mut out: Vec<Call> = self
            .calls
            .iter()
            .filter(|entry| !match_complete_only || entry.value().state.is_terminal())
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.call_id.cmp(&b.call_id));
        out
    }

    /// Like [`Storage::snapshot`], but ordered by `sort` instead of always
    /// by call id.
    pub fn snapshot_sorted(&self, filter: &Filter, sort: &SortSpec) -> Vec<Call> {
        let mut out = self.snapshot(filter);
        out.sort_by(|a, b| {
            let ordering = match sort.key {
                SortKey::CallId => a.call_id.cmp(&b.call_id),
                SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
                SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortKey::PacketCount => a.packet_count.cmp(&b.packet_count),
                SortKey::ByteCount => a.byte_count.cmp(&b.byte_count),
                SortKey::State => (a.state as u8).cmp(&(b.state as u8)),
            };
            if sort.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
        out
    }

    pub fn calls_in_state(&self, state: CallState) -> Vec<Arc<str>> {
        self.calls.iter().filter(|e| e.value().state == state).map(|e| e.key().clone()).collect()
    }

    /// Empties the store entirely: every call is dropped and the live
    /// counters (`calls_total`, `calls_active`, `calls_terminal`, memory
    /// used) reset to zero. Cumulative counters (`packets_indexed`,
    /// `calls_evicted`, ...) are left untouched since they describe
    /// processing history, not current content.
    pub fn calls_clear(&self) {
        self.calls.clear();
        let mut aggregate = self.aggregate.write();
        aggregate.eviction_index.clear();
        aggregate.memory_used_bytes = 0;
        aggregate.stats.calls_total = 0;
        aggregate.stats.calls_active = 0;
        aggregate.stats.calls_terminal = 0;
        drop(aggregate);
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes only the calls `filter` does *not* match, recomputing the
    /// live counters from what remains.
    pub fn calls_clear_soft(&self, filter: &Filter) {
        let to_remove: Vec<Arc<str>> = self.calls.iter().filter(|e| !filter.matches(e.value())).map(|e| e.key().clone()).collect();
        for id in &to_remove {
            self.calls.remove(id);
        }
        self.rebuild_live_counts();
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Recomputes `calls_total`/`calls_active`/`calls_terminal`,
    /// `memory_used_bytes` and the eviction index from the current
    /// contents of `calls`, for use after a bulk removal.
    fn rebuild_live_counts(&self) {
        let mut total = 0u64;
        let mut active = 0u64;
        let mut terminal = 0u64;
        let mut memory = 0u64;
        let mut eviction_index = BTreeMap::new();
        let now = Instant::now();
        for entry in self.calls.iter() {
            total += 1;
            memory += entry.value().byte_count;
            if entry.value().state.is_terminal() {
                terminal += 1;
                let at = entry.value().terminal_at.unwrap_or(now);
                eviction_index.insert((at, entry.key().clone()), ());
            } else {
                active += 1;
            }
        }
        let mut aggregate = self.aggregate.write();
        aggregate.stats.calls_total = total;
        aggregate.stats.calls_active = active;
        aggregate.stats.calls_terminal = terminal;
        aggregate.memory_used_bytes = memory;
        aggregate.eviction_index = eviction_index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sipwatch_codec_sip::parse::parse_message;

    use crate::filter::{Attribute, Predicate};

    fn settings(limit: u64) -> StorageSettings {
        StorageSettings { memory_limit_bytes: limit, ..StorageSettings::default() }
    }

    fn addr() -> (Address, Address) {
        (Address::new("10.0.0.1".parse().unwrap(), 5060), Address::new("10.0.0.2".parse().unwrap(), 5060))
    }

    #[test]
    fn get_or_create_counts_only_once() {
        let storage = Storage::new(&settings(0));
        let id: Arc<str> = Arc::from("call-1");
        let now = Instant::now();
        drop(storage.get_or_create(&id, now));
        drop(storage.get_or_create(&id, now));
        assert_eq!(storage.stats().calls_total, 1);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn terminal_calls_are_evicted_under_memory_pressure() {
        let storage = Storage::new(&settings(10));
        let id: Arc<str> = Arc::from("call-1");
        let now = Instant::now();
        {
            let mut call = storage.get_or_create(&id, now);
            call.transition_to(CallState::InCall, now);
            call.transition_to(CallState::Completed, now);
        }
        storage.note_transition(&id, false, now);
        storage.record_packet(&id, 100, now);
        assert_eq!(storage.len(), 0);
        assert_eq!(storage.stats().calls_evicted, 1);
    }

    /// spec.md §8 scenario 3: a 64 KiB budget holding 10,000 terminal,
    /// 1 KiB calls keeps the retained set under 70 calls, all terminal,
    /// with the oldest evicted first and the budget never exceeded.
    #[test]
    fn memory_pressure_scenario_retains_fewer_than_seventy_calls() {
        let storage = Storage::new(&settings(64 * 1024));
        let base = Instant::now();

        for i in 0..10_000u32 {
            let id: Arc<str> = Arc::from(format!("call-{i}"));
            let now = base + std::time::Duration::from_micros(i as u64);
            {
                let mut call = storage.get_or_create(&id, now);
                call.transition_to(CallState::InCall, now);
                call.transition_to(CallState::Completed, now);
            }
            storage.note_transition(&id, false, now);
            storage.record_packet(&id, 1024, now);
            assert!(storage.memory_used_bytes() <= 65536);
        }

        assert!(storage.len() < 70, "expected fewer than 70 calls retained, got {}", storage.len());
        assert!(storage.memory_used_bytes() <= 65536);
        let evicted_count = 10_000usize - storage.len();
        assert_eq!(storage.stats().calls_evicted as usize, evicted_count);

        for i in 0..evicted_count as u32 {
            let id: Arc<str> = Arc::from(format!("call-{i}"));
            assert!(storage.get(&id).is_none(), "oldest calls should be evicted first");
        }
    }

    #[test]
    fn active_calls_survive_memory_pressure() {
        let storage = Storage::new(&settings(10));
        let id: Arc<str> = Arc::from("call-1");
        let now = Instant::now();
        drop(storage.get_or_create(&id, now));
        storage.record_packet(&id, 1000, now);
        assert_eq!(storage.len(), 1);
    }

    fn invite(call_id: &str) -> SipMessage {
        let raw = Bytes::from(format!(
            "INVITE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc1;branch=z9hG4bK1\r\n\
From: Alice <sip:alice@example.com>;tag=1\r\n\
To: Bob <sip:bob@example.com>\r\n\
Call-ID: {call_id}\r\n\
CSeq: 1 INVITE\r\n\
\r\n"
        ));
        parse_message(&raw).unwrap()
    }

    fn bye(call_id: &str) -> SipMessage {
        let raw = Bytes::from(format!(
            "BYE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc1;branch=z9hG4bK2\r\n\
From: Alice <sip:alice@example.com>;tag=1\r\n\
To: Bob <sip:bob@example.com>;tag=2\r\n\
Call-ID: {call_id}\r\n\
CSeq: 2 BYE\r\n\
\r\n"
        ));
        parse_message(&raw).unwrap()
    }

    fn response(call_id: &str, cseq_num: u32, cseq_method: &str, branch: &str, status: u16, reason: &str) -> SipMessage {
        let raw = Bytes::from(format!(
            "SIP/2.0 {status} {reason}\r\n\
Via: SIP/2.0/UDP pc1;branch={branch}\r\n\
From: Alice <sip:alice@example.com>;tag=1\r\n\
To: Bob <sip:bob@example.com>;tag=2\r\n\
Call-ID: {call_id}\r\n\
CSeq: {cseq_num} {cseq_method}\r\n\
\r\n"
        ));
        parse_message(&raw).unwrap()
    }

    fn ack(call_id: &str) -> SipMessage {
        let raw = Bytes::from(format!(
            "ACK sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc1;branch=z9hG4bK1\r\n\
From: Alice <sip:alice@example.com>;tag=1\r\n\
To: Bob <sip:bob@example.com>;tag=2\r\n\
Call-ID: {call_id}\r\n\
CSeq: 1 ACK\r\n\
\r\n"
        ));
        parse_message(&raw).unwrap()
    }

    /// spec.md §8 scenario 1: a full INVITE/200/ACK/BYE/200 dialog ends up
    /// as one completed call with all five messages in arrival order and
    /// no transfer links.
    #[test]
    fn simple_dialog_completes_with_all_five_messages() {
        let storage = Storage::new(&settings(0));
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);

        storage.ingest_sip_message(&invite("a@x"), src, dst, ts, None, now);
        storage.ingest_sip_message(&response("a@x", 1, "INVITE", "z9hG4bK1", 200, "OK"), dst, src, ts, None, now);
        storage.ingest_sip_message(&ack("a@x"), src, dst, ts, None, now);
        storage.ingest_sip_message(&bye("a@x"), src, dst, ts, None, now);
        storage.ingest_sip_message(&response("a@x", 2, "BYE", "z9hG4bK2", 200, "OK"), dst, src, ts, None, now);

        let call = storage.get(&Arc::from("a@x")).unwrap();
        assert_eq!(call.state, CallState::Completed);
        assert_eq!(call.messages.len(), 5);
        assert!(call.xcalls.is_empty());
    }

    #[test]
    fn ingest_creates_call_and_bye_completes_it() {
        let storage = Storage::new(&settings(0));
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);

        let outcome = storage.ingest_sip_message(&invite("a@x"), src, dst, ts, None, now);
        assert_eq!(outcome, IngestOutcome::Ingested { created: true });

        let outcome = storage.ingest_sip_message(&bye("a@x"), src, dst, ts, None, now);
        assert_eq!(outcome, IngestOutcome::Ingested { created: false });

        let snapshot = storage.snapshot(&Filter::new());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].messages.len(), 2);
    }

    #[test]
    fn capture_dialogs_only_drops_non_invite_for_unknown_call() {
        let mut settings = settings(0);
        settings.capture_dialogs_only = true;
        let storage = Storage::new(&settings);
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);

        let outcome = storage.ingest_sip_message(&bye("never-seen"), src, dst, ts, None, now);
        assert_eq!(outcome, IngestOutcome::Dropped);
        assert!(storage.is_empty());
    }

    #[test]
    fn match_expression_drops_non_matching_payload() {
        let mut settings = settings(0);
        settings.match_expression = Some("bob".to_string());
        let storage = Storage::new(&settings);
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);

        assert_eq!(storage.ingest_sip_message(&invite("a@x"), src, dst, ts, None, now), IngestOutcome::Ingested { created: true });

        let mut inverted = settings.clone();
        inverted.match_invert = true;
        let storage = Storage::new(&inverted);
        assert_eq!(storage.ingest_sip_message(&invite("a@x"), src, dst, ts, None, now), IngestOutcome::Dropped);
    }

    fn refer(call_id: &str, replaces_call_id: &str) -> SipMessage {
        let raw = Bytes::from(format!(
            "REFER sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc1;branch=z9hG4bK3\r\n\
From: Carol <sip:carol@example.com>;tag=1\r\n\
To: Bob <sip:bob@example.com>\r\n\
Call-ID: {call_id}\r\n\
CSeq: 1 REFER\r\n\
Refer-To: <sip:alice@example.com?Replaces={replaces_call_id}%3Bto-tag%3D2%3Bfrom-tag%3D1>\r\n\
\r\n"
        ));
        parse_message(&raw).unwrap()
    }

    #[test]
    fn attended_transfer_links_both_calls() {
        let storage = Storage::new(&settings(0));
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);

        storage.ingest_sip_message(&invite("original-call"), src, dst, ts, None, now);
        storage.ingest_sip_message(&refer("transfer-call", "original-call"), src, dst, ts, None, now);

        let original = storage.get(&Arc::from("original-call")).unwrap();
        assert_eq!(original.xcalls, vec![Arc::<str>::from("transfer-call")]);
        drop(original);
        let transfer = storage.get(&Arc::from("transfer-call")).unwrap();
        assert_eq!(transfer.xcalls, vec![Arc::<str>::from("original-call")]);
    }

    #[test]
    fn calls_clear_empties_store_and_resets_live_counters() {
        let storage = Storage::new(&settings(0));
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);
        storage.ingest_sip_message(&invite("a@x"), src, dst, ts, None, now);

        storage.calls_clear();
        assert!(storage.is_empty());
        assert_eq!(storage.stats().calls_total, 0);
    }

    /// spec.md §8 universal property: applying then reverting a filter
    /// leaves the displayed count unchanged.
    #[test]
    fn filter_then_revert_leaves_displayed_count_unchanged() {
        let storage = Storage::new(&settings(0));
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);
        storage.ingest_sip_message(&invite("a@x"), src, dst, ts, None, now);
        storage.ingest_sip_message(&invite("b@x"), src, dst, ts, None, now);
        storage.ingest_sip_message(&invite("c@x"), src, dst, ts, None, now);

        let before = storage.snapshot(&Filter::new()).len();

        let narrow = Filter::new().with_predicate(Predicate::Equals { attribute: Attribute::CallId, value: "a@x".to_string() });
        assert_eq!(storage.snapshot(&narrow).len(), 1);

        let after = storage.snapshot(&Filter::new()).len();
        assert_eq!(before, after);
    }

    /// spec.md §8 universal property: `clear()` then ingesting S is
    /// equivalent to ingesting S on a fresh store.
    #[test]
    fn clear_then_reingest_matches_fresh_store() {
        let fresh = Storage::new(&settings(0));
        let reused = Storage::new(&settings(0));
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);

        reused.ingest_sip_message(&invite("stale"), src, dst, ts, None, now);
        reused.calls_clear();

        for storage in [&fresh, &reused] {
            storage.ingest_sip_message(&invite("a@x"), src, dst, ts, None, now);
            storage.ingest_sip_message(&bye("a@x"), src, dst, ts, None, now);
        }

        assert_eq!(fresh.stats().calls_total, reused.stats().calls_total);
        assert_eq!(fresh.len(), reused.len());
        let fresh_call = fresh.get(&Arc::from("a@x")).unwrap();
        let reused_call = reused.get(&Arc::from("a@x")).unwrap();
        assert_eq!(fresh_call.state, reused_call.state);
        assert_eq!(fresh_call.messages.len(), reused_call.messages.len());
    }

    #[test]
    fn snapshot_sorted_orders_by_byte_count_descending() {
        let storage = Storage::new(&settings(0));
        let (src, dst) = addr();
        let now = Instant::now();
        let ts = Timestamp::new(0, 0, 0);
        storage.ingest_sip_message(&invite("small"), src, dst, ts, None, now);
        storage.ingest_sip_message(&invite("big"), src, dst, ts, None, now);
        storage.ingest_sip_message(&bye("big"), src, dst, ts, None, now);

        let sorted = storage.snapshot_sorted(&Filter::new(), &SortSpec { key: SortKey::ByteCount, ascending: false });
        assert_eq!(sorted[0].call_id.as_ref(), "big");
    }
}
