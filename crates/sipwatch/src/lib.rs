//! Wires capture, dissection and storage into one handle and exposes the
//! Observer API external consumers are built against (spec.md §4.C15).
//! This crate owns no protocol logic of its own; it is plumbing.

mod error;
mod observer;
mod registry;

pub use error::SipwatchError;
pub use observer::{InputFailure, Observer, Subscription};
pub use sipwatch_capture::{CaptureError, CaptureOutput, CaptureSettings, InputId, InputSpec, ManagerState};
pub use sipwatch_storage::{Call, Filter, SortKey, SortSpec, StorageSettings, StorageStats};

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sipwatch_capture::{CaptureManager, Event};
use sipwatch_core::{Address, DissectorRegistry, Packet};
use sipwatch_storage::{IngestOutcome, Storage};

use observer::{Notification, ObserverHub};

#[cfg(feature = "tls")]
use sipwatch_transport::KeyLog;

/// Stats surfaced to external consumers: total calls tracked, calls
/// matching the current filter, and bytes currently retained.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stats {
    pub total: u64,
    pub displayed: u64,
    pub mem_bytes: u64,
}

struct Inner {
    registry: DissectorRegistry,
    storage: Storage,
    capture: CaptureManager,
    hub: ObserverHub,
    filter: RwLock<Filter>,
    sort: RwLock<SortSpec>,
    worker: RwLock<Option<JoinHandle<()>>>,
    #[cfg(feature = "tls")]
    keylog: Arc<KeyLog>,
}

/// The observer-API facade: one handle per running capture-to-storage
/// pipeline. Cheap to clone, like `CaptureManager`.
#[derive(Clone)]
pub struct Sipwatch {
    inner: Arc<Inner>,
}

impl Sipwatch {
    pub fn new(capture_settings: CaptureSettings, storage_settings: &StorageSettings) -> Self {
        #[cfg(feature = "tls")]
        let keylog = Arc::new(KeyLog::new());
        #[cfg(feature = "tls")]
        let registry = registry::build_registry_with_keylog(keylog.clone());
        #[cfg(not(feature = "tls"))]
        let registry = registry::build_registry();

        Self {
            inner: Arc::new(Inner {
                registry,
                storage: Storage::new(storage_settings),
                capture: CaptureManager::new(capture_settings),
                hub: ObserverHub::new(),
                filter: RwLock::new(Filter::new()),
                sort: RwLock::new(SortSpec::default()),
                worker: RwLock::new(None),
                #[cfg(feature = "tls")]
                keylog,
            }),
        }
    }

    /// Starts the capture manager and the dissection worker that
    /// consumes its event stream. Idempotent: calling this twice while
    /// already running is a no-op, matching `CaptureManager::start`.
    pub fn start(&self) {
        if self.inner.worker.read().is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel(1024);
        self.inner.capture.start(tx);

        let inner = self.inner.clone();
        let handle = tokio::spawn(run_worker(inner, rx));
        *self.inner.worker.write() = Some(handle);
    }

    pub async fn stop(&self) {
        self.inner.capture.stop().await;
        if let Some(handle) = self.inner.worker.write().take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub fn state(&self) -> ManagerState {
        self.inner.capture.state()
    }

    pub fn add_input(&self, spec: InputSpec) -> InputId {
        self.inner.capture.add_input(spec)
    }

    pub fn add_output(&self, output: Arc<dyn CaptureOutput>) {
        self.inner.capture.add_output(output);
    }

    pub fn pause(&self, paused: bool) {
        self.inner.capture.pause(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.capture.is_paused()
    }

    pub fn is_online(&self) -> bool {
        self.inner.capture.is_online()
    }

    pub fn load_progress(&self) -> Option<f64> {
        self.inner.capture.load_progress()
    }

    pub fn status_desc(&self) -> String {
        self.inner.capture.status_desc()
    }

    pub fn set_bpf_filter(&self, expr: &str) -> Result<(), SipwatchError> {
        self.inner.capture.set_bpf_filter(expr).map_err(SipwatchError::from)
    }

    /// Records the configured NSS key log path (surfaced via `keyfile()`
    /// for status display) and, when the `tls` feature is enabled, loads
    /// every `CLIENT_RANDOM` line from it immediately so already-captured
    /// connections can be decrypted retroactively. A file that cannot be
    /// read is logged and otherwise ignored: TLS decryption degrades to
    /// "nothing decrypts", not a fatal error for the whole capture.
    pub fn set_keyfile(&self, path: Option<String>) {
        #[cfg(feature = "tls")]
        self.load_keyfile(path.as_deref());
        self.inner.capture.set_keyfile(path);
    }

    /// Re-reads the currently configured key log file, picking up any
    /// `CLIENT_RANDOM` lines appended since it was last loaded. The NSS
    /// key log format only ever appends, so re-ingesting the whole file is
    /// cheap and safe to call from e.g. a periodic poll or a filesystem
    /// change notification the embedding application wires up itself.
    #[cfg(feature = "tls")]
    pub fn reload_keyfile(&self) {
        let path = self.inner.capture.keyfile();
        self.load_keyfile(path.as_deref());
    }

    #[cfg(feature = "tls")]
    fn load_keyfile(&self, path: Option<&str>) {
        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(contents) => self.inner.keylog.ingest_file(&contents),
                Err(err) => tracing::warn!(path, error = %err, "failed to read TLS key log file"),
            }
        }
    }

    pub fn set_memory_limit(&self, bytes: u64) {
        self.inner.storage.set_memory_limit(bytes);
    }

    pub fn set_sort(&self, key: SortKey, ascending: bool) {
        *self.inner.sort.write() = SortSpec { key, ascending };
    }

    pub fn set_filter(&self, filter: Filter) {
        *self.inner.filter.write() = filter;
    }

    pub fn calls_clear(&self) {
        self.inner.storage.calls_clear();
        self.inner.hub.notify(Notification::CallsCleared);
    }

    pub fn calls_clear_soft(&self) {
        let filter = self.inner.filter.read();
        self.inner.storage.calls_clear_soft(&filter);
        drop(filter);
        self.inner.hub.notify(Notification::CallsCleared);
    }

    /// Snapshot of calls matching the current filter, ordered by the
    /// current sort spec.
    pub fn snapshot(&self) -> Vec<Call> {
        let filter = self.inner.filter.read();
        let sort = self.inner.sort.read();
        self.inner.storage.snapshot_sorted(&filter, &sort)
    }

    pub fn get_stats(&self) -> Stats {
        let filter = self.inner.filter.read();
        let displayed = self.inner.storage.snapshot(&filter).len() as u64;
        drop(filter);
        Stats {
            total: self.inner.storage.stats().calls_total,
            displayed,
            mem_bytes: self.inner.storage.memory_used_bytes(),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        self.inner.hub.subscribe(observer)
    }
}

async fn run_worker(inner: Arc<Inner>, mut rx: mpsc::Receiver<Event>) {
    let unspecified = Address::new(std::net::Ipv4Addr::UNSPECIFIED.into(), 0);

    while let Some(event) = rx.recv().await {
        match event {
            Event::PacketReady {
                input: _,
                src_hint,
                dst_hint,
                unix_secs,
                unix_nanos,
                frame,
            } => {
                let (src, dst, start) = match (src_hint, dst_hint) {
                    (Some(src), Some(dst)) => (src, dst, sipwatch_codec_sip::ID_SIP),
                    _ => (unspecified, unspecified, sipwatch_transport::ID_ETHERNET),
                };

                let mut packet = Packet::new(src, dst, unix_secs, unix_nanos);
                inner.registry.run_chain(start, &mut packet, frame);

                let Some(message) = sipwatch_codec_sip::message_of(&packet) else {
                    inner.storage.record_decode_error();
                    continue;
                };
                let sdp = sipwatch_codec_sdp::sdp_of(&packet).cloned();
                let timestamp = packet.timestamp();
                let outcome = inner.storage.ingest_sip_message(message, packet.src(), packet.dst(), timestamp, sdp, Instant::now());

                if let IngestOutcome::Ingested { created } = outcome {
                    if let Some(call_id) = message.call_id() {
                        if let Some(entry) = inner.storage.get(&Arc::from(call_id)) {
                            let call = entry.value().clone();
                            let notification = if created { Notification::CallAdded(call) } else { Notification::CallChanged(call) };
                            inner.hub.notify(notification);
                        }
                    }
                }
            }
            Event::InputError(input, error) => {
                inner.hub.notify(Notification::InputFailed(InputFailure { input, message: error.to_string() }));
            }
            Event::InputReady(_) | Event::InputExhausted(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestAtomicU64;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        added: TestAtomicU64,
        last_call_id: Mutex<Option<String>>,
    }

    impl Observer for RecordingObserver {
        fn on_call_added(&self, call: &Call) {
            self.added.fetch_add(1, Ordering::Relaxed);
            *self.last_call_id.lock().unwrap() = Some(call.call_id.to_string());
        }
    }

    fn invite_frame() -> bytes::Bytes {
        let raw = "INVITE sip:bob@example.com SIP/2.0\r\nCall-ID: abc123\r\nFrom: <sip:alice@example.com>;tag=1\r\nTo: <sip:bob@example.com>\r\nCSeq: 1 INVITE\r\nContent-Length: 0\r\n\r\n";
        bytes::Bytes::from(raw.to_string())
    }

    #[tokio::test]
    async fn hep_sourced_invite_creates_a_call_and_notifies_observers() {
        let sipwatch = Sipwatch::new(CaptureSettings::default(), &StorageSettings::default());
        let observer = Arc::new(RecordingObserver::default());
        let _subscription = sipwatch.subscribe(observer.clone());

        // Simulate what the capture manager forwards for a HEP-sourced
        // packet (both endpoints resolved, no link-layer frame) by
        // feeding the worker loop directly rather than through a real
        // HEP listener socket.
        let src = Address::new("10.0.0.1".parse().unwrap(), 5060);
        let dst = Address::new("10.0.0.2".parse().unwrap(), 5060);
        let event = Event::PacketReady {
            input: InputId::next(),
            src_hint: Some(src),
            dst_hint: Some(dst),
            unix_secs: 0,
            unix_nanos: 0,
            frame: invite_frame(),
        };

        let (tx, rx) = mpsc::channel(1);
        tx.send(event).await.unwrap();
        drop(tx);
        run_worker(sipwatch.inner.clone(), rx).await;

        assert_eq!(observer.added.load(Ordering::Relaxed), 1);
        assert_eq!(observer.last_call_id.lock().unwrap().as_deref(), Some("abc123"));

        let stats = sipwatch.get_stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.displayed, 1);
    }
}
