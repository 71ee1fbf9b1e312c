//! The capture manager (spec.md §4.C10): owns the ordered list of inputs
//! and outputs, runs one dedicated worker task as the event loop, and
//! exposes the control surface (pause, filter, keyfile, add/remove) that
//! is safe to call from any thread while the worker is running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{CaptureSettings, PauseMode};
use crate::error::CaptureError;
use crate::event::Event;
use crate::input::{self, InputId, InputMode, InputProgress, InputSpec, InputStatus};
use crate::output::CaptureOutput;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManagerState {
    Idle,
    Running,
    Stopped,
}

struct InputRecord {
    mode: InputMode,
    label: String,
    is_link_layer_framed: bool,
    status: InputStatus,
    progress: Arc<InputProgress>,
    bpf_filter: Option<String>,
}

struct Inner {
    settings: RwLock<CaptureSettings>,
    state: RwLock<ManagerState>,
    inputs: RwLock<HashMap<InputId, InputRecord>>,
    outputs: RwLock<Vec<Arc<dyn CaptureOutput>>>,
    paused: AtomicBool,
    keyfile: RwLock<Option<String>>,
    worker: RwLock<Option<JoinHandle<()>>>,
    /// Specs queued via `add_input` before `start`, or added to the
    /// already-running worker through `worker_tx`. Each carries the
    /// `InputId` already handed back to the caller from `add_input`.
    pending_inputs: RwLock<Vec<(InputId, InputSpec)>>,
    worker_tx: RwLock<Option<mpsc::Sender<Event>>>,
}

/// Owns capture inputs/outputs and the event loop that ties them
/// together. Cheap to clone: every instance shares the same inner state,
/// matching spec.md §4.C10's "not a hard singleton, but passed
/// explicitly" framing.
#[derive(Clone)]
pub struct CaptureManager {
    inner: Arc<Inner>,
}

impl CaptureManager {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings: RwLock::new(settings),
                state: RwLock::new(ManagerState::Idle),
                inputs: RwLock::new(HashMap::new()),
                outputs: RwLock::new(Vec::new()),
                paused: AtomicBool::new(false),
                keyfile: RwLock::new(None),
                worker: RwLock::new(None),
                pending_inputs: RwLock::new(Vec::new()),
                worker_tx: RwLock::new(None),
            }),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.inner.state.read()
    }

    /// Registers an input and returns the id it will tag its events with.
    /// Before `start`, it is queued and spawned once the worker comes up;
    /// after `start`, it is spawned immediately. Either way the id is
    /// reserved and returned synchronously.
    pub fn add_input(&self, spec: InputSpec) -> InputId {
        let id = InputId::next();
        if *self.inner.state.read() == ManagerState::Running {
            let tx = self.inner.worker_tx.read().clone();
            if let Some(tx) = tx {
                self.spawn_input(id, spec, tx);
                return id;
            }
        }
        self.inner.pending_inputs.write().push((id, spec));
        id
    }

    pub fn add_output(&self, output: Arc<dyn CaptureOutput>) {
        self.inner.outputs.write().push(output);
    }

    fn spawn_input(&self, id: InputId, spec: InputSpec, tx: mpsc::Sender<Event>) {
        let settings = Arc::new(self.inner.settings.read().clone());
        let spec = spec.or_default_bpf_filter(&settings.bpf_filter);
        let mode = spec.mode();
        let label = spec.label().to_string();
        let is_link_layer_framed = spec.is_link_layer_framed();
        let progress = input::spawn(id, spec, settings, tx);
        self.inner.inputs.write().insert(
            id,
            InputRecord {
                mode,
                label,
                is_link_layer_framed,
                status: InputStatus::Loading,
                progress,
                bpf_filter: None,
            },
        );
    }

    /// Creates the worker and spawns every queued input. `downstream` is
    /// where dissected-ready `Event::PacketReady` frames are forwarded
    /// for whoever runs the actual dissection (the facade crate);
    /// `Event::InputReady`/`InputExhausted`/`InputError` are forwarded
    /// there too so external observers can track input lifecycle.
    pub fn start(&self, downstream: mpsc::Sender<Event>) {
        let mut state = self.inner.state.write();
        if *state == ManagerState::Running {
            return;
        }
        *state = ManagerState::Running;
        drop(state);

        let (worker_tx, mut worker_rx) = mpsc::channel(1024);
        *self.inner.worker_tx.write() = Some(worker_tx.clone());

        for (id, spec) in self.inner.pending_inputs.write().drain(..).collect::<Vec<_>>() {
            self.spawn_input(id, spec, worker_tx.clone());
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = worker_rx.recv().await {
                match &event {
                    Event::InputReady(id) => {
                        if let Some(record) = inner.inputs.write().get_mut(id) {
                            record.status = InputStatus::Online;
                        }
                        let _ = downstream.send(event).await;
                    }
                    Event::InputExhausted(id) => {
                        if let Some(record) = inner.inputs.write().get_mut(id) {
                            record.status = InputStatus::Exhausted;
                        }
                        let _ = downstream.send(event).await;
                    }
                    Event::InputError(id, _) => {
                        if let Some(record) = inner.inputs.write().get_mut(id) {
                            record.status = InputStatus::Failed;
                        }
                        let _ = downstream.send(event).await;
                    }
                    Event::PacketReady {
                        input,
                        src_hint,
                        dst_hint,
                        unix_secs,
                        unix_nanos,
                        frame,
                    } => {
                        let drop_while_paused = inner.paused.load(Ordering::Relaxed) && inner.settings.read().pause_mode == PauseMode::DropIncoming;
                        if drop_while_paused {
                            continue;
                        }

                        let link_layer_framed = inner.inputs.read().get(input).map(|r| r.is_link_layer_framed).unwrap_or(true);
                        let outputs = inner.outputs.read();
                        if link_layer_framed {
                            for output in outputs.iter() {
                                output.write_raw_frame(*unix_secs, *unix_nanos, frame);
                            }
                        }
                        if let (Some(src), Some(dst)) = (src_hint, dst_hint) {
                            for output in outputs.iter() {
                                output.write_payload(*src, *dst, *unix_secs, *unix_nanos, frame);
                            }
                        }
                        drop(outputs);

                        if downstream.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        *self.inner.worker.write() = Some(handle);
    }

    /// Destroys every input's event source, closes every output, quits
    /// the loop and joins the worker. After this returns, no dissected
    /// packet reaches storage, per spec.md §4.C10's invariant.
    pub async fn stop(&self) {
        *self.inner.state.write() = ManagerState::Stopped;
        self.inner.worker_tx.write().take();
        self.inner.inputs.write().clear();
        self.inner.outputs.write().clear();
        if let Some(handle) = self.inner.worker.write().take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub fn pause(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Relaxed)
    }

    pub fn is_online(&self) -> bool {
        self.inner.inputs.read().values().any(|r| r.status == InputStatus::Online)
    }

    /// `(Σ loaded) / (Σ total) × 100` over offline inputs; `None` ("unknown")
    /// if `Σ total = 0`.
    pub fn load_progress(&self) -> Option<f64> {
        let inputs = self.inner.inputs.read();
        let mut loaded = 0u64;
        let mut total = 0u64;
        for record in inputs.values().filter(|r| r.mode == InputMode::Offline) {
            loaded += record.progress.loaded_bytes.load(Ordering::Relaxed);
            total += record.progress.total_bytes.load(Ordering::Relaxed);
        }
        if total == 0 {
            None
        } else {
            Some(loaded as f64 / total as f64 * 100.0)
        }
    }

    /// A short human-readable summary of input modes and loading/paused
    /// state, matching spec.md §4.C10's `status_desc`.
    pub fn status_desc(&self) -> String {
        let inputs = self.inner.inputs.read();
        if inputs.is_empty() {
            return "idle: no inputs".to_string();
        }
        let online = inputs.values().filter(|r| r.status == InputStatus::Online).count();
        let loading = inputs.values().filter(|r| r.status == InputStatus::Loading).count();
        let exhausted = inputs.values().filter(|r| r.status == InputStatus::Exhausted).count();
        let failed = inputs.values().filter(|r| r.status == InputStatus::Failed).count();
        let pause_note = if self.is_paused() { ", paused" } else { "" };
        format!("{online} online, {loading} loading, {exhausted} exhausted, {failed} failed{pause_note}")
    }

    /// Validates `expr` as a BPF expression and, on success, records it
    /// as the default filter for every input spawned from now on that
    /// doesn't carry its own. On rejection the previous filter (if any)
    /// is left intact, per spec.md §7's `FilterParse` handling.
    ///
    /// Already-running inputs keep whichever filter they were opened
    /// with: applying a new filter to a live `pcap` handle mid-capture
    /// requires access each adapter task owns exclusively, so this can't
    /// be a true rollback across existing inputs, only a validated
    /// default for ones spawned hereafter.
    pub fn set_bpf_filter(&self, expr: &str) -> Result<(), CaptureError> {
        pcap::Capture::dead(pcap::Linktype::ETHERNET)
            .and_then(|dead| dead.compile(expr, true))
            .map_err(|e| CaptureError::FilterRejected(e.to_string()))?;
        self.inner.settings.write().bpf_filter = Some(expr.to_string());
        Ok(())
    }

    pub fn set_keyfile(&self, path: Option<String>) {
        *self.inner.keyfile.write() = path;
    }

    pub fn keyfile(&self) -> Option<String> {
        self.inner.keyfile.read().clone()
    }

    pub fn set_hep_secret(&self, secret: Option<String>) {
        self.inner.settings.write().hep_secret = secret;
    }
}
