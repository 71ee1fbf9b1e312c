//! Capture input sources: a live device, an offline trace file, or a HEP
//! v3 listener. Each spawns its own adapter task that forwards
//! [`Event`]s to the capture manager's worker loop.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::Sender;

use crate::config::CaptureSettings;
use crate::error::CaptureError;
use crate::event::Event;
use crate::hep;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct InputId(u32);

static NEXT_INPUT_ID: AtomicU32 = AtomicU32::new(1);

impl InputId {
    pub fn next() -> Self {
        Self(NEXT_INPUT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// Configuration for one capture source.
pub enum InputSpec {
    LiveDevice { name: String, bpf_filter: Option<String> },
    TraceFile { path: String, bpf_filter: Option<String> },
    HepListener { addr: String, secret: Option<String> },
}

impl InputSpec {
    pub fn mode(&self) -> InputMode {
        match self {
            Self::TraceFile { .. } => InputMode::Offline,
            Self::LiveDevice { .. } | Self::HepListener { .. } => InputMode::Online,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::LiveDevice { name, .. } => name,
            Self::TraceFile { path, .. } => path,
            Self::HepListener { addr, .. } => addr,
        }
    }

    /// Whether frames from this input carry a genuine link-layer frame
    /// (live device, trace file) as opposed to a synthesized one recovered
    /// from a HEP payload with no link-layer bytes of its own.
    pub fn is_link_layer_framed(&self) -> bool {
        !matches!(self, Self::HepListener { .. })
    }

    /// Fills in `filter` as this input's BPF expression if it wasn't
    /// given one of its own. Used to apply the manager's default filter
    /// (`CaptureManager::set_bpf_filter`) to inputs spawned after it.
    pub fn or_default_bpf_filter(mut self, filter: &Option<String>) -> Self {
        match &mut self {
            Self::LiveDevice { bpf_filter, .. } | Self::TraceFile { bpf_filter, .. } => {
                if bpf_filter.is_none() {
                    *bpf_filter = filter.clone();
                }
            }
            Self::HepListener { .. } => {}
        }
        self
    }
}

/// Per-input `{mode, total_size, loaded_size}` bookkeeping (spec.md
/// §4.C8), shared between the adapter task (writer) and the manager
/// (reader) so `load_progress` never needs to ask the adapter directly.
#[derive(Default)]
pub struct InputProgress {
    pub loaded_bytes: AtomicU64,
    pub total_bytes: AtomicU64,
}

impl InputProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Running state of one input, reported through `CaptureManager::status`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputMode {
    Online,
    Offline,
}

/// Running state of one input, reported through `CaptureManager::status`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputStatus {
    Loading,
    Online,
    Exhausted,
    Failed,
}

fn now_unix() -> (i64, u32) {
    let since_epoch = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    (since_epoch.as_secs() as i64, since_epoch.subsec_nanos())
}

/// Spawns the adapter task for `spec`, tagging its events with `id`
/// (reserved by the caller up front so it can be recorded before the
/// task actually starts running) and returning the shared progress
/// counters the manager polls for `load_progress`. The task runs until
/// the source is exhausted (trace file EOF) or fails to open.
pub fn spawn(id: InputId, spec: InputSpec, settings: Arc<CaptureSettings>, sender: Sender<Event>) -> Arc<InputProgress> {
    let progress = InputProgress::new();
    match spec {
        InputSpec::LiveDevice { name, bpf_filter } => {
            tokio::task::spawn_blocking(move || run_pcap_live(id, name, bpf_filter, sender));
        }
        InputSpec::TraceFile { path, bpf_filter } => {
            let limit = settings.offline_limit_bytes;
            let progress = progress.clone();
            tokio::task::spawn_blocking(move || run_pcap_offline(id, path, bpf_filter, limit, sender, progress));
        }
        InputSpec::HepListener { addr, secret } => {
            tokio::spawn(run_hep_listener(id, addr, secret, sender));
        }
    }
    progress
}

fn run_pcap_live(id: InputId, device: String, bpf_filter: Option<String>, sender: Sender<Event>) {
    let capture = pcap::Capture::from_device(device.as_str())
        .and_then(|c| c.promisc(true).timeout(1000).open());

    let mut capture = match capture {
        Ok(c) => c,
        Err(e) => {
            let _ = sender.blocking_send(Event::InputError(id, CaptureError::InputOpen { name: device, reason: e.to_string() }));
            return;
        }
    };

    if let Some(filter) = &bpf_filter {
        if let Err(e) = capture.filter(filter, true) {
            let _ = sender.blocking_send(Event::InputError(id, CaptureError::FilterRejected(e.to_string())));
            return;
        }
    }

    let _ = sender.blocking_send(Event::InputReady(id));
    loop {
        match capture.next_packet() {
            Ok(packet) => {
                let frame = Bytes::copy_from_slice(packet.data);
                let (unix_secs, unix_nanos) = (packet.header.ts.tv_sec as i64, (packet.header.ts.tv_usec as u32).saturating_mul(1000));
                if sender
                    .blocking_send(Event::PacketReady {
                        input: id,
                        src_hint: None,
                        dst_hint: None,
                        unix_secs,
                        unix_nanos,
                        frame,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(_) => {
                let _ = sender.blocking_send(Event::InputExhausted(id));
                return;
            }
        }
    }
}

fn run_pcap_offline(id: InputId, path: String, bpf_filter: Option<String>, limit_bytes: u64, sender: Sender<Event>, progress: Arc<InputProgress>) {
    let total_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    progress.total_bytes.store(total_bytes, Ordering::Relaxed);

    let capture = pcap::Capture::from_file(&path);
    let mut capture = match capture {
        Ok(c) => c,
        Err(e) => {
            let _ = sender.blocking_send(Event::InputError(id, CaptureError::InputOpen { name: path, reason: e.to_string() }));
            return;
        }
    };

    if let Some(filter) = &bpf_filter {
        if let Err(e) = capture.filter(filter, true) {
            let _ = sender.blocking_send(Event::InputError(id, CaptureError::FilterRejected(e.to_string())));
            return;
        }
    }

    let _ = sender.blocking_send(Event::InputReady(id));
    let mut loaded_bytes: u64 = 0;
    loop {
        if limit_bytes != 0 && loaded_bytes >= limit_bytes {
            let _ = sender.blocking_send(Event::InputExhausted(id));
            return;
        }
        match capture.next_packet() {
            Ok(packet) => {
                loaded_bytes += packet.data.len() as u64;
                progress.loaded_bytes.store(loaded_bytes, Ordering::Relaxed);
                let frame = Bytes::copy_from_slice(packet.data);
                let (unix_secs, unix_nanos) = (packet.header.ts.tv_sec as i64, (packet.header.ts.tv_usec as u32).saturating_mul(1000));
                if sender
                    .blocking_send(Event::PacketReady {
                        input: id,
                        src_hint: None,
                        dst_hint: None,
                        unix_secs,
                        unix_nanos,
                        frame,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(_) => {
                let _ = sender.blocking_send(Event::InputExhausted(id));
                return;
            }
        }
    }
}

async fn run_hep_listener(id: InputId, addr: String, secret: Option<String>, sender: Sender<Event>) {
    let socket = match tokio::net::UdpSocket::bind(&addr).await {
        Ok(s) => s,
        Err(e) => {
            let _ = sender.send(Event::InputError(id, CaptureError::InputOpen { name: addr, reason: e.to_string() })).await;
            return;
        }
    };

    let _ = sender.send(Event::InputReady(id)).await;
    let mut buf = vec![0u8; 65536];
    loop {
        let (len, _peer) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(_) => {
                let _ = sender.send(Event::InputExhausted(id)).await;
                return;
            }
        };

        match hep::decode(&buf[..len], secret.as_deref()) {
            Ok(decoded) => {
                let (unix_secs, unix_nanos) = decoded.timestamp.unwrap_or_else(now_unix);
                let _ = sender
                    .send(Event::PacketReady {
                        input: id,
                        src_hint: Some(decoded.src),
                        dst_hint: Some(decoded.dst),
                        unix_secs,
                        unix_nanos,
                        frame: decoded.payload,
                    })
                    .await;
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping unauthenticated or malformed HEP message");
            }
        }
    }
}
