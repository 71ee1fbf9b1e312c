//! Capture configuration, loaded from the workspace TOML config file.

use serde::Deserialize;

/// How `CaptureManager::set_pause` behaves while paused.
///
/// `StatusOnly` is the default and matches the observed behavior of the
/// system this design is distilled from: pausing only changes what the
/// status line reports, it never stops packets from being dissected and
/// indexed. `DropIncoming` is an explicit opt-in for operators who want
/// pause to actually stop ingest.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PauseMode {
    #[default]
    StatusOnly,
    DropIncoming,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub pause_mode: PauseMode,
    /// Caps bytes read from an offline trace file; `0` means unlimited.
    pub offline_limit_bytes: u64,
    /// Shared secret gating inbound HEP messages; `None` accepts all HEP
    /// traffic without authentication.
    pub hep_secret: Option<String>,
    pub hep_listen_addr: String,
    /// BPF expression applied to every input spawned from now on that
    /// doesn't already carry its own filter. Set via
    /// `CaptureManager::set_bpf_filter`; already-running inputs keep
    /// whichever filter they were opened with.
    #[serde(skip)]
    pub bpf_filter: Option<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            pause_mode: PauseMode::default(),
            offline_limit_bytes: 0,
            hep_secret: None,
            hep_listen_addr: "0.0.0.0:9060".to_string(),
            bpf_filter: None,
        }
    }
}
