//! Aggregate counters surfaced by `Storage::stats`.

/// A point-in-time snapshot of storage-wide counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StorageStats {
    pub calls_total: u64,
    pub calls_active: u64,
    pub calls_terminal: u64,
    pub calls_evicted: u64,
    pub packets_indexed: u64,
    pub bytes_indexed: u64,
    pub decode_errors: u64,
}

impl StorageStats {
    pub fn new() -> Self {
        Self::default()
    }
}
