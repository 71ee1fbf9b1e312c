//! Storage configuration, loaded from the workspace TOML config file and
//! overridable at runtime via [`crate::storage::Storage::set_memory_limit`].

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Soft cap on bytes retained across all terminal calls; `0` disables
    /// eviction entirely. Calls still in progress are never evicted.
    pub memory_limit_bytes: u64,
    /// When set, only messages not an INVITE for a call storage hasn't
    /// seen yet are dropped instead of starting a new call — i.e. only
    /// dialogs that began with an INVITE are tracked.
    pub capture_dialogs_only: bool,
    /// Regex evaluated against each message's raw payload; when set, a
    /// message is ingested only if it matches (or does not match, when
    /// `match_invert` is set).
    pub match_expression: Option<String>,
    pub match_invert: bool,
    /// When set, `Storage::snapshot` excludes calls that have not yet
    /// reached a terminal state.
    pub match_complete_only: bool,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 256 * 1024 * 1024,
            capture_dialogs_only: false,
            match_expression: None,
            match_invert: false,
            match_complete_only: false,
        }
    }
}
