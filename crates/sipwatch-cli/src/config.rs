//! TOML config file shape (`sipwatch.toml`-style), merged with CLI
//! overrides in `main.rs`. Not a design target of its own — spec.md §1
//! excludes UI-side config file parsing; this is only the ambient
//! mechanism needed to drive the library crates from a binary.

use serde::Deserialize;

use sipwatch_capture::CaptureSettings;
use sipwatch_storage::StorageSettings;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub capture: CaptureSettings,
    pub storage: StorageSettings,
}

impl FileConfig {
    pub fn load(path: &str) -> Result<Self, String> {
        let text = std::fs::read_to_string(path).map_err(|e| format!("reading {path}: {e}"))?;
        toml::from_str(&text).map_err(|e| format!("parsing {path}: {e}"))
    }
}
