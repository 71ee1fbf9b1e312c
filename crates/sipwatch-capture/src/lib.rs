//! Capture inputs (live device, trace file, HEP v3 listener), capture
//! outputs (pcap trace file, HEP re-encapsulation), and the capture
//! manager event loop tying them together (spec.md §4.C8, C9, C10).

pub mod config;
pub mod error;
pub mod event;
pub mod hep;
pub mod input;
pub mod manager;
pub mod output;

pub use config::{CaptureSettings, PauseMode};
pub use error::CaptureError;
pub use event::Event;
pub use input::{InputId, InputMode, InputProgress, InputSpec, InputStatus};
pub use manager::{CaptureManager, ManagerState};
pub use output::{CaptureOutput, HepOutput, PcapFileOutput};
