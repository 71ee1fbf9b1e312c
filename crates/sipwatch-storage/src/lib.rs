//! Call state machine, call-group resolution, concurrent indexed storage
//! and the filter engine used to query it.

pub mod call;
pub mod call_group;
pub mod config;
pub mod error;
pub mod filter;
pub mod message;
pub mod stats;
pub mod storage;
pub mod xcalls;

pub use call::{Call, CallState, MediaSummary};
pub use call_group::CallGroup;
pub use config::StorageSettings;
pub use error::StorageError;
pub use filter::{Attribute, Filter, Predicate};
pub use message::StoredMessage;
pub use stats::StorageStats;
pub use storage::{IngestOutcome, SortKey, SortSpec, Storage};
