use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open input {name}: {reason}")]
    InputOpen { name: String, reason: String },

    #[error("invalid BPF filter expression: {0}")]
    FilterRejected(String),

    #[error("invalid capture configuration: {0}")]
    Config(String),
}
