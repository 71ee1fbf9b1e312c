use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid filter expression: {0}")]
    FilterParse(String),

    #[error("memory limit must be greater than zero")]
    InvalidMemoryLimit,

    #[error("invalid match expression: {0}")]
    MatchExpressionParse(String),
}
