use thiserror::Error;

use sipwatch_capture::CaptureError;
use sipwatch_storage::StorageError;

/// Top-level error, mirroring each wired crate's own error enum per its
/// `From` conversion rather than re-deriving the variants here.
#[derive(Debug, Error)]
pub enum SipwatchError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
