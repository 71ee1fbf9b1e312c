use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdpParseError {
    #[error("malformed connection line: {0}")]
    MalformedConnection(String),

    #[error("malformed media line: {0}")]
    MalformedMedia(String),

    #[error("malformed attribute line: {0}")]
    MalformedAttribute(String),
}
