use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame does not match its declared type: {0}")]
    Shape(#[source] serde_json::Error),
    #[error("roster content is not a JSON user list: {0}")]
    RosterContent(#[source] serde_json::Error),
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[source] serde_json::Error),
}
