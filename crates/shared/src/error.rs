use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame is too short to carry a payload")]
    Keepalive,
    #[error("connection config body is missing `{0}`")]
    MissingField(&'static str),
}
