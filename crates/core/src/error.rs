use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("invalid job status: {0}")]
    InvalidStatus(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
