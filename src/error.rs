use crate::relay::channel::Role;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum RelayError {
    #[error("Failed to bind {role} listener on port {port}: {source}")]
    Bind {
        role: Role,
        port: u16,
        source: std::io::Error,
    },

    #[error("Invalid frame length {0} (expected 1..={1})")]
    InvalidFrameLength(u32, usize),

    #[error("Truncated frame: peer closed mid-payload, expected {expected} bytes")]
    TruncatedFrame { expected: usize },

    #[error("Read timed out after {0} ms")]
    ReadTimeout(u64),

    #[error("Vision inference failed: {0}")]
    VisionInference(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    #[error(transparent)]
    HttpError(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
