use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Adapter is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, BusError>;
