use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The hub task is gone (shut down or panicked).
    #[error("Realtime hub is closed")]
    HubClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
