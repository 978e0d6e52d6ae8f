use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid invite code")]
    InvalidInviteCode,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
