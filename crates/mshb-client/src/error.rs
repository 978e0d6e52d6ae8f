use serde::{Serialize, Serializer};
use thiserror::Error;

use mshb_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Realtime(#[from] mshb_realtime::RealtimeError),

    #[error(transparent)]
    Media(#[from] mshb_media::MediaError),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("{0}")]
    Invalid(String),

    #[error("Already in a voice channel")]
    AlreadyInCall,

    #[error("Already joining a voice channel")]
    JoinInProgress,

    #[error("Not in a voice channel")]
    NotInCall,

    #[error("State lock poisoned")]
    LockPoisoned,

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl<T> From<std::sync::PoisonError<T>> for ClientError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ClientError::LockPoisoned
    }
}

/// The UI receives errors as plain messages.
impl Serialize for ClientError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_serialize_as_their_message() {
        let value = serde_json::to_value(ClientError::JoinInProgress).unwrap();
        assert_eq!(value, serde_json::json!("Already joining a voice channel"));

        let wrapped: Result<()> = Err(ClientError::Invalid("Not a voice channel".into()));
        let value = serde_json::to_value(wrapped.unwrap_err()).unwrap();
        assert_eq!(value, "Not a voice channel");
    }
}
