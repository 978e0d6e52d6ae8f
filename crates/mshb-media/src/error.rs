use mshb_shared::types::UserId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(UserId),

    #[error("Already connected to peer")]
    AlreadyConnected,

    #[error("Max peers reached")]
    MaxPeersReached,

    #[error("Call has ended")]
    CallEnded,

    #[error(transparent)]
    Realtime(#[from] mshb_realtime::RealtimeError),

    #[error(transparent)]
    Protocol(#[from] mshb_shared::SharedError),

    #[error(transparent)]
    Audio(#[from] crate::audio::AudioError),
}

impl From<webrtc::Error> for MediaError {
    fn from(e: webrtc::Error) -> Self {
        MediaError::WebRtc(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
