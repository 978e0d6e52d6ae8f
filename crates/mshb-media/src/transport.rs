//! The seam between the call engine and an actual peer connection stack.

use std::sync::Arc;

use async_trait::async_trait;
use mshb_shared::protocol::IceCandidate;
use mshb_shared::types::UserId;
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

/// Reported by a link on the channel handed to [`PeerConnector::connect`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    LocalCandidate { remote: UserId, candidate: IceCandidate },
    StateChanged { remote: UserId, state: PeerState },
    RemoteTrack { remote: UserId, track_id: String },
}

/// One connection to one remote participant.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer and set it as the local description.
    async fn create_offer(&self) -> Result<String>;

    /// Apply a remote offer and return the local answer.
    async fn accept_offer(&self, sdp: &str) -> Result<String>;

    async fn accept_answer(&self, sdp: &str) -> Result<()>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, remote: UserId, events: mpsc::Sender<PeerEvent>) -> Result<Arc<dyn PeerLink>>;
}
