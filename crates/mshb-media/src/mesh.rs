use std::collections::HashMap;
use std::sync::Arc;

use mshb_shared::constants::MAX_MESH_PEERS;
use mshb_shared::types::UserId;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MediaError, Result};
use crate::signaling::SignalingSession;
use crate::transport::{PeerLink, PeerState};

/// What the UI sees for one remote participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub user_id: UserId,
    #[serde(serialize_with = "serialize_state")]
    pub state: PeerState,
    pub has_audio: bool,
}

fn serialize_state<S: serde::Serializer>(state: &PeerState, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(state.as_str())
}

pub struct PeerEntry {
    pub session: SignalingSession,
    pub link: Arc<dyn PeerLink>,
    pub info: PeerInfo,
}

/// Full mesh of peer connections for one voice channel.
pub struct MeshManager {
    local_user: UserId,
    peers: HashMap<UserId, PeerEntry>,
}

impl MeshManager {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            peers: HashMap::new(),
        }
    }

    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    pub fn add_peer(&mut self, user_id: UserId, link: Arc<dyn PeerLink>) -> Result<&mut PeerEntry> {
        if self.peers.len() >= MAX_MESH_PEERS {
            warn!(peer = %user_id.short(), "Mesh is full");
            return Err(MediaError::MaxPeersReached);
        }
        if self.peers.contains_key(&user_id) {
            return Err(MediaError::AlreadyConnected);
        }

        debug!(peer = %user_id.short(), "Adding peer to mesh");
        let entry = self.peers.entry(user_id).or_insert(PeerEntry {
            session: SignalingSession::new(self.local_user, user_id),
            link,
            info: PeerInfo {
                user_id,
                state: PeerState::Connecting,
                has_audio: false,
            },
        });
        Ok(entry)
    }

    /// Swap the link of an existing peer, returning the old one.
    pub fn replace_link(&mut self, user_id: &UserId, link: Arc<dyn PeerLink>) -> Result<Arc<dyn PeerLink>> {
        let entry = self
            .peers
            .get_mut(user_id)
            .ok_or(MediaError::PeerNotFound(*user_id))?;
        entry.info.state = PeerState::Connecting;
        entry.info.has_audio = false;
        Ok(std::mem::replace(&mut entry.link, link))
    }

    pub fn remove_peer(&mut self, user_id: &UserId) -> Option<PeerEntry> {
        let entry = self.peers.remove(user_id);
        if entry.is_some() {
            debug!(peer = %user_id.short(), "Removed peer from mesh");
        }
        entry
    }

    pub fn get_mut(&mut self, user_id: &UserId) -> Option<&mut PeerEntry> {
        self.peers.get_mut(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.peers.contains_key(user_id)
    }

    pub fn set_state(&mut self, user_id: &UserId, state: PeerState) -> Result<()> {
        let entry = self
            .peers
            .get_mut(user_id)
            .ok_or(MediaError::PeerNotFound(*user_id))?;
        if state == PeerState::Connected {
            entry.session.mark_connected();
        }
        entry.info.state = state;
        Ok(())
    }

    pub fn set_has_audio(&mut self, user_id: &UserId) {
        if let Some(entry) = self.peers.get_mut(user_id) {
            entry.info.has_audio = true;
        }
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self.peers.values().map(|e| e.info.clone()).collect();
        peers.sort_by_key(|p| p.user_id);
        peers
    }

    pub fn connected_peers(&self) -> Vec<UserId> {
        self.peers
            .values()
            .filter(|e| e.info.state == PeerState::Connected)
            .map(|e| e.info.user_id)
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Close and drop every link.
    pub async fn close_all(&mut self) {
        info!(peers = self.peers.len(), "Closing mesh");
        for (user_id, mut entry) in self.peers.drain() {
            entry.session.close();
            if let Err(e) = entry.link.close().await {
                warn!(peer = %user_id.short(), error = %e, "Failed to close peer link");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mshb_shared::protocol::IceCandidate;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct NullLink {
        closed: AtomicBool,
    }

    #[async_trait]
    impl PeerLink for NullLink {
        async fn create_offer(&self) -> Result<String> {
            Ok("offer".into())
        }
        async fn accept_offer(&self, _sdp: &str) -> Result<String> {
            Ok("answer".into())
        }
        async fn accept_answer(&self, _sdp: &str) -> Result<()> {
            Ok(())
        }
        async fn add_remote_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn add_and_remove() {
        let mut mesh = MeshManager::new(UserId::new());
        let peer = UserId::new();

        mesh.add_peer(peer, Arc::new(NullLink::default())).unwrap();
        assert!(mesh.contains(&peer));
        assert!(matches!(
            mesh.add_peer(peer, Arc::new(NullLink::default())),
            Err(MediaError::AlreadyConnected)
        ));

        assert!(mesh.remove_peer(&peer).is_some());
        assert!(mesh.remove_peer(&peer).is_none());
        assert_eq!(mesh.peer_count(), 0);
    }

    #[test]
    fn max_peers() {
        let mut mesh = MeshManager::new(UserId::new());
        for _ in 0..MAX_MESH_PEERS {
            mesh.add_peer(UserId::new(), Arc::new(NullLink::default())).unwrap();
        }
        assert!(matches!(
            mesh.add_peer(UserId::new(), Arc::new(NullLink::default())),
            Err(MediaError::MaxPeersReached)
        ));
    }

    #[test]
    fn connected_peers_tracks_state() {
        let mut mesh = MeshManager::new(UserId::new());
        let a = UserId::new();
        let b = UserId::new();
        mesh.add_peer(a, Arc::new(NullLink::default())).unwrap();
        mesh.add_peer(b, Arc::new(NullLink::default())).unwrap();

        mesh.set_state(&a, PeerState::Connected).unwrap();
        assert_eq!(mesh.connected_peers(), vec![a]);
        assert!(matches!(
            mesh.set_state(&UserId::new(), PeerState::Failed),
            Err(MediaError::PeerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_all_closes_links() {
        let mut mesh = MeshManager::new(UserId::new());
        let link = Arc::new(NullLink::default());
        mesh.add_peer(UserId::new(), link.clone()).unwrap();

        mesh.close_all().await;
        assert!(link.closed.load(Ordering::SeqCst));
        assert_eq!(mesh.peer_count(), 0);
    }

    #[test]
    fn peer_info_serializes_camel_case() {
        let info = PeerInfo {
            user_id: UserId::new(),
            state: PeerState::Connected,
            has_audio: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["hasAudio"], true);
    }
}
