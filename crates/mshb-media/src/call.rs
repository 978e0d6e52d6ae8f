//! A voice call on one channel: a full mesh of peer links negotiated over
//! the channel's realtime broadcast topic.
//!
//! The engine runs in its own tokio task and owns the mesh. It multiplexes
//! three inputs: commands from the [`MeshCall`] handle, signaling messages
//! from the topic and events reported by the peer links.

use std::sync::Arc;

use mshb_realtime::{ChannelSender, RealtimeChannel, RealtimeEvent};
use mshb_shared::protocol::SignalMessage;
use mshb_shared::types::{ChannelId, UserId};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, Result};
use crate::mesh::{MeshManager, PeerInfo};
use crate::signaling::SignalingAction;
use crate::transport::{PeerConnector, PeerEvent, PeerState};

const COMMAND_CAPACITY: usize = 16;
const PEER_EVENT_CAPACITY: usize = 256;
const CALL_EVENT_CAPACITY: usize = 64;

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    PeerJoined(UserId),
    PeerStateChanged { user_id: UserId, state: PeerState },
    RemoteTrack { user_id: UserId, track_id: String },
    PeerLeft(UserId),
    Ended,
}

enum CallCommand {
    Peers(oneshot::Sender<Vec<PeerInfo>>),
    Leave(oneshot::Sender<()>),
}

/// Handle to a running call. Dropping it leaves the call.
pub struct MeshCall {
    local_user: UserId,
    channel_id: ChannelId,
    cmd_tx: mpsc::Sender<CallCommand>,
    events: broadcast::Sender<CallEvent>,
    task: Option<JoinHandle<()>>,
}

impl MeshCall {
    /// Join the mesh: offer to every participant already in `roster`, then
    /// keep negotiating with whoever signals us.
    pub async fn start(
        local_user: UserId,
        channel_id: ChannelId,
        channel: RealtimeChannel,
        connector: Arc<dyn PeerConnector>,
        roster: Vec<UserId>,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (peer_tx, peer_rx) = mpsc::channel(PEER_EVENT_CAPACITY);
        let (events, _) = broadcast::channel(CALL_EVENT_CAPACITY);

        let mut engine = CallEngine {
            local_user,
            signals: channel.sender(),
            connector,
            mesh: MeshManager::new(local_user),
            peer_tx,
            events: events.clone(),
        };

        info!(
            user = %local_user.short(),
            channel = %channel_id.short(),
            existing = roster.len(),
            "Joining voice mesh"
        );

        for remote in roster.into_iter().filter(|u| *u != local_user) {
            if let Err(e) = engine.offer_to(remote).await {
                warn!(peer = %remote.short(), error = %e, "Failed to offer to participant");
            }
        }

        let task = tokio::spawn(engine.run(channel, cmd_rx, peer_rx));

        Ok(Self {
            local_user,
            channel_id,
            cmd_tx,
            events,
            task: Some(task),
        })
    }

    pub fn local_user(&self) -> UserId {
        self.local_user
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Snapshot of every remote participant and its connection state.
    pub async fn peers(&self) -> Result<Vec<PeerInfo>> {
        self.handle().peers().await
    }

    /// Query handle that can be used without borrowing the call.
    pub fn handle(&self) -> CallHandle {
        CallHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Announce departure, close every link and stop the engine.
    pub async fn leave(mut self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(CallCommand::Leave(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Call task ended abnormally");
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct CallHandle {
    cmd_tx: mpsc::Sender<CallCommand>,
}

impl CallHandle {
    pub async fn peers(&self) -> Result<Vec<PeerInfo>> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(CallCommand::Peers(tx))
            .await
            .map_err(|_| MediaError::CallEnded)?;
        rx.await.map_err(|_| MediaError::CallEnded)
    }
}

struct CallEngine {
    local_user: UserId,
    signals: ChannelSender,
    connector: Arc<dyn PeerConnector>,
    mesh: MeshManager,
    peer_tx: mpsc::Sender<PeerEvent>,
    events: broadcast::Sender<CallEvent>,
}

impl CallEngine {
    async fn run(
        mut self,
        mut channel: RealtimeChannel,
        mut cmd_rx: mpsc::Receiver<CallCommand>,
        mut peer_rx: mpsc::Receiver<PeerEvent>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(CallCommand::Peers(reply)) => {
                        let _ = reply.send(self.mesh.peers());
                    }
                    Some(CallCommand::Leave(reply)) => {
                        self.shutdown(true).await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        debug!("Call handle dropped, leaving");
                        self.shutdown(true).await;
                        break;
                    }
                },

                event = channel.recv() => match event {
                    Some(RealtimeEvent::Broadcast { event, payload, .. }) => {
                        match SignalMessage::from_broadcast(&event, payload) {
                            Ok(signal) => {
                                if let Err(e) = self.on_signal(signal).await {
                                    warn!(event = %event, error = %e, "Failed to handle signal");
                                }
                            }
                            Err(e) => debug!(event = %event, error = %e, "Ignoring non-signaling broadcast"),
                        }
                    }
                    Some(_) => {}
                    None => {
                        warn!("Realtime hub closed, ending call");
                        self.shutdown(false).await;
                        break;
                    }
                },

                Some(event) = peer_rx.recv() => {
                    if let Err(e) = self.on_peer_event(event).await {
                        warn!(error = %e, "Failed to handle peer event");
                    }
                }
            }
        }

        channel.unsubscribe().await;
        let _ = self.events.send(CallEvent::Ended);
        info!(user = %self.local_user.short(), "Left voice mesh");
    }

    async fn offer_to(&mut self, remote: UserId) -> Result<()> {
        let link = self.connector.connect(remote, self.peer_tx.clone()).await?;
        if let Err(e) = self.mesh.add_peer(remote, link.clone()) {
            let _ = link.close().await;
            return Err(e);
        }
        let sdp = match link.create_offer().await {
            Ok(sdp) => sdp,
            Err(e) => {
                self.mesh.remove_peer(&remote);
                let _ = link.close().await;
                return Err(e);
            }
        };
        let offer = self
            .mesh
            .get_mut(&remote)
            .ok_or(MediaError::PeerNotFound(remote))?
            .session
            .create_offer(sdp);
        let _ = self.events.send(CallEvent::PeerJoined(remote));
        self.send(offer).await
    }

    async fn on_signal(&mut self, signal: SignalMessage) -> Result<()> {
        if !signal.is_addressed_to(&self.local_user) {
            return Ok(());
        }
        let remote = signal.sender();

        if !self.mesh.contains(&remote) {
            if !matches!(signal, SignalMessage::Offer(_)) {
                debug!(peer = %remote.short(), event = signal.event_name(), "Signal from unknown peer");
                return Ok(());
            }
            let link = self.connector.connect(remote, self.peer_tx.clone()).await?;
            if let Err(e) = self.mesh.add_peer(remote, link.clone()) {
                let _ = link.close().await;
                return Err(e);
            }
            let _ = self.events.send(CallEvent::PeerJoined(remote));
        }

        let entry = self
            .mesh
            .get_mut(&remote)
            .ok_or(MediaError::PeerNotFound(remote))?;
        let action = entry.session.handle_signal(&signal);
        let link = entry.link.clone();

        match action {
            SignalingAction::CreateAnswer { sdp, restart } => {
                let link = if restart {
                    let fresh = self.connector.connect(remote, self.peer_tx.clone()).await?;
                    let stale = self.mesh.replace_link(&remote, fresh.clone())?;
                    if let Err(e) = stale.close().await {
                        debug!(peer = %remote.short(), error = %e, "Closing superseded link failed");
                    }
                    fresh
                } else {
                    link
                };

                let answer_sdp = link.accept_offer(&sdp).await?;
                let entry = self
                    .mesh
                    .get_mut(&remote)
                    .ok_or(MediaError::PeerNotFound(remote))?;
                let pending = entry.session.remote_description_applied();
                let answer = entry.session.create_answer(answer_sdp);
                self.send(answer).await?;
                for candidate in pending {
                    link.add_remote_candidate(candidate).await?;
                }
            }
            SignalingAction::ApplyAnswer(sdp) => {
                link.accept_answer(&sdp).await?;
                let entry = self
                    .mesh
                    .get_mut(&remote)
                    .ok_or(MediaError::PeerNotFound(remote))?;
                for candidate in entry.session.remote_description_applied() {
                    link.add_remote_candidate(candidate).await?;
                }
            }
            SignalingAction::AddIceCandidate(candidate) => {
                link.add_remote_candidate(candidate).await?;
            }
            SignalingAction::Close => {
                self.drop_peer(&remote).await;
            }
            SignalingAction::Ignore => {}
        }
        Ok(())
    }

    async fn on_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::LocalCandidate { remote, candidate } => {
                let Some(entry) = self.mesh.get_mut(&remote) else {
                    return Ok(());
                };
                let msg = entry.session.local_candidate(candidate);
                self.send(msg).await?;
            }
            PeerEvent::StateChanged { remote, state } => {
                if !self.mesh.contains(&remote) || state == PeerState::Closed {
                    return Ok(());
                }
                debug!(peer = %remote.short(), ?state, "Peer state changed");
                if state == PeerState::Failed {
                    self.drop_peer(&remote).await;
                    return Ok(());
                }
                self.mesh.set_state(&remote, state)?;
                let _ = self.events.send(CallEvent::PeerStateChanged { user_id: remote, state });
            }
            PeerEvent::RemoteTrack { remote, track_id } => {
                self.mesh.set_has_audio(&remote);
                let _ = self.events.send(CallEvent::RemoteTrack {
                    user_id: remote,
                    track_id,
                });
            }
        }
        Ok(())
    }

    async fn drop_peer(&mut self, remote: &UserId) {
        if let Some(mut entry) = self.mesh.remove_peer(remote) {
            entry.session.close();
            if let Err(e) = entry.link.close().await {
                warn!(peer = %remote.short(), error = %e, "Failed to close peer link");
            }
            let _ = self.events.send(CallEvent::PeerLeft(*remote));
        }
    }

    async fn shutdown(&mut self, announce: bool) {
        if announce {
            if let Err(e) = self.send(SignalMessage::leave(self.local_user)).await {
                debug!(error = %e, "Leave announcement not delivered");
            }
        }
        self.mesh.close_all().await;
    }

    async fn send(&self, signal: SignalMessage) -> Result<()> {
        let (event, payload) = signal.to_broadcast()?;
        self.signals.send(event, payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mshb_realtime::spawn_hub;
    use mshb_shared::protocol::IceCandidate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::transport::PeerLink;

    /// Link that succeeds at everything and reports itself connected once
    /// both descriptions are set.
    struct FakeLink {
        local: UserId,
        remote: UserId,
        events: mpsc::Sender<PeerEvent>,
        candidates: Arc<Mutex<Vec<String>>>,
    }

    impl FakeLink {
        async fn connected(&self) {
            let _ = self
                .events
                .send(PeerEvent::LocalCandidate {
                    remote: self.remote,
                    candidate: IceCandidate::new(format!("candidate-from-{}", self.local)),
                })
                .await;
            let _ = self
                .events
                .send(PeerEvent::StateChanged {
                    remote: self.remote,
                    state: PeerState::Connected,
                })
                .await;
        }
    }

    #[async_trait]
    impl PeerLink for FakeLink {
        async fn create_offer(&self) -> Result<String> {
            Ok(format!("offer-from-{}", self.local))
        }
        async fn accept_offer(&self, _sdp: &str) -> Result<String> {
            self.connected().await;
            Ok(format!("answer-from-{}", self.local))
        }
        async fn accept_answer(&self, _sdp: &str) -> Result<()> {
            self.connected().await;
            Ok(())
        }
        async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
            self.candidates.lock().unwrap().push(candidate.candidate);
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct FakeConnector {
        local: UserId,
        connects: AtomicUsize,
        candidates: Arc<Mutex<Vec<String>>>,
    }

    impl FakeConnector {
        fn new(local: UserId) -> Arc<Self> {
            Arc::new(Self {
                local,
                connects: AtomicUsize::new(0),
                candidates: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    #[async_trait]
    impl PeerConnector for FakeConnector {
        async fn connect(&self, remote: UserId, events: mpsc::Sender<PeerEvent>) -> Result<Arc<dyn PeerLink>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeLink {
                local: self.local,
                remote,
                events,
                candidates: self.candidates.clone(),
            }))
        }
    }

    async fn wait_for_peers(call: &MeshCall, check: impl Fn(&[PeerInfo]) -> bool) -> Vec<PeerInfo> {
        for _ in 0..200 {
            let peers = call.peers().await.unwrap();
            if check(&peers) {
                return peers;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("peers never reached the expected state");
    }

    fn all_connected(peers: &[PeerInfo]) -> bool {
        !peers.is_empty() && peers.iter().all(|p| p.state == PeerState::Connected)
    }

    #[tokio::test]
    async fn joiner_offers_and_both_connect() {
        let hub = spawn_hub();
        let channel_id = ChannelId::new();
        let topic = channel_id.voice_topic();
        let alice = UserId::new();
        let bob = UserId::new();

        let alice_conn = FakeConnector::new(alice);
        let bob_conn = FakeConnector::new(bob);

        let alice_call = MeshCall::start(
            alice,
            channel_id,
            hub.channel(&topic, "alice").await.unwrap(),
            alice_conn.clone(),
            vec![alice],
        )
        .await
        .unwrap();

        let bob_call = MeshCall::start(
            bob,
            channel_id,
            hub.channel(&topic, "bob").await.unwrap(),
            bob_conn.clone(),
            vec![alice, bob],
        )
        .await
        .unwrap();

        let at_alice = wait_for_peers(&alice_call, all_connected).await;
        assert_eq!(at_alice[0].user_id, bob);
        let at_bob = wait_for_peers(&bob_call, all_connected).await;
        assert_eq!(at_bob[0].user_id, alice);

        // Each side applied the other's candidate.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(alice_conn
            .candidates
            .lock()
            .unwrap()
            .contains(&format!("candidate-from-{bob}")));
        assert!(bob_conn
            .candidates
            .lock()
            .unwrap()
            .contains(&format!("candidate-from-{alice}")));

        alice_call.leave().await.unwrap();
        bob_call.leave().await.unwrap();
    }

    #[tokio::test]
    async fn simultaneous_offers_resolve_to_one_connection() {
        let hub = spawn_hub();
        let channel_id = ChannelId::new();
        let topic = channel_id.voice_topic();
        let a = UserId::new();
        let b = UserId::new();
        let (low, high) = if a < b { (a, b) } else { (b, a) };

        let low_conn = FakeConnector::new(low);
        let high_conn = FakeConnector::new(high);

        // Subscribe both before either offers so the offers cross.
        let low_channel = hub.channel(&topic, "low").await.unwrap();
        let high_channel = hub.channel(&topic, "high").await.unwrap();

        let low_call = MeshCall::start(low, channel_id, low_channel, low_conn.clone(), vec![low, high])
            .await
            .unwrap();
        let high_call = MeshCall::start(high, channel_id, high_channel, high_conn.clone(), vec![low, high])
            .await
            .unwrap();

        wait_for_peers(&low_call, all_connected).await;
        wait_for_peers(&high_call, all_connected).await;

        // The polite side replaced its link, the other kept its own.
        assert_eq!(low_conn.connects.load(Ordering::SeqCst), 2);
        assert_eq!(high_conn.connects.load(Ordering::SeqCst), 1);
        assert_eq!(low_call.peers().await.unwrap().len(), 1);
        assert_eq!(high_call.peers().await.unwrap().len(), 1);

        low_call.leave().await.unwrap();
        high_call.leave().await.unwrap();
    }

    #[tokio::test]
    async fn leave_removes_peer_on_the_other_side() {
        let hub = spawn_hub();
        let channel_id = ChannelId::new();
        let topic = channel_id.voice_topic();
        let alice = UserId::new();
        let bob = UserId::new();

        let alice_call = MeshCall::start(
            alice,
            channel_id,
            hub.channel(&topic, "alice").await.unwrap(),
            FakeConnector::new(alice),
            vec![],
        )
        .await
        .unwrap();
        let mut alice_events = alice_call.subscribe();

        let bob_call = MeshCall::start(
            bob,
            channel_id,
            hub.channel(&topic, "bob").await.unwrap(),
            FakeConnector::new(bob),
            vec![alice],
        )
        .await
        .unwrap();

        wait_for_peers(&alice_call, all_connected).await;
        bob_call.leave().await.unwrap();
        wait_for_peers(&alice_call, |p| p.is_empty()).await;

        let mut saw_left = false;
        while let Ok(event) = alice_events.try_recv() {
            if event == CallEvent::PeerLeft(bob) {
                saw_left = true;
            }
        }
        assert!(saw_left);

        alice_call.leave().await.unwrap();
    }

    #[tokio::test]
    async fn signals_for_other_users_are_ignored() {
        let hub = spawn_hub();
        let channel_id = ChannelId::new();
        let topic = channel_id.voice_topic();
        let alice = UserId::new();
        let connector = FakeConnector::new(alice);

        let alice_call = MeshCall::start(
            alice,
            channel_id,
            hub.channel(&topic, "alice").await.unwrap(),
            connector.clone(),
            vec![],
        )
        .await
        .unwrap();

        let outsider = hub.channel(&topic, "outsider").await.unwrap();
        let (event, payload) = SignalMessage::offer(UserId::new(), UserId::new(), "sdp".into())
            .to_broadcast()
            .unwrap();
        outsider.send(event, payload).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(alice_call.peers().await.unwrap().is_empty());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);

        alice_call.leave().await.unwrap();
    }
    /// Link whose offer can never be created.
    struct BrokenLink {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeerLink for BrokenLink {
        async fn create_offer(&self) -> Result<String> {
            Err(MediaError::WebRtc("no codecs".into()))
        }
        async fn accept_offer(&self, _sdp: &str) -> Result<String> {
            Err(MediaError::WebRtc("no codecs".into()))
        }
        async fn accept_answer(&self, _sdp: &str) -> Result<()> {
            Ok(())
        }
        async fn add_remote_candidate(&self, _candidate: IceCandidate) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenConnector {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeerConnector for BrokenConnector {
        async fn connect(&self, _remote: UserId, _events: mpsc::Sender<PeerEvent>) -> Result<Arc<dyn PeerLink>> {
            Ok(Arc::new(BrokenLink {
                closed: self.closed.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn failed_offer_drops_the_peer() {
        let hub = spawn_hub();
        let channel_id = ChannelId::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let closed = Arc::new(AtomicUsize::new(0));

        let alice_call = MeshCall::start(
            alice,
            channel_id,
            hub.channel(&channel_id.voice_topic(), "alice").await.unwrap(),
            Arc::new(BrokenConnector { closed: closed.clone() }),
            vec![bob],
        )
        .await
        .unwrap();

        assert!(alice_call.peers().await.unwrap().is_empty());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        alice_call.leave().await.unwrap();
    }
}
