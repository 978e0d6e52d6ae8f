use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mshb_media::audio::{AudioConfig, MicrophoneControls, MicrophoneStream};
use mshb_media::mixer::PlaybackMixer;
use mshb_media::webrtc_peer::{spawn_audio_pump, RemoteAudio, WebRtcConnector};
use mshb_media::{CallEvent, MeshCall, PeerInfo, PeerState};
use mshb_realtime::RealtimeChannel;
use mshb_shared::types::{ChannelId, ChannelKind, UserId};
use mshb_store::{MessageTarget, Profile, VoiceParticipant};

use crate::error::{ClientError, Result};
use crate::events::{emit_event, CallStatePayload, ClientEvent};
use crate::platform::Platform;
use crate::state::{signed_in, SharedState, VoiceSession};

const REMOTE_AUDIO_QUEUE: usize = 256;
const PLAYBACK_QUEUE: usize = 50;

/// Outcome of [`join_voice`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum VoiceJoin {
    #[serde(rename_all = "camelCase")]
    Joined {
        channel_id: ChannelId,
        participants: Vec<VoiceParticipant>,
    },
    /// No microphone could be opened; nothing was joined.
    MicrophoneUnavailable { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParticipantDto {
    pub participant: VoiceParticipant,
    pub profile: Profile,
}

/// The client's single join slot. Held for the whole of [`join_voice`] so a
/// second join cannot touch the participant row or the signaling topic
/// while the first is still connecting.
struct JoinSlot<'a>(&'a SharedState);

impl<'a> JoinSlot<'a> {
    fn claim(state: &'a SharedState) -> Result<Self> {
        let mut guard = state.lock()?;
        if guard.voice_joining {
            return Err(ClientError::JoinInProgress);
        }
        guard.voice_joining = true;
        Ok(Self(state))
    }
}

impl Drop for JoinSlot<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.0.lock() {
            guard.voice_joining = false;
        }
    }
}

/// Join a voice channel, leaving the current one first.
///
/// The microphone is opened before anything is written, so a missing or
/// refused device leaves no participant row behind. The signaling topic is
/// subscribed before the row is inserted: peers offer as soon as they see
/// the row, and the topic only delivers to current subscribers.
pub async fn join_voice(state: &SharedState, channel_id: ChannelId) -> Result<VoiceJoin> {
    let _slot = JoinSlot::claim(state)?;

    if state.lock()?.voice.is_some() {
        match leave_voice(state).await {
            Ok(()) | Err(ClientError::NotInCall) => {}
            Err(e) => return Err(e),
        }
    }

    let (user_id, platform) = signed_in(state)?;
    let (media, stun_server, events) = {
        let guard = state.lock()?;
        (guard.media.clone(), guard.config.stun_server.clone(), guard.events.clone())
    };

    {
        let db = platform.db()?;
        let channel = db.get_channel(channel_id)?;
        if channel.kind != ChannelKind::Voice {
            return Err(ClientError::Invalid("Not a voice channel".into()));
        }
        db.ensure_can_access(user_id, MessageTarget::Channel(channel_id))?;
    }

    let audio_config = AudioConfig::default();
    let microphone = match media.acquire(&audio_config) {
        Ok(microphone) => microphone,
        Err(e) => {
            warn!(channel = %channel_id.short(), error = %e, "Microphone unavailable, not joining");
            return Ok(VoiceJoin::MicrophoneUnavailable { reason: e.to_string() });
        }
    };
    let controls = microphone.controls();

    let signals = match platform
        .realtime
        .channel(&channel_id.voice_topic(), &user_id.to_string())
        .await
    {
        Ok(signals) => signals,
        Err(e) => {
            controls.stop();
            return Err(e.into());
        }
    };

    let roster = match insert_participant(&platform, channel_id, user_id) {
        Ok(roster) => roster,
        Err(e) => {
            controls.stop();
            return Err(e);
        }
    };

    let session = match connect_call(
        user_id,
        channel_id,
        signals,
        roster,
        microphone,
        &audio_config,
        stun_server,
        events.clone(),
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            controls.stop();
            platform.db()?.leave_voice(channel_id, user_id)?;
            return Err(e);
        }
    };
    state.lock()?.voice = Some(session);

    emit_event(
        &events,
        ClientEvent::CallStateChanged(CallStatePayload {
            in_call: true,
            channel_id: Some(channel_id),
            is_muted: false,
        }),
    );
    info!(channel = %channel_id.short(), user = %user_id.short(), "Joined voice");

    let participants = platform.db()?.list_voice_participants(channel_id)?;
    Ok(VoiceJoin::Joined {
        channel_id,
        participants,
    })
}

/// Read who is already in the channel, then add our own row.
fn insert_participant(platform: &Platform, channel_id: ChannelId, user_id: UserId) -> Result<Vec<UserId>> {
    let db = platform.db()?;
    let roster = db
        .list_voice_participants(channel_id)?
        .into_iter()
        .map(|p| p.user_id)
        .filter(|u| *u != user_id)
        .collect();
    db.join_voice(channel_id, user_id)?;
    Ok(roster)
}

#[allow(clippy::too_many_arguments)]
async fn connect_call(
    user_id: UserId,
    channel_id: ChannelId,
    signals: RealtimeChannel,
    roster: Vec<UserId>,
    microphone: MicrophoneStream,
    audio_config: &AudioConfig,
    stun_server: String,
    events: broadcast::Sender<ClientEvent>,
) -> Result<VoiceSession> {
    let controls = microphone.controls();
    let ice_servers = if stun_server.is_empty() {
        Vec::new()
    } else {
        vec![stun_server]
    };
    let (audio_tx, audio_rx) = mpsc::channel(REMOTE_AUDIO_QUEUE);
    let connector = Arc::new(WebRtcConnector::new(ice_servers, audio_tx)?);
    let pump = spawn_audio_pump(connector.local_track(), microphone.into_frames());

    let call = match MeshCall::start(user_id, channel_id, signals, connector, roster).await {
        Ok(call) => call,
        Err(e) => {
            pump.abort();
            return Err(e.into());
        }
    };

    let (output, speaker) = start_speaker(audio_config);
    let playback = spawn_playback(
        call.subscribe(),
        audio_rx,
        events,
        output,
        audio_config.frame_size_samples(),
        Duration::from_millis(audio_config.frame_size_ms as u64),
    );

    Ok(VoiceSession {
        channel_id,
        handle: call.handle(),
        call,
        microphone: controls,
        speaker,
        tasks: vec![pump, playback],
    })
}

#[cfg(feature = "device-audio")]
fn start_speaker(config: &AudioConfig) -> (Option<mpsc::Sender<Vec<f32>>>, Option<MicrophoneControls>) {
    let (tx, rx) = mpsc::channel(PLAYBACK_QUEUE);
    match mshb_media::audio::AudioEngine::new().start_playback(config, rx) {
        Ok(controls) => (Some(tx), Some(controls)),
        Err(e) => {
            warn!(error = %e, "No audio output, joining without playback");
            (None, None)
        }
    }
}

#[cfg(not(feature = "device-audio"))]
fn start_speaker(_config: &AudioConfig) -> (Option<mpsc::Sender<Vec<f32>>>, Option<MicrophoneControls>) {
    debug!(queue = PLAYBACK_QUEUE, "Built without device audio, remote audio is discarded");
    (None, None)
}

/// Mix remote audio into the speaker and turn call events into UI events
/// until the call ends.
fn spawn_playback(
    mut call_events: broadcast::Receiver<CallEvent>,
    mut remote_audio: mpsc::Receiver<RemoteAudio>,
    events: broadcast::Sender<ClientEvent>,
    output: Option<mpsc::Sender<Vec<f32>>>,
    frame_size: usize,
    frame_period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut mixer = PlaybackMixer::new(frame_size);
        let mut ticker = tokio::time::interval(frame_period);

        loop {
            tokio::select! {
                Some(audio) = remote_audio.recv() => mixer.push(audio.user_id, &audio.samples),
                event = call_events.recv() => {
                    let (user_id, state) = match event {
                        Ok(CallEvent::PeerJoined(user_id)) => (user_id, PeerState::Connecting),
                        Ok(CallEvent::PeerStateChanged { user_id, state }) => (user_id, state),
                        Ok(CallEvent::PeerLeft(user_id)) => {
                            mixer.remove(&user_id);
                            (user_id, PeerState::Closed)
                        }
                        Ok(CallEvent::RemoteTrack { .. }) => continue,
                        Ok(CallEvent::Ended) | Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "Call events lagged");
                            continue;
                        }
                    };
                    emit_event(&events, ClientEvent::PeerStateChanged {
                        user_id,
                        state: state.as_str().to_string(),
                    });
                }
                _ = ticker.tick() => {
                    if let (Some(frame), Some(out)) = (mixer.next_frame(), &output) {
                        // Drop frames rather than build latency.
                        let _ = out.try_send(frame);
                    }
                }
            }
        }
        debug!("Playback task stopped");
    })
}

async fn teardown(session: VoiceSession, user_id: UserId, platform: &Platform) -> Result<()> {
    let channel_id = session.channel_id;
    session.microphone.stop();
    if let Some(speaker) = &session.speaker {
        speaker.stop();
    }
    if let Err(e) = session.call.leave().await {
        warn!(channel = %channel_id.short(), error = %e, "Error while leaving call");
    }
    for task in session.tasks {
        task.abort();
    }
    platform.db()?.leave_voice(channel_id, user_id)?;
    Ok(())
}

/// Hang up: announce departure, close every peer and delete our row.
pub async fn leave_voice(state: &SharedState) -> Result<()> {
    let (session, user_id, platform, events) = {
        let mut guard = state.lock()?;
        let session = guard.voice.take().ok_or(ClientError::NotInCall)?;
        (session, guard.user_id()?, guard.platform.clone(), guard.events.clone())
    };

    let channel_id = session.channel_id;
    teardown(session, user_id, &platform).await?;

    emit_event(
        &events,
        ClientEvent::CallStateChanged(CallStatePayload {
            in_call: false,
            channel_id: None,
            is_muted: false,
        }),
    );
    info!(channel = %channel_id.short(), user = %user_id.short(), "Left voice");
    Ok(())
}

/// Flip the microphone mute switch. Returns the new state.
pub fn toggle_mute(state: &SharedState) -> Result<bool> {
    let guard = state.lock()?;
    let user_id = guard.user_id()?;
    let voice = guard.voice.as_ref().ok_or(ClientError::NotInCall)?;

    let muted = !voice.is_muted();
    voice.microphone.set_muted(muted);
    guard.platform.db()?.set_voice_muted(voice.channel_id, user_id, muted)?;

    guard.emit(ClientEvent::CallStateChanged(CallStatePayload {
        in_call: true,
        channel_id: Some(voice.channel_id),
        is_muted: muted,
    }));
    Ok(muted)
}

pub fn call_state(state: &SharedState) -> Result<CallStatePayload> {
    let guard = state.lock()?;
    Ok(match &guard.voice {
        Some(voice) => CallStatePayload {
            in_call: true,
            channel_id: Some(voice.channel_id),
            is_muted: voice.is_muted(),
        },
        None => CallStatePayload {
            in_call: false,
            channel_id: None,
            is_muted: false,
        },
    })
}

pub fn list_voice_participants(state: &SharedState, channel_id: ChannelId) -> Result<Vec<VoiceParticipantDto>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    db.ensure_can_access(user_id, MessageTarget::Channel(channel_id))?;

    let mut out = Vec::new();
    for participant in db.list_voice_participants(channel_id)? {
        out.push(VoiceParticipantDto {
            profile: db.get_profile(participant.user_id)?,
            participant,
        });
    }
    Ok(out)
}

/// Connection state of every peer in the current call.
pub async fn call_peers(state: &SharedState) -> Result<Vec<PeerInfo>> {
    let handle = {
        let guard = state.lock()?;
        guard.voice.as_ref().ok_or(ClientError::NotInCall)?.handle.clone()
    };
    Ok(handle.peers().await?)
}

/// Remove voice rows a crashed session left behind. Skipped while in a
/// call. Returns the number of rows removed.
pub fn cleanup_stale_voice(state: &SharedState) -> Result<usize> {
    let guard = state.lock()?;
    let user_id = guard.user_id()?;
    if guard.voice.is_some() {
        return Ok(0);
    }
    let removed = guard.platform.db()?.remove_voice_rows_for_user(user_id)?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{auth, servers};
    use crate::state::test_support;
    use mshb_media::audio::NoMicrophone;
    use mshb_realtime::ChangeFilter;
    use mshb_shared::types::{ChangeKind, ServerId};

    async fn voice_channel(state: &SharedState) -> (ServerId, ChannelId) {
        let (server, channels) = servers::create_server(state, "Hangout").unwrap();
        let voice = channels.into_iter().find(|c| c.kind == ChannelKind::Voice).unwrap();
        (server.id, voice.id)
    }

    #[tokio::test]
    async fn missing_microphone_aborts_without_a_row() {
        let (state, _dir) = test_support::state_with_media(Arc::new(NoMicrophone)).await;
        auth::sign_up(&state, "m@example.com", "123456", "mic_less").await.unwrap();
        let (_, channel) = voice_channel(&state).await;

        let outcome = join_voice(&state, channel).await.unwrap();
        assert!(matches!(outcome, VoiceJoin::MicrophoneUnavailable { .. }));
        assert!(list_voice_participants(&state, channel).unwrap().is_empty());
        assert!(!call_state(&state).unwrap().in_call);
    }

    #[tokio::test]
    async fn join_mute_and_leave() {
        let (state, _dir) = test_support::state().await;
        auth::sign_up(&state, "j@example.com", "123456", "joiner").await.unwrap();
        let (_, channel) = voice_channel(&state).await;
        let mut events = state.lock().unwrap().subscribe();

        let outcome = join_voice(&state, channel).await.unwrap();
        match outcome {
            VoiceJoin::Joined { participants, .. } => assert_eq!(participants.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(call_state(&state).unwrap().in_call);

        assert!(toggle_mute(&state).unwrap());
        let rows = list_voice_participants(&state, channel).unwrap();
        assert!(rows[0].participant.is_muted);
        assert!(call_peers(&state).await.unwrap().is_empty());

        leave_voice(&state).await.unwrap();
        assert!(list_voice_participants(&state, channel).unwrap().is_empty());
        assert!(matches!(leave_voice(&state).await, Err(ClientError::NotInCall)));

        let mut saw_leave = false;
        while let Ok(event) = events.try_recv() {
            if let ClientEvent::CallStateChanged(payload) = event {
                saw_leave = !payload.in_call;
            }
        }
        assert!(saw_leave);
    }

    #[tokio::test]
    async fn second_joiner_offers_to_the_first() {
        let (alice, _dir) = test_support::state().await;
        let bob = test_support::peer_state(&alice);
        auth::sign_up(&alice, "alice@example.com", "123456", "alice").await.unwrap();
        let b = auth::sign_up(&bob, "bob@example.com", "123456", "bob").await.unwrap();

        let (server, channel) = voice_channel(&alice).await;
        let invite = servers::create_invite(&alice, server, None, None).unwrap();
        servers::join_server(&bob, &invite.link).unwrap();
        let a = alice.lock().unwrap().user_id().unwrap();

        join_voice(&alice, channel).await.unwrap();
        let outcome = join_voice(&bob, channel).await.unwrap();
        match outcome {
            VoiceJoin::Joined { participants, .. } => {
                let ids: Vec<UserId> = participants.iter().map(|p| p.user_id).collect();
                assert_eq!(ids, vec![a, b.id]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let peers = call_peers(&bob).await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].user_id, a);

        leave_voice(&bob).await.unwrap();
        leave_voice(&alice).await.unwrap();
        assert!(list_voice_participants(&alice, channel).unwrap().is_empty());
    }

    /// Alice owns a server that Bob has joined. Returns both clients, Bob's
    /// id and the server's voice channel.
    async fn two_members() -> (SharedState, SharedState, UserId, ChannelId, tempfile::TempDir) {
        let (alice, dir) = test_support::state().await;
        let bob = test_support::peer_state(&alice);
        auth::sign_up(&alice, "alice@example.com", "123456", "alice").await.unwrap();
        let b = auth::sign_up(&bob, "bob@example.com", "123456", "bob").await.unwrap();

        let (server, channel) = voice_channel(&alice).await;
        let invite = servers::create_invite(&alice, server, None, None).unwrap();
        servers::join_server(&bob, &invite.link).unwrap();
        (alice, bob, b.id, channel, dir)
    }

    async fn next_roster(events: &mut broadcast::Receiver<ClientEvent>, channel: ChannelId) -> usize {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ClientEvent::VoiceRosterChanged { channel_id, participants } = event {
                if channel_id == channel {
                    return participants.len();
                }
            }
        }
    }

    #[tokio::test]
    async fn concurrent_joins_keep_a_single_row() {
        let (state, _dir) = test_support::state().await;
        auth::sign_up(&state, "c@example.com", "123456", "clicker").await.unwrap();
        let (_, channel) = voice_channel(&state).await;

        let (first, second) = tokio::join!(join_voice(&state, channel), join_voice(&state, channel));
        assert!(matches!(first, Ok(VoiceJoin::Joined { .. })));
        assert!(matches!(second, Err(ClientError::JoinInProgress)));
        assert!(call_state(&state).unwrap().in_call);
        assert_eq!(list_voice_participants(&state, channel).unwrap().len(), 1);

        // The slot is free again once the first join is done.
        join_voice(&state, channel).await.unwrap();
        assert_eq!(list_voice_participants(&state, channel).unwrap().len(), 1);
        leave_voice(&state).await.unwrap();
        assert!(list_voice_participants(&state, channel).unwrap().is_empty());
    }

    #[tokio::test]
    async fn peer_reacting_to_the_new_row_reaches_the_joiner() {
        let (alice, bob, b, channel, _dir) = two_members().await;
        let platform = alice.lock().unwrap().platform.clone();
        let mut rows = platform
            .changes(ChangeFilter::table("voice_participants").kind(ChangeKind::Insert))
            .unwrap();

        // Bob joins the moment Alice's row shows up, before her join returns.
        let (alice_join, bob_join) = tokio::join!(join_voice(&alice, channel), async {
            rows.recv().await;
            join_voice(&bob, channel).await
        });
        alice_join.unwrap();
        bob_join.unwrap();

        let mut reached = false;
        for _ in 0..200 {
            if call_peers(&alice).await.unwrap().iter().any(|p| p.user_id == b) {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reached, "Bob's offer never reached Alice");

        leave_voice(&bob).await.unwrap();
        leave_voice(&alice).await.unwrap();
    }

    #[tokio::test]
    async fn other_members_see_the_roster_change() {
        let (alice, bob, _b, channel, _dir) = two_members().await;
        let mut bob_events = bob.lock().unwrap().subscribe();

        join_voice(&alice, channel).await.unwrap();
        assert_eq!(next_roster(&mut bob_events, channel).await, 1);

        leave_voice(&alice).await.unwrap();
        assert_eq!(next_roster(&mut bob_events, channel).await, 0);
    }

    #[tokio::test]
    async fn text_channels_cannot_be_joined() {
        let (state, _dir) = test_support::state().await;
        auth::sign_up(&state, "t@example.com", "123456", "texter").await.unwrap();
        let (_, channels) = servers::create_server(&state, "Text only").unwrap();
        let text = channels.into_iter().find(|c| c.kind == ChannelKind::Text).unwrap();

        assert!(matches!(join_voice(&state, text.id).await, Err(ClientError::Invalid(_))));
        assert_eq!(cleanup_stale_voice(&state).unwrap(), 0);
    }
}
