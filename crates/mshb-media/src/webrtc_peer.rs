//! [`PeerConnector`] backed by webrtc-rs.
//!
//! Every remote participant gets its own `RTCPeerConnection`. All of them
//! carry the same local PCMU track, so one write reaches the whole mesh.
//! Inbound audio is decoded to 48 kHz and handed out per user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mshb_shared::protocol::IceCandidate;
use mshb_shared::types::UserId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::codec;
use crate::error::Result;
use crate::transport::{PeerConnector, PeerEvent, PeerLink, PeerState};

/// Decoded audio from one remote participant, 48 kHz mono.
#[derive(Debug, Clone)]
pub struct RemoteAudio {
    pub user_id: UserId,
    pub samples: Vec<f32>,
}

pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<String>,
    local_track: Arc<TrackLocalStaticSample>,
    remote_audio: mpsc::Sender<RemoteAudio>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>, remote_audio: mpsc::Sender<RemoteAudio>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let local_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: codec::WIRE_RATE,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            "audio".to_owned(),
            "mshb-voice".to_owned(),
        ));

        Ok(Self {
            api,
            ice_servers,
            local_track,
            remote_audio,
        })
    }

    /// The track every peer connection sends. Feed it with
    /// [`spawn_audio_pump`].
    pub fn local_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.local_track)
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, remote: UserId, events: mpsc::Sender<PeerEvent>) -> Result<Arc<dyn PeerLink>> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config()).await?);

        pc.add_track(Arc::clone(&self.local_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let state_tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                let state = match s {
                    RTCPeerConnectionState::Connecting => PeerState::Connecting,
                    RTCPeerConnectionState::Connected => PeerState::Connected,
                    RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                    RTCPeerConnectionState::Failed => PeerState::Failed,
                    RTCPeerConnectionState::Closed => PeerState::Closed,
                    _ => return,
                };
                let _ = tx.send(PeerEvent::StateChanged { remote, state }).await;
            })
        }));

        let ice_tx = events.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            Box::pin(async move {
                let Some(c) = c else { return };
                match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        let _ = tx.send(PeerEvent::LocalCandidate { remote, candidate }).await;
                    }
                    Err(e) => warn!(peer = %remote.short(), error = %e, "Unserializable ICE candidate"),
                }
            })
        }));

        let track_tx = events;
        let audio_tx = self.remote_audio.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let tx = track_tx.clone();
                let audio_tx = audio_tx.clone();
                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        debug!(peer = %remote.short(), "Ignoring non-audio track");
                        return;
                    }
                    let track_id = format!("audio-{}", track.ssrc());
                    info!(peer = %remote.short(), track = %track_id, "Remote audio track");
                    let _ = tx.send(PeerEvent::RemoteTrack { remote, track_id }).await;

                    tokio::spawn(async move {
                        while let Ok((packet, _)) = track.read_rtp().await {
                            let samples = codec::upsample(&codec::decode(&packet.payload));
                            if audio_tx
                                .send(RemoteAudio {
                                    user_id: remote,
                                    samples,
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        debug!(peer = %remote.short(), "Remote audio track ended");
                    });
                })
            },
        ));

        debug!(peer = %remote.short(), "Peer connection created");
        Ok(Arc::new(WebRtcLink { remote, pc }))
    }
}

struct WebRtcLink {
    remote: UserId,
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await?;
        let sdp = offer.sdp.clone();
        self.pc.set_local_description(offer).await?;
        Ok(sdp)
    }

    async fn accept_offer(&self, sdp: &str) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp.to_owned())?;
        self.pc.set_remote_description(offer).await?;
        let answer = self.pc.create_answer(None).await?;
        let answer_sdp = answer.sdp.clone();
        self.pc.set_local_description(answer).await?;
        Ok(answer_sdp)
    }

    async fn accept_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_owned())?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        debug!(peer = %self.remote.short(), "Closing peer connection");
        self.pc.close().await?;
        Ok(())
    }
}

/// Encode 48 kHz capture frames onto the shared local track until the
/// frame channel closes.
pub fn spawn_audio_pump(
    track: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::Receiver<Vec<f32>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let duration = Duration::from_micros(frame.len() as u64 * 1_000_000 / codec::DEVICE_RATE as u64);
            let payload = codec::encode(&codec::downsample(&frame));
            let sample = Sample {
                data: Bytes::from(payload),
                duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                debug!(error = %e, "Dropping audio sample");
            }
        }
        debug!("Audio pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offer_and_answer_negotiate_pcmu() {
        let (audio_tx, _audio_rx) = mpsc::channel(8);
        let connector = WebRtcConnector::new(vec![], audio_tx).unwrap();
        let (events_tx, _events_rx) = mpsc::channel(256);

        let a = connector.connect(UserId::new(), events_tx.clone()).await.unwrap();
        let b = connector.connect(UserId::new(), events_tx).await.unwrap();

        let offer = a.create_offer().await.unwrap();
        assert!(offer.contains("m=audio"));
        assert!(offer.contains("PCMU"));

        let answer = b.accept_offer(&offer).await.unwrap();
        assert!(answer.contains("m=audio"));
        a.accept_answer(&answer).await.unwrap();

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn garbage_offer_is_an_error() {
        let (audio_tx, _audio_rx) = mpsc::channel(8);
        let connector = WebRtcConnector::new(vec![], audio_tx).unwrap();
        let (events_tx, _events_rx) = mpsc::channel(16);

        let link = connector.connect(UserId::new(), events_tx).await.unwrap();
        assert!(link.accept_offer("not sdp").await.is_err());
        link.close().await.unwrap();
    }
}
