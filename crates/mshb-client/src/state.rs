//! Application state shared across all commands.
//!
//! [`AppState`] sits behind `Arc<Mutex<>>` ([`SharedState`]). Commands take
//! the lock only to read or swap fields and never hold it across an
//! `.await`; anything they need afterwards is cloned out first.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use mshb_media::audio::{MediaSource, MicrophoneControls};
use mshb_media::{CallHandle, MeshCall};
use mshb_realtime::RealtimeChannel;
use mshb_shared::types::{ChannelId, UserId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{emit_event, ClientEvent, EVENT_CAPACITY};
use crate::platform::Platform;
use crate::settings::AppSettings;

pub type SharedState = Arc<Mutex<AppState>>;

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
}

/// The call this client is currently in.
pub struct VoiceSession {
    pub channel_id: ChannelId,
    pub call: MeshCall,
    pub handle: CallHandle,
    pub microphone: MicrophoneControls,
    /// Output stream, when this build plays audio.
    pub speaker: Option<MicrophoneControls>,
    /// Audio pump, playback and event forwarding.
    pub tasks: Vec<JoinHandle<()>>,
}

impl VoiceSession {
    pub fn is_muted(&self) -> bool {
        self.microphone.is_muted()
    }
}

pub struct AppState {
    pub config: ClientConfig,
    pub platform: Platform,

    /// `None` until sign in.
    pub session: Option<Session>,

    pub voice: Option<VoiceSession>,

    /// A join is connecting. At most one runs at a time.
    pub voice_joining: bool,

    /// Subscription to the presence topic while online.
    pub presence: Option<RealtimeChannel>,

    pub settings: AppSettings,

    pub events: broadcast::Sender<ClientEvent>,

    /// Where microphones come from.
    pub media: Arc<dyn MediaSource>,

    /// Task turning row changes into [`ClientEvent`]s for the session user.
    pub change_bridge: Option<JoinHandle<()>>,
}

impl AppState {
    pub fn new(config: ClientConfig, platform: Platform, media: Arc<dyn MediaSource>) -> Self {
        let settings = AppSettings::load(&config.settings_path());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            platform,
            session: None,
            voice: None,
            voice_joining: false,
            presence: None,
            settings,
            events,
            media,
            change_bridge: None,
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn user_id(&self) -> Result<UserId> {
        self.session
            .as_ref()
            .map(|s| s.user_id)
            .ok_or(ClientError::NotSignedIn)
    }

    pub fn emit(&self, event: ClientEvent) {
        emit_event(&self.events, event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

/// Microphone source for this build: the default capture device when built
/// with `device-audio`, otherwise a silent listener-only source.
pub fn default_media_source() -> Arc<dyn MediaSource> {
    #[cfg(feature = "device-audio")]
    {
        Arc::new(mshb_media::audio::AudioEngine::new())
    }
    #[cfg(not(feature = "device-audio"))]
    {
        Arc::new(mshb_media::audio::SilenceSource)
    }
}

/// The signed-in user and a platform handle, released from the lock.
pub fn signed_in(state: &SharedState) -> Result<(UserId, Platform)> {
    let guard = state.lock()?;
    Ok((guard.user_id()?, guard.platform.clone()))
}
