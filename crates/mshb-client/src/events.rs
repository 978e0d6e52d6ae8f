//! Events pushed to the UI.
//!
//! Commands and background tasks publish [`ClientEvent`]s on one broadcast
//! channel; the UI layer subscribes once. Row changes from the platform are
//! turned into events by [`spawn_change_bridge`].

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mshb_realtime::ChangeFilter;
use mshb_shared::types::{ChangeKind, ChannelId, RowChange, UserId};
use mshb_store::{Friendship, Message, MessageTarget, VoiceParticipant};

use crate::desktop::deeplink::DeepLink;
use crate::desktop::updater::UpdateInfo;
use crate::error::Result;
use crate::platform::Platform;

pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatePayload {
    pub in_call: bool,
    pub channel_id: Option<ChannelId>,
    pub is_muted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    NewMessage(Message),
    FriendRequest(Friendship),
    #[serde(rename_all = "camelCase")]
    VoiceRosterChanged {
        channel_id: ChannelId,
        participants: Vec<VoiceParticipant>,
    },
    CallStateChanged(CallStatePayload),
    #[serde(rename_all = "camelCase")]
    PeerStateChanged {
        user_id: UserId,
        state: String,
    },
    UpdateAvailable(UpdateInfo),
    DeepLink(DeepLink),
}

pub fn emit_event(events: &broadcast::Sender<ClientEvent>, event: ClientEvent) {
    // Nobody listening is fine while the UI is still starting.
    if events.send(event).is_err() {
        debug!("No event subscribers");
    }
}

/// Forward platform row changes relevant to `user` as [`ClientEvent`]s
/// until the platform goes away or the task is aborted.
pub fn spawn_change_bridge(
    platform: Platform,
    user: UserId,
    events: broadcast::Sender<ClientEvent>,
) -> Result<JoinHandle<()>> {
    let mut messages = platform.changes(ChangeFilter::table("messages").kind(ChangeKind::Insert))?;
    let mut friendships = platform.changes(
        ChangeFilter::table("friendships")
            .kind(ChangeKind::Insert)
            .eq("addressee_id", user.to_string()),
    )?;
    let mut voice = platform.changes(ChangeFilter::table("voice_participants"))?;

    Ok(tokio::spawn(async move {
        loop {
            let outcome = tokio::select! {
                Some(change) = messages.recv() => on_message(&platform, user, change),
                Some(change) = friendships.recv() => on_friendship(change),
                Some(change) = voice.recv() => on_voice(&platform, user, change),
                else => break,
            };
            match outcome {
                Ok(Some(event)) => emit_event(&events, event),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Dropping row change"),
            }
        }
        debug!(user = %user.short(), "Change bridge stopped");
    }))
}

fn on_message(platform: &Platform, user: UserId, change: RowChange) -> Result<Option<ClientEvent>> {
    let message: Message = serde_json::from_value(change.record)?;
    if message.author_id == user {
        return Ok(None);
    }
    let Some(target) = message.target() else {
        return Ok(None);
    };
    if platform.db()?.ensure_can_access(user, target).is_err() {
        return Ok(None);
    }
    Ok(Some(ClientEvent::NewMessage(message)))
}

fn on_friendship(change: RowChange) -> Result<Option<ClientEvent>> {
    let friendship: Friendship = serde_json::from_value(change.record)?;
    Ok(Some(ClientEvent::FriendRequest(friendship)))
}

fn on_voice(platform: &Platform, user: UserId, change: RowChange) -> Result<Option<ClientEvent>> {
    let Some(channel_id) = change
        .column("channel_id")
        .and_then(|v| v.as_str())
        .and_then(|s| ChannelId::parse(s).ok())
    else {
        return Ok(None);
    };

    let db = platform.db()?;
    if db.ensure_can_access(user, MessageTarget::Channel(channel_id)).is_err() {
        return Ok(None);
    }
    let participants = db.list_voice_participants(channel_id)?;
    Ok(Some(ClientEvent::VoiceRosterChanged {
        channel_id,
        participants,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ClientEvent::CallStateChanged(CallStatePayload {
            in_call: true,
            channel_id: None,
            is_muted: false,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call-state-changed");
        assert_eq!(json["payload"]["inCall"], true);

        let user_id = UserId::new();
        let json = serde_json::to_value(ClientEvent::PeerStateChanged {
            user_id,
            state: "connected".into(),
        })
        .unwrap();
        assert_eq!(json["payload"]["userId"], user_id.to_string());
    }
}
