//! Voice signaling messages.
//!
//! Signaling has no server of its own: peers exchange these messages over the
//! realtime broadcast topic of the voice channel they are in. The event name
//! on the topic is the lowercase variant name and the payload is camelCase
//! JSON, which keeps the format interoperable with browser clients.

use serde::{Deserialize, Serialize};

use crate::error::SharedError;
use crate::types::UserId;

pub const EVENT_OFFER: &str = "offer";
pub const EVENT_ANSWER: &str = "answer";
pub const EVENT_ICE: &str = "ice";
pub const EVENT_LEAVE: &str = "leave";

/// An ICE candidate in the shape of `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpPayload {
    pub sdp: String,
    pub sender_id: UserId,
    pub target_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcePayload {
    pub candidate: IceCandidate,
    pub sender_id: UserId,
    pub target_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub user_id: UserId,
}

/// One signaling message on a voice channel's broadcast topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalMessage {
    Offer(SdpPayload),
    Answer(SdpPayload),
    Ice(IcePayload),
    Leave(LeavePayload),
}

impl SignalMessage {
    pub fn offer(sender: UserId, target: UserId, sdp: String) -> Self {
        Self::Offer(SdpPayload {
            sdp,
            sender_id: sender,
            target_id: target,
        })
    }

    pub fn answer(sender: UserId, target: UserId, sdp: String) -> Self {
        Self::Answer(SdpPayload {
            sdp,
            sender_id: sender,
            target_id: target,
        })
    }

    pub fn ice(sender: UserId, target: UserId, candidate: IceCandidate) -> Self {
        Self::Ice(IcePayload {
            candidate,
            sender_id: sender,
            target_id: target,
        })
    }

    pub fn leave(user: UserId) -> Self {
        Self::Leave(LeavePayload { user_id: user })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Offer(_) => EVENT_OFFER,
            Self::Answer(_) => EVENT_ANSWER,
            Self::Ice(_) => EVENT_ICE,
            Self::Leave(_) => EVENT_LEAVE,
        }
    }

    /// The user that produced this message.
    pub fn sender(&self) -> UserId {
        match self {
            Self::Offer(p) | Self::Answer(p) => p.sender_id,
            Self::Ice(p) => p.sender_id,
            Self::Leave(p) => p.user_id,
        }
    }

    /// The single recipient, or `None` for messages meant for every participant.
    pub fn target(&self) -> Option<UserId> {
        match self {
            Self::Offer(p) | Self::Answer(p) => Some(p.target_id),
            Self::Ice(p) => Some(p.target_id),
            Self::Leave(_) => None,
        }
    }

    pub fn is_addressed_to(&self, user: &UserId) -> bool {
        match self.target() {
            Some(target) => target == *user,
            None => self.sender() != *user,
        }
    }

    /// Split into the `(event, payload)` pair carried by a broadcast topic.
    pub fn to_broadcast(&self) -> Result<(&'static str, serde_json::Value), SharedError> {
        let payload = match self {
            Self::Offer(p) | Self::Answer(p) => serde_json::to_value(p)?,
            Self::Ice(p) => serde_json::to_value(p)?,
            Self::Leave(p) => serde_json::to_value(p)?,
        };
        Ok((self.event_name(), payload))
    }

    /// Rebuild a message from a broadcast event. Unknown events are an error.
    pub fn from_broadcast(event: &str, payload: serde_json::Value) -> Result<Self, SharedError> {
        match event {
            EVENT_OFFER => Ok(Self::Offer(serde_json::from_value(payload)?)),
            EVENT_ANSWER => Ok(Self::Answer(serde_json::from_value(payload)?)),
            EVENT_ICE => Ok(Self::Ice(serde_json::from_value(payload)?)),
            EVENT_LEAVE => Ok(Self::Leave(serde_json::from_value(payload)?)),
            other => Err(SharedError::Protocol(format!(
                "unknown signaling event '{other}'"
            ))),
        }
    }
}
