//! Row structs for every platform table.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed to
//! the UI layer and published as a change notification. Field names match
//! the column names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mshb_shared::types::{
    AssetKind, ChannelId, ChannelKind, FriendshipStatus, GroupId, GroupRole, MessageId, ServerId,
    ServerRole, ThreadId, UserId, UserStatus,
};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Public identity of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub status: UserStatus,
    pub custom_status: Option<String>,
    pub language: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Name to render: display name when set, username otherwise.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

/// Partial profile update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub custom_status: Option<String>,
    pub language: Option<String>,
}

/// Credentials row. Never leaves the store except for verification.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Friends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friendship {
    pub id: uuid::Uuid,
    pub requester_id: UserId,
    pub addressee_id: UserId,
    pub status: FriendshipStatus,
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    /// The participant that is not `me`.
    pub fn other(&self, me: &UserId) -> UserId {
        if self.requester_id == *me {
            self.addressee_id
        } else {
            self.requester_id
        }
    }
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DmThread {
    pub id: ThreadId,
    pub user1_id: UserId,
    pub user2_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl DmThread {
    pub fn other(&self, me: &UserId) -> UserId {
        if self.user1_id == *me {
            self.user2_id
        } else {
            self.user1_id
        }
    }

    pub fn includes(&self, user: &UserId) -> bool {
        self.user1_id == *user || self.user2_id == *user
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupThread {
    pub id: GroupId,
    pub name: String,
    pub icon_url: Option<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

/// The conversation a message belongs to. Exactly one per message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum MessageTarget {
    Dm(ThreadId),
    Group(GroupId),
    Channel(ChannelId),
}

impl MessageTarget {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::Dm(_) => "dm_thread_id",
            Self::Group(_) => "group_thread_id",
            Self::Channel(_) => "channel_id",
        }
    }

    pub(crate) fn id_string(&self) -> String {
        match self {
            Self::Dm(id) => id.to_string(),
            Self::Group(id) => id.to_string(),
            Self::Channel(id) => id.to_string(),
        }
    }
}

/// File attached to a message, already uploaded to the `chat-files` bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub dm_thread_id: Option<ThreadId>,
    pub group_thread_id: Option<GroupId>,
    pub channel_id: Option<ChannelId>,
    pub author_id: UserId,
    pub content: String,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<i64>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_for_everyone: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn target(&self) -> Option<MessageTarget> {
        match (self.dm_thread_id, self.group_thread_id, self.channel_id) {
            (Some(id), None, None) => Some(MessageTarget::Dm(id)),
            (None, Some(id), None) => Some(MessageTarget::Group(id)),
            (None, None, Some(id)) => Some(MessageTarget::Channel(id)),
            _ => None,
        }
    }

    pub fn attachment(&self) -> Option<Attachment> {
        Some(Attachment {
            url: self.file_url.clone()?,
            name: self.file_name.clone().unwrap_or_default(),
            mime_type: self
                .file_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".into()),
            size: self.file_size.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Reactions on one message folded by emoji.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub owner_id: UserId,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    pub tag: Option<String>,
    pub badge: Option<String>,
    pub color: Option<String>,
    pub default_notifications: String,
    pub system_channel_id: Option<ChannelId>,
    pub created_at: DateTime<Utc>,
}

/// Server settings edit; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSettingsUpdate {
    pub name: Option<String>,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    pub tag: Option<String>,
    pub badge: Option<String>,
    pub color: Option<String>,
    pub default_notifications: Option<String>,
    pub system_channel_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerMember {
    pub server_id: ServerId,
    pub user_id: UserId,
    pub role: ServerRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub server_id: ServerId,
    pub name: String,
    pub kind: ChannelKind,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInvite {
    pub code: String,
    pub server_id: ServerId,
    pub created_by: UserId,
    pub max_uses: Option<i64>,
    pub uses: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ServerInvite {
    pub fn is_usable(&self, at: DateTime<Utc>) -> bool {
        let not_expired = self.expires_at.map_or(true, |exp| at < exp);
        let has_uses = self.max_uses.map_or(true, |max| self.uses < max);
        not_expired && has_uses
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerAsset {
    pub id: uuid::Uuid,
    pub server_id: ServerId,
    pub kind: AssetKind,
    pub name: String,
    pub url: String,
    pub uploaded_by: UserId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Voice and read markers
// ---------------------------------------------------------------------------

/// A user currently connected to a voice channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceParticipant {
    pub id: uuid::Uuid,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub is_muted: bool,
    pub joined_at: DateTime<Utc>,
}

/// Unread totals for every conversation the user can see.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCounts {
    pub dms: std::collections::HashMap<ThreadId, u32>,
    pub groups: std::collections::HashMap<GroupId, u32>,
}

impl UnreadCounts {
    pub fn total(&self) -> u32 {
        self.dms.values().chain(self.groups.values()).sum()
    }
}

// ---------------------------------------------------------------------------
// Billing mock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub user_id: UserId,
    pub plan: String,
    pub status: String,
    pub renews_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.status == "active" && at < self.renews_at
    }
}
