use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s.trim()).map(Self)
            }

            /// First eight characters, for log lines.
            pub fn short(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Identity of an account; same value as the profile row id.
    UserId
);
uuid_id!(
    /// A two-party direct message thread.
    ThreadId
);
uuid_id!(GroupId);
uuid_id!(ServerId);
uuid_id!(
    /// A text or voice channel inside a server.
    ChannelId
);
uuid_id!(MessageId);

impl ChannelId {
    /// Broadcast topic used for voice signaling in this channel.
    pub fn voice_topic(&self) -> String {
        format!("{}{}", crate::constants::VOICE_TOPIC_PREFIX, self.0)
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::SharedError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(crate::error::SharedError::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

string_enum!(
    /// Presence status chosen by the user.
    UserStatus {
        Online => "online",
        Busy => "busy",
        Dnd => "dnd",
        Idle => "idle",
        Invisible => "invisible",
        Offline => "offline",
    }
);

impl UserStatus {
    /// Whether other users should see this user as present.
    pub fn is_visible(&self) -> bool {
        !matches!(self, Self::Invisible | Self::Offline)
    }
}

impl Default for UserStatus {
    fn default() -> Self {
        Self::Online
    }
}

string_enum!(FriendshipStatus {
    Pending => "pending",
    Accepted => "accepted",
});

string_enum!(GroupRole {
    Admin => "admin",
    Member => "member",
});

string_enum!(ServerRole {
    Owner => "owner",
    Admin => "admin",
    Member => "member",
});

impl ServerRole {
    /// Owners and admins may edit channels, settings and members.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

string_enum!(ChannelKind {
    Text => "text",
    Voice => "voice",
});

string_enum!(
    /// Object storage buckets exposed by the platform.
    Bucket {
        Avatars => "avatars",
        ChatFiles => "chat-files",
        ServerAssets => "server-assets",
    }
);

string_enum!(AssetKind {
    Emoji => "emoji",
    Sticker => "sticker",
    Sound => "sound",
});

string_enum!(ChangeKind {
    Insert => "INSERT",
    Update => "UPDATE",
    Delete => "DELETE",
});

/// A row-level change notification, shaped like a `postgres_changes` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowChange {
    pub table: String,
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    #[serde(rename = "new")]
    pub record: serde_json::Value,
    #[serde(rename = "old", skip_serializing_if = "Option::is_none")]
    pub old_record: Option<serde_json::Value>,
}

impl RowChange {
    pub fn insert(table: &str, record: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Insert,
            record,
            old_record: None,
        }
    }

    pub fn update(table: &str, record: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Update,
            record,
            old_record: None,
        }
    }

    pub fn delete(table: &str, old_record: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            kind: ChangeKind::Delete,
            record: serde_json::Value::Null,
            old_record: Some(old_record),
        }
    }

    /// Column value from the new record, falling back to the old one for deletes.
    pub fn column(&self, name: &str) -> Option<&serde_json::Value> {
        self.record
            .get(name)
            .or_else(|| self.old_record.as_ref().and_then(|old| old.get(name)))
    }
}
