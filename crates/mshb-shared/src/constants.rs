/// Application name
pub const APP_NAME: &str = "MSHB";

/// Deep link URL scheme (`mshb://…`)
pub const DEEP_LINK_SCHEME: &str = "mshb";

/// Only ICE server handed to peer connections; there is no TURN fallback.
pub const STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Prefix of the broadcast topic carrying voice signaling for a channel
pub const VOICE_TOPIC_PREFIX: &str = "voice:";

/// Presence topic where every signed-in client tracks itself by user id
pub const PRESENCE_TOPIC: &str = "online-users";

/// Maximum peers in one voice mesh
pub const MAX_MESH_PEERS: usize = 8;

/// Maximum upload size in bytes (50 MiB)
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Maximum message length in characters
pub const MAX_MESSAGE_LEN: usize = 4000;

/// Auto-updater poll interval in seconds (hourly)
pub const UPDATE_CHECK_INTERVAL_SECS: u64 = 3600;

/// Localhost port used for the single-instance lock
pub const DEFAULT_INSTANCE_PORT: u16 = 47_611;

/// Default HTTP port of the GIPHY proxy function
pub const DEFAULT_HTTP_PORT: u16 = 8080;

pub const GIPHY_BASE_URL: &str = "https://api.giphy.com/v1/gifs";
pub const GIPHY_DEFAULT_LIMIT: u32 = 24;
pub const GIPHY_MAX_LIMIT: u32 = 50;

/// Length of generated server invite codes
pub const INVITE_CODE_LEN: usize = 8;

/// Days a mocked subscription stays active after checkout
pub const SUBSCRIPTION_PERIOD_DAYS: i64 = 30;
