// In-process realtime service: topic broadcast, presence and row change feeds.

pub mod changes;
pub mod error;
pub mod hub;
pub mod presence;

pub use changes::{ChangeFilter, ChangeStream};
pub use error::{RealtimeError, Result};
pub use hub::{spawn_hub, ChannelSender, HubCommand, RealtimeChannel, RealtimeEvent, RealtimeHub, SubscriptionId};
pub use presence::{PresenceDiff, PresenceTracker};
