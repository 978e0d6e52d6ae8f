use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use mshb_shared::constants::PRESENCE_TOPIC;
use mshb_shared::types::{UserId, UserStatus};
use mshb_store::Profile;

use crate::error::Result;
use crate::state::{signed_in, SharedState};

fn presence_meta(user_id: UserId, status: UserStatus) -> serde_json::Value {
    json!({
        "userId": user_id,
        "status": status.as_str(),
        "onlineAt": Utc::now().to_rfc3339(),
    })
}

/// Join the presence topic. Invisible users subscribe without tracking so
/// they still see who is online.
pub async fn go_online(state: &SharedState) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    let status = platform.db()?.get_profile(user_id)?.status;

    let channel = platform
        .realtime
        .channel(PRESENCE_TOPIC, &user_id.to_string())
        .await?;
    if status.is_visible() {
        channel.track(&user_id.to_string(), presence_meta(user_id, status)).await?;
    }

    // Replacing an older subscription drops it, which untracks it.
    state.lock()?.presence = Some(channel);
    info!(user = %user_id.short(), status = %status, "Online");
    Ok(())
}

pub async fn go_offline(state: &SharedState) -> Result<()> {
    let (channel, user_id, platform) = {
        let mut guard = state.lock()?;
        let user_id = guard.user_id()?;
        (guard.presence.take(), user_id, guard.platform.clone())
    };

    if let Some(channel) = channel {
        channel.untrack().await?;
        channel.unsubscribe().await;
    }
    platform.db()?.touch_last_seen(user_id, Utc::now())?;
    debug!(user = %user_id.short(), "Offline");
    Ok(())
}

/// Re-announce ourselves after a status change.
pub(crate) async fn refresh(state: &SharedState, status: UserStatus) -> Result<()> {
    let (sender, user_id) = {
        let guard = state.lock()?;
        match &guard.presence {
            Some(channel) => (channel.sender(), guard.user_id()?),
            None => return Ok(()),
        }
    };

    if status.is_visible() {
        sender.track(&user_id.to_string(), presence_meta(user_id, status)).await?;
    } else {
        sender.untrack().await?;
    }
    Ok(())
}

/// Profiles of everyone currently tracked on the presence topic.
pub async fn online_users(state: &SharedState) -> Result<Vec<Profile>> {
    let (_, platform) = signed_in(state)?;
    let presence = platform.realtime.presence_state(PRESENCE_TOPIC).await?;

    let ids: Vec<UserId> = presence
        .keys()
        .filter_map(|key| UserId::parse(key).ok())
        .collect();
    let mut profiles = platform.db()?.get_profiles(&ids)?;
    profiles.sort_by(|a, b| a.username.cmp(&b.username));
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{auth, profile};
    use crate::state::test_support;

    #[tokio::test]
    async fn online_list_follows_presence_and_status() {
        let (alice, _dir) = test_support::state().await;
        let bob = test_support::peer_state(&alice);
        auth::sign_up(&alice, "alice@example.com", "123456", "alice").await.unwrap();
        auth::sign_up(&bob, "bob@example.com", "123456", "bob").await.unwrap();

        go_online(&alice).await.unwrap();
        go_online(&bob).await.unwrap();
        let names: Vec<String> = online_users(&alice).await.unwrap().into_iter().map(|p| p.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        profile::set_status(&bob, UserStatus::Invisible).await.unwrap();
        let names: Vec<String> = online_users(&alice).await.unwrap().into_iter().map(|p| p.username).collect();
        assert_eq!(names, vec!["alice"]);

        go_offline(&alice).await.unwrap();
        let online = online_users(&bob).await.unwrap();
        assert!(online.is_empty());

        let alice_id = alice.lock().unwrap().user_id().unwrap();
        let platform = alice.lock().unwrap().platform.clone();
        assert!(platform.db().unwrap().get_profile(alice_id).unwrap().last_seen.is_some());
    }
}
