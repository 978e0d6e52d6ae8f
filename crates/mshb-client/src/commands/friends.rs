use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use mshb_shared::types::UserId;
use mshb_store::{Database, Friendship, Profile};

use crate::error::{ClientError, Result};
use crate::state::{signed_in, SharedState};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendDto {
    pub friendship_id: Uuid,
    pub profile: Profile,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequests {
    pub incoming: Vec<FriendDto>,
    pub outgoing: Vec<FriendDto>,
}

fn to_dtos(db: &Database, me: UserId, rows: Vec<Friendship>) -> Result<Vec<FriendDto>> {
    let mut out = Vec::with_capacity(rows.len());
    for friendship in rows {
        let profile = db.get_profile(friendship.other(&me))?;
        out.push(FriendDto {
            friendship_id: friendship.id,
            profile,
            since: friendship.created_at,
        });
    }
    Ok(out)
}

pub fn send_friend_request(state: &SharedState, username: &str) -> Result<Friendship> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    let target = db
        .get_profile_by_username(&username.trim().to_lowercase())?
        .ok_or_else(|| ClientError::Invalid(format!("No user named {username}")))?;

    let friendship = db.request_friendship(user_id, target.id)?;
    info!(from = %user_id.short(), to = %target.id.short(), status = %friendship.status, "Friend request sent");
    Ok(friendship)
}

pub fn accept_friend_request(state: &SharedState, friendship_id: Uuid) -> Result<Friendship> {
    let (user_id, platform) = signed_in(state)?;
    let friendship = platform.db()?.accept_friendship(friendship_id, user_id)?;
    Ok(friendship)
}

/// Decline an incoming request, cancel an outgoing one or unfriend.
pub fn remove_friend(state: &SharedState, friendship_id: Uuid) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.delete_friendship(friendship_id, user_id)?;
    Ok(())
}

pub fn list_friends(state: &SharedState) -> Result<Vec<FriendDto>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    let mut friends = to_dtos(&db, user_id, db.list_friends(user_id)?)?;
    friends.sort_by(|a, b| a.profile.label().to_lowercase().cmp(&b.profile.label().to_lowercase()));
    Ok(friends)
}

pub fn list_pending(state: &SharedState) -> Result<PendingRequests> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    Ok(PendingRequests {
        incoming: to_dtos(&db, user_id, db.list_incoming_requests(user_id)?)?,
        outgoing: to_dtos(&db, user_id, db.list_outgoing_requests(user_id)?)?,
    })
}
