use chrono::Duration;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use mshb_shared::invite::invite_link;
use mshb_shared::types::{AssetKind, Bucket, ChannelId, ChannelKind, ServerId, ServerRole, UserId};
use mshb_store::storage::object_key;
use mshb_store::{Channel, Profile, Server, ServerAsset, ServerInvite, ServerSettingsUpdate};

use crate::error::{ClientError, Result};
use crate::platform::Platform;
use crate::state::{signed_in, SharedState};

use super::profile::remove_object;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDto {
    pub server: Server,
    pub role: ServerRole,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMemberDto {
    pub profile: Profile,
    pub role: ServerRole,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteDto {
    pub invite: ServerInvite,
    pub link: String,
}

/// What a user sees before accepting an invite.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePreview {
    pub server: Server,
    pub member_count: usize,
    pub already_member: bool,
}

fn require_manager(platform: &Platform, server: ServerId, user: UserId) -> Result<()> {
    let role = platform.db()?.member_role(server, user)?;
    if role.is_some_and(|r| r.can_manage()) {
        Ok(())
    } else {
        Err(ClientError::Invalid("Only owners and admins can do that".into()))
    }
}

/// Create a server with its default text and voice channels.
pub fn create_server(state: &SharedState, name: &str) -> Result<(Server, Vec<Channel>)> {
    let (user_id, platform) = signed_in(state)?;
    let created = platform.db()?.create_server(user_id, name)?;
    info!(server = %created.0.id.short(), owner = %user_id.short(), "Server created");
    Ok(created)
}

pub fn update_server_settings(state: &SharedState, server: ServerId, update: ServerSettingsUpdate) -> Result<Server> {
    let (user_id, platform) = signed_in(state)?;
    let server = platform.db()?.update_server(server, user_id, &update)?;
    Ok(server)
}

pub async fn upload_server_icon(state: &SharedState, server: ServerId, file_name: &str, data: &[u8]) -> Result<Server> {
    let (user_id, platform) = signed_in(state)?;
    require_manager(&platform, server, user_id)?;

    let key = object_key(&server.to_string(), file_name, data);
    let url = platform.storage.upload(Bucket::ServerAssets, &key, data).await?;
    let update = ServerSettingsUpdate {
        icon_url: Some(url),
        ..Default::default()
    };
    let updated = platform.db()?.update_server(server, user_id, &update)?;
    Ok(updated)
}

/// Owner only.
pub fn delete_server(state: &SharedState, server: ServerId) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.delete_server(server, user_id)?;
    info!(server = %server.short(), "Server deleted");
    Ok(())
}

pub fn list_servers(state: &SharedState) -> Result<Vec<ServerDto>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    let mut out = Vec::new();
    for server in db.list_servers_for_user(user_id)? {
        if let Some(role) = db.member_role(server.id, user_id)? {
            out.push(ServerDto { server, role });
        }
    }
    Ok(out)
}

pub fn server_members(state: &SharedState, server: ServerId) -> Result<Vec<ServerMemberDto>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    if db.member_role(server, user_id)?.is_none() {
        return Err(ClientError::Invalid("Not a member of this server".into()));
    }

    let mut members = Vec::new();
    for member in db.list_server_members(server)? {
        members.push(ServerMemberDto {
            profile: db.get_profile(member.user_id)?,
            role: member.role,
        });
    }
    Ok(members)
}

pub fn kick_member(state: &SharedState, server: ServerId, user: UserId) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.remove_server_member(server, user_id, user)?;
    info!(server = %server.short(), user = %user.short(), by = %user_id.short(), "Member kicked");
    Ok(())
}

pub fn set_member_role(state: &SharedState, server: ServerId, user: UserId, role: ServerRole) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.set_member_role(server, user_id, user, role)?;
    Ok(())
}

pub fn leave_server(state: &SharedState, server: ServerId) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.remove_server_member(server, user_id, user_id)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

pub fn create_channel(state: &SharedState, server: ServerId, name: &str, kind: ChannelKind) -> Result<Channel> {
    let (user_id, platform) = signed_in(state)?;
    let channel = platform.db()?.create_channel(server, user_id, name, kind)?;
    Ok(channel)
}

pub fn rename_channel(state: &SharedState, channel: ChannelId, name: &str) -> Result<Channel> {
    let (user_id, platform) = signed_in(state)?;
    let channel = platform.db()?.rename_channel(channel, user_id, name)?;
    Ok(channel)
}

pub fn delete_channel(state: &SharedState, channel: ChannelId) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.delete_channel(channel, user_id)?;
    Ok(())
}

pub fn list_channels(state: &SharedState, server: ServerId) -> Result<Vec<Channel>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    if db.member_role(server, user_id)?.is_none() {
        return Err(ClientError::Invalid("Not a member of this server".into()));
    }
    Ok(db.list_channels(server)?)
}

// ---------------------------------------------------------------------------
// Invites
// ---------------------------------------------------------------------------

pub fn create_invite(
    state: &SharedState,
    server: ServerId,
    max_uses: Option<i64>,
    expires_in_hours: Option<i64>,
) -> Result<InviteDto> {
    let (user_id, platform) = signed_in(state)?;
    let invite = platform
        .db()?
        .create_invite(server, user_id, max_uses, expires_in_hours.map(Duration::hours))?;
    let link = invite_link(&invite.code);
    Ok(InviteDto { invite, link })
}

/// Look up an invite without redeeming it. Accepts a code or a link.
pub fn preview_invite(state: &SharedState, link: &str) -> Result<InvitePreview> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    let server_id = db.get_server_id_by_invite_link(link)?;
    Ok(InvitePreview {
        server: db.get_server(server_id)?,
        member_count: db.list_server_members(server_id)?.len(),
        already_member: db.member_role(server_id, user_id)?.is_some(),
    })
}

pub fn join_server(state: &SharedState, link: &str) -> Result<Server> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    let server_id = db.use_invite(link, user_id)?;
    Ok(db.get_server(server_id)?)
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Upload a custom emoji, sticker or sound to the server's assets.
pub async fn upload_server_asset(
    state: &SharedState,
    server: ServerId,
    kind: AssetKind,
    name: &str,
    file_name: &str,
    data: &[u8],
) -> Result<ServerAsset> {
    let (user_id, platform) = signed_in(state)?;
    require_manager(&platform, server, user_id)?;

    let key = object_key(&format!("{server}/{kind}"), file_name, data);
    let url = platform.storage.upload(Bucket::ServerAssets, &key, data).await?;

    let added = platform.db()?.add_server_asset(server, user_id, kind, name, &url);
    match added {
        Ok(asset) => Ok(asset),
        Err(e) => {
            warn!(server = %server.short(), error = %e, "Asset rejected, removing upload");
            remove_object(&platform, &url).await;
            Err(e.into())
        }
    }
}

pub fn list_server_assets(state: &SharedState, server: ServerId, kind: AssetKind) -> Result<Vec<ServerAsset>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    if db.member_role(server, user_id)?.is_none() {
        return Err(ClientError::Invalid("Not a member of this server".into()));
    }
    Ok(db.list_server_assets(server, kind)?)
}

pub async fn remove_server_asset(state: &SharedState, server: ServerId, asset: Uuid) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    let removed = platform.db()?.remove_server_asset(server, user_id, asset)?;
    remove_object(&platform, &removed.url).await;
    Ok(())
}
