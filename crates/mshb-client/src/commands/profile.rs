use serde::Deserialize;
use tracing::{debug, info};

use mshb_shared::types::{Bucket, UserId, UserStatus};
use mshb_store::storage::object_key;
use mshb_store::{Profile, ProfileUpdate};

use crate::error::{ClientError, Result};
use crate::platform::Platform;
use crate::state::{signed_in, SharedState};

use super::presence;

pub const MAX_DISPLAY_NAME: usize = 32;
pub const MAX_CUSTOM_STATUS: usize = 128;
pub const SEARCH_LIMIT: u32 = 20;

/// Fields the user can edit directly. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEdit {
    pub display_name: Option<String>,
    pub custom_status: Option<String>,
    pub language: Option<String>,
}

pub fn get_my_profile(state: &SharedState) -> Result<Profile> {
    let (user_id, platform) = signed_in(state)?;
    let profile = platform.db()?.get_profile(user_id)?;
    Ok(profile)
}

pub fn get_profile(state: &SharedState, user_id: UserId) -> Result<Profile> {
    let (_, platform) = signed_in(state)?;
    let profile = platform.db()?.get_profile(user_id)?;
    Ok(profile)
}

pub fn update_profile(state: &SharedState, edit: ProfileEdit) -> Result<Profile> {
    let (user_id, platform) = signed_in(state)?;

    let display_name = edit.display_name.map(|s| s.trim().to_string());
    if display_name.as_ref().is_some_and(|s| s.chars().count() > MAX_DISPLAY_NAME) {
        return Err(ClientError::Invalid(format!(
            "Display name is limited to {MAX_DISPLAY_NAME} characters"
        )));
    }
    let custom_status = edit.custom_status.map(|s| s.trim().to_string());
    if custom_status.as_ref().is_some_and(|s| s.chars().count() > MAX_CUSTOM_STATUS) {
        return Err(ClientError::Invalid(format!(
            "Custom status is limited to {MAX_CUSTOM_STATUS} characters"
        )));
    }

    let update = ProfileUpdate {
        display_name,
        custom_status,
        language: edit.language,
        ..Default::default()
    };
    let profile = platform.db()?.update_profile(user_id, &update)?;
    info!(user = %user_id.short(), "Profile updated");
    Ok(profile)
}

pub async fn set_status(state: &SharedState, status: UserStatus) -> Result<Profile> {
    let (user_id, platform) = signed_in(state)?;
    let profile = platform.db()?.set_status(user_id, status)?;
    presence::refresh(state, status).await?;
    debug!(user = %user_id.short(), status = %status, "Status changed");
    Ok(profile)
}

#[derive(Clone, Copy)]
enum ProfileImage {
    Avatar,
    Banner,
}

async fn upload_profile_image(
    state: &SharedState,
    image: ProfileImage,
    file_name: &str,
    data: &[u8],
) -> Result<Profile> {
    let (user_id, platform) = signed_in(state)?;
    let key = object_key(&user_id.to_string(), file_name, data);
    let url = platform.storage.upload(Bucket::Avatars, &key, data).await?;

    let (update, previous) = {
        let current = platform.db()?.get_profile(user_id)?;
        match image {
            ProfileImage::Avatar => (
                ProfileUpdate {
                    avatar_url: Some(url.clone()),
                    ..Default::default()
                },
                current.avatar_url,
            ),
            ProfileImage::Banner => (
                ProfileUpdate {
                    banner_url: Some(url.clone()),
                    ..Default::default()
                },
                current.banner_url,
            ),
        }
    };
    let profile = platform.db()?.update_profile(user_id, &update)?;

    if let Some(previous) = previous.filter(|p| *p != url) {
        remove_object(&platform, &previous).await;
    }
    Ok(profile)
}

pub async fn upload_avatar(state: &SharedState, file_name: &str, data: &[u8]) -> Result<Profile> {
    upload_profile_image(state, ProfileImage::Avatar, file_name, data).await
}

pub async fn upload_banner(state: &SharedState, file_name: &str, data: &[u8]) -> Result<Profile> {
    upload_profile_image(state, ProfileImage::Banner, file_name, data).await
}

pub fn search_users(state: &SharedState, query: &str) -> Result<Vec<Profile>> {
    let (user_id, platform) = signed_in(state)?;
    let mut profiles = platform
        .db()?
        .search_profiles(&query.trim().to_lowercase(), SEARCH_LIMIT)?;
    profiles.retain(|p| p.id != user_id);
    Ok(profiles)
}

/// Delete an object by its public URL. Failures are only logged.
pub(crate) async fn remove_object(platform: &Platform, url: &str) {
    let Some((bucket, path)) = platform.storage.parse_public_url(url) else {
        return;
    };
    if let Err(e) = platform.storage.remove(bucket, &path).await {
        debug!(url, error = %e, "Could not remove object");
    }
}
