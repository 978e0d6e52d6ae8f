use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tracing::{info, warn};

use mshb_shared::types::UserId;
use mshb_store::Profile;

use crate::error::{ClientError, Result};
use crate::events::spawn_change_bridge;
use crate::state::{Session, SharedState};

use super::presence;
use super::voice;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;

fn validate_username(username: &str) -> Result<()> {
    if !USERNAME_LEN.contains(&username.len()) {
        return Err(ClientError::Invalid("Username must be 3 to 32 characters".into()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
    {
        return Err(ClientError::Invalid(
            "Username may only contain a-z, 0-9, '_' and '.'".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') => Ok(()),
        _ => Err(ClientError::Invalid("Invalid email address".into())),
    }
}

async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| ClientError::Hash(e.to_string()))
    })
    .await
    .map_err(|e| ClientError::Hash(e.to_string()))?
}

async fn verify_password(password: String, stored: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored).map_err(|e| ClientError::Hash(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| ClientError::Hash(e.to_string()))?
}

/// Register a new account and sign it in.
pub async fn sign_up(state: &SharedState, email: &str, password: &str, username: &str) -> Result<Profile> {
    let email = email.trim().to_lowercase();
    let username = username.trim().to_lowercase();
    validate_email(&email)?;
    validate_username(&username)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ClientError::Invalid(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password_hash = hash_password(password.to_string()).await?;
    let platform = state.lock()?.platform.clone();

    let user_id = UserId::new();
    let profile = {
        let db = platform.db()?;
        if db.find_auth_user_by_email(&email)?.is_some() {
            return Err(ClientError::Invalid("Email already registered".into()));
        }
        db.register_user(user_id, &username, &email, &password_hash)?
    };

    info!(user = %user_id.short(), username = %profile.username, "Account created");
    start_session(state, user_id, email)?;
    Ok(profile)
}

/// Sign in with an email address or a username.
pub async fn sign_in(state: &SharedState, login: &str, password: &str) -> Result<Profile> {
    let login = login.trim().to_lowercase();
    let platform = state.lock()?.platform.clone();

    let auth = {
        let db = platform.db()?;
        let email = if login.contains('@') {
            Some(login.clone())
        } else {
            db.get_email_by_username(&login)?
        };
        match email {
            Some(email) => db.find_auth_user_by_email(&email)?,
            None => None,
        }
    };
    let Some(auth) = auth else {
        return Err(ClientError::InvalidCredentials);
    };

    if !verify_password(password.to_string(), auth.password_hash.clone()).await? {
        warn!(user = %auth.id.short(), "Rejected sign in");
        return Err(ClientError::InvalidCredentials);
    }

    let profile = {
        let db = platform.db()?;
        // A crash mid-call leaves our participant rows behind.
        let stale = db.remove_voice_rows_for_user(auth.id)?;
        if stale > 0 {
            info!(user = %auth.id.short(), stale, "Removed stale voice rows");
        }
        db.get_profile(auth.id)?
    };

    start_session(state, auth.id, auth.email)?;
    info!(user = %auth.id.short(), "Signed in");
    Ok(profile)
}

fn start_session(state: &SharedState, user_id: UserId, email: String) -> Result<()> {
    let mut guard = state.lock()?;
    if let Some(bridge) = guard.change_bridge.take() {
        bridge.abort();
    }
    let bridge = spawn_change_bridge(guard.platform.clone(), user_id, guard.events.clone())?;
    guard.change_bridge = Some(bridge);
    guard.session = Some(Session { user_id, email });
    Ok(())
}

/// Leave any call, drop presence and forget the session.
pub async fn sign_out(state: &SharedState) -> Result<()> {
    if state.lock()?.session.is_none() {
        return Ok(());
    }

    if state.lock()?.voice.is_some() {
        voice::leave_voice(state).await?;
    }
    presence::go_offline(state).await?;

    let mut guard = state.lock()?;
    if let Some(bridge) = guard.change_bridge.take() {
        bridge.abort();
    }
    if let Some(session) = guard.session.take() {
        info!(user = %session.user_id.short(), "Signed out");
    }
    Ok(())
}

pub fn current_user(state: &SharedState) -> Result<Option<Profile>> {
    let guard = state.lock()?;
    match &guard.session {
        Some(session) => Ok(Some(guard.platform.db()?.get_profile(session.user_id)?)),
        None => Ok(None),
    }
}
