use tracing::info;

use crate::error::Result;
use crate::settings::AppSettings;
use crate::state::SharedState;

pub fn get_settings(state: &SharedState) -> Result<AppSettings> {
    Ok(state.lock()?.settings.clone())
}

/// Normalize, persist and apply new settings. Returns what was stored.
pub fn update_settings(state: &SharedState, settings: AppSettings) -> Result<AppSettings> {
    let settings = settings.normalized();
    let mut guard = state.lock()?;
    settings.save(&guard.config.settings_path())?;
    guard.settings = settings.clone();

    info!(theme = %settings.theme, zoom = settings.zoom, "Settings updated");
    Ok(settings)
}
