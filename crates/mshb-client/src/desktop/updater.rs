//! Auto-update check against a JSON release feed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use mshb_shared::constants::UPDATE_CHECK_INTERVAL_SECS;

use crate::error::Result;
use crate::events::{emit_event, ClientEvent};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Latest release as published in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub pub_date: Option<String>,
}

pub fn current_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Numeric dotted comparison: `true` if `a` is newer than `b`.
/// A leading `v` and pre-release suffixes are ignored.
pub fn is_newer(a: &str, b: &str) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.trim()
            .trim_start_matches('v')
            .split(['-', '+'])
            .next()
            .unwrap_or_default()
            .split('.')
            .filter_map(|s| s.parse::<u64>().ok())
            .collect()
    };

    let va = parse(a);
    let vb = parse(b);
    for i in 0..va.len().max(vb.len()) {
        let a_part = va.get(i).copied().unwrap_or(0);
        let b_part = vb.get(i).copied().unwrap_or(0);
        if a_part != b_part {
            return a_part > b_part;
        }
    }
    false
}

/// Fetch the feed and return the release if it is newer than `current`.
pub async fn check_for_update(feed_url: &str, current: &str) -> Result<Option<UpdateInfo>> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let latest: UpdateInfo = client
        .get(feed_url)
        .header("User-Agent", "mshb-updater")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    if is_newer(&latest.version, current) {
        Ok(Some(latest))
    } else {
        Ok(None)
    }
}

/// Check now and then every hour, announcing each newer version once.
pub fn spawn_update_checker(feed_url: String, events: broadcast::Sender<ClientEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(UPDATE_CHECK_INTERVAL_SECS));
        let mut announced: Option<String> = None;

        loop {
            ticker.tick().await;
            match check_for_update(&feed_url, current_version()).await {
                Ok(Some(update)) if announced.as_deref() != Some(update.version.as_str()) => {
                    info!(version = %update.version, "Update available");
                    announced = Some(update.version.clone());
                    emit_event(&events, ClientEvent::UpdateAvailable(update));
                }
                Ok(_) => debug!("No update"),
                // Offline is normal; try again next tick.
                Err(e) => debug!(error = %e, "Update check failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comparison() {
        assert!(is_newer("0.2.0", "0.1.0"));
        assert!(is_newer("v1.0.0", "0.9.9"));
        assert!(is_newer("1.0.1", "1.0.0"));
        assert!(is_newer("1.1", "1.0.9"));
        assert!(!is_newer("1.0.0", "1.0.0"));
        assert!(!is_newer("1.0.0-beta.2", "1.0.0"));
        assert!(!is_newer("0.9", "1.0.0"));
    }

    #[test]
    fn feed_parses_with_optional_fields() {
        let info: UpdateInfo =
            serde_json::from_str(r#"{"version":"1.2.0","url":"https://example.com/mshb.exe"}"#).unwrap();
        assert_eq!(info.version, "1.2.0");
        assert!(info.notes.is_none());
    }

    #[tokio::test]
    async fn unreachable_feed_is_an_error() {
        assert!(check_for_update("http://127.0.0.1:9/latest.json", "0.1.0").await.is_err());
    }
}
