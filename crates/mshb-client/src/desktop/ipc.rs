//! Window-level requests from the UI.
//!
//! The renderer may only reach the shell through these four channels;
//! anything else is refused.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ClientError, Result};

pub const GET_DISPLAY_SOURCES: &str = "get-display-sources";
pub const SET_FULLSCREEN: &str = "set-fullscreen";
pub const GET_FULLSCREEN: &str = "get-fullscreen";
pub const RESTART_APP: &str = "restart-app";

/// A screen or window offered for screen sharing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaySource {
    pub id: String,
    pub name: String,
    /// Data URL of a small preview, when the platform provides one.
    pub thumbnail: Option<String>,
}

pub trait DesktopShell: Send + Sync {
    fn display_sources(&self) -> Result<Vec<DisplaySource>>;
    fn set_fullscreen(&self, fullscreen: bool) -> Result<()>;
    fn is_fullscreen(&self) -> bool;
    fn restart(&self) -> Result<()>;
}

#[derive(Deserialize)]
struct FullscreenArgs {
    fullscreen: bool,
}

/// Route one UI request to the shell.
pub fn dispatch(shell: &dyn DesktopShell, channel: &str, payload: Value) -> Result<Value> {
    debug!(channel, "IPC request");
    match channel {
        GET_DISPLAY_SOURCES => Ok(serde_json::to_value(shell.display_sources()?)?),
        SET_FULLSCREEN => {
            // Either a bare bool or `{ "fullscreen": bool }`.
            let fullscreen = match payload {
                Value::Bool(b) => b,
                other => serde_json::from_value::<FullscreenArgs>(other)?.fullscreen,
            };
            shell.set_fullscreen(fullscreen)?;
            Ok(json!(shell.is_fullscreen()))
        }
        GET_FULLSCREEN => Ok(json!(shell.is_fullscreen())),
        RESTART_APP => {
            shell.restart()?;
            Ok(Value::Null)
        }
        other => Err(ClientError::Invalid(format!("Unknown IPC channel: {other}"))),
    }
}

/// Shell used when no window exists. Offers the whole screen as the only
/// capture source and records requests.
#[derive(Debug, Default)]
pub struct HeadlessShell {
    fullscreen: AtomicBool,
    restart_requested: AtomicBool,
}

impl HeadlessShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restart_requested(&self) -> bool {
        self.restart_requested.load(Ordering::Relaxed)
    }
}

impl DesktopShell for HeadlessShell {
    fn display_sources(&self) -> Result<Vec<DisplaySource>> {
        Ok(vec![DisplaySource {
            id: "screen:0".into(),
            name: "Entire screen".into(),
            thumbnail: None,
        }])
    }

    fn set_fullscreen(&self, fullscreen: bool) -> Result<()> {
        self.fullscreen.store(fullscreen, Ordering::Relaxed);
        Ok(())
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen.load(Ordering::Relaxed)
    }

    fn restart(&self) -> Result<()> {
        self.restart_requested.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullscreen_round_trip() {
        let shell = HeadlessShell::new();
        assert_eq!(dispatch(&shell, GET_FULLSCREEN, Value::Null).unwrap(), json!(false));
        assert_eq!(dispatch(&shell, SET_FULLSCREEN, json!(true)).unwrap(), json!(true));
        assert_eq!(
            dispatch(&shell, SET_FULLSCREEN, json!({ "fullscreen": false })).unwrap(),
            json!(false)
        );
        assert!(dispatch(&shell, SET_FULLSCREEN, json!("yes")).is_err());
    }

    #[test]
    fn sources_and_restart() {
        let shell = HeadlessShell::new();
        let sources = dispatch(&shell, GET_DISPLAY_SOURCES, Value::Null).unwrap();
        assert_eq!(sources[0]["id"], "screen:0");

        dispatch(&shell, RESTART_APP, Value::Null).unwrap();
        assert!(shell.restart_requested());
    }

    #[test]
    fn unknown_channels_are_refused() {
        let shell = HeadlessShell::new();
        assert!(dispatch(&shell, "open-devtools", Value::Null).is_err());
    }
}
