//! Windows installer hooks.
//!
//! Squirrel launches the app with one of its `--squirrel-*` flags around
//! install, update and uninstall. Those launches must do their work and
//! exit without opening a window.

use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquirrelEvent {
    Install,
    Updated,
    Uninstall,
    Obsolete,
    FirstRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquirrelAction {
    CreateShortcuts,
    RemoveShortcuts,
    /// Exit immediately, a newer version is taking over.
    Exit,
    /// Start normally.
    Continue,
}

impl SquirrelEvent {
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "--squirrel-install" => Some(Self::Install),
            "--squirrel-updated" => Some(Self::Updated),
            "--squirrel-uninstall" => Some(Self::Uninstall),
            "--squirrel-obsolete" => Some(Self::Obsolete),
            "--squirrel-firstrun" => Some(Self::FirstRun),
            _ => None,
        }
    }

    /// The first squirrel flag among the process arguments.
    pub fn from_args<I, S>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        args.into_iter().find_map(|a| Self::from_flag(a.as_ref()))
    }

    pub fn action(self) -> SquirrelAction {
        match self {
            Self::Install | Self::Updated => SquirrelAction::CreateShortcuts,
            Self::Uninstall => SquirrelAction::RemoveShortcuts,
            Self::Obsolete => SquirrelAction::Exit,
            Self::FirstRun => SquirrelAction::Continue,
        }
    }

    /// Whether the process should quit once the action is done.
    pub fn should_exit(self) -> bool {
        self.action() != SquirrelAction::Continue
    }
}

/// Carry out `action` through Squirrel's `Update.exe`, which sits one
/// directory above the installed executable.
pub fn perform(action: SquirrelAction, exe: &Path) -> Result<()> {
    let flag = match action {
        SquirrelAction::CreateShortcuts => "--createShortcut",
        SquirrelAction::RemoveShortcuts => "--removeShortcut",
        SquirrelAction::Exit | SquirrelAction::Continue => return Ok(()),
    };

    let Some(exe_name) = exe.file_name().and_then(|n| n.to_str()) else {
        warn!(exe = %exe.display(), "Cannot derive executable name for shortcuts");
        return Ok(());
    };
    let Some(update_exe) = exe.parent().and_then(Path::parent).map(|d| d.join("Update.exe")) else {
        return Ok(());
    };

    if !cfg!(windows) || !update_exe.exists() {
        info!(?action, "Squirrel action skipped on this platform");
        return Ok(());
    }

    let status = std::process::Command::new(&update_exe)
        .arg(format!("{flag}={exe_name}"))
        .status()?;
    info!(?action, %status, "Squirrel action finished");
    Ok(())
}
