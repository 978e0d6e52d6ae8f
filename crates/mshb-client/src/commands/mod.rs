//! Operations the UI invokes.
//!
//! Each sub-module groups related commands by domain. Every command takes
//! the [`SharedState`](crate::state::SharedState) and returns
//! [`Result`](crate::error::Result); DTOs serialize camelCase.

pub mod auth;
pub mod billing;
pub mod friends;
pub mod groups;
pub mod messaging;
pub mod presence;
pub mod profile;
pub mod servers;
pub mod settings;
pub mod voice;
