//! Desktop shell integration: single instance, installer hooks, deep
//! links, auto-update and window IPC.

pub mod deeplink;
pub mod ipc;
pub mod single_instance;
pub mod squirrel;
pub mod updater;
