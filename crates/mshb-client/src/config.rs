//! Client configuration loaded from environment variables.

use std::path::PathBuf;

use directories::ProjectDirs;
use mshb_shared::constants::{DEFAULT_INSTANCE_PORT, STUN_SERVER};

const DEFAULT_PUBLIC_URL: &str = "http://localhost:54321";
const DEFAULT_UPDATE_FEED: &str = "https://updates.mshb.app/latest.json";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Database, buckets and settings live below this directory.
    pub data_dir: PathBuf,
    /// Base of public object URLs.
    pub public_url: String,
    pub update_feed: String,
    pub stun_server: String,
    /// Loopback port used for the single-instance lock.
    pub instance_port: u16,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("MSHB_DATA_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| ProjectDirs::from("app", "mshb", "mshb").map(|d| d.data_dir().to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("./mshb-data"));

        let public_url = std::env::var("MSHB_PUBLIC_URL").unwrap_or_else(|_| DEFAULT_PUBLIC_URL.to_string());
        let update_feed = std::env::var("MSHB_UPDATE_FEED").unwrap_or_else(|_| DEFAULT_UPDATE_FEED.to_string());
        let stun_server = std::env::var("MSHB_STUN_SERVER").unwrap_or_else(|_| STUN_SERVER.to_string());
        let instance_port = std::env::var("MSHB_INSTANCE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_INSTANCE_PORT);

        Self {
            data_dir,
            public_url,
            update_feed,
            stun_server,
            instance_port,
        }
    }

    /// Configuration rooted in an arbitrary directory, for tests and
    /// throwaway sessions.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: dir.into(),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            update_feed: DEFAULT_UPDATE_FEED.to_string(),
            stun_server: STUN_SERVER.to_string(),
            instance_port: DEFAULT_INSTANCE_PORT,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("mshb.db")
    }

    pub fn buckets_dir(&self) -> PathBuf {
        self.data_dir.join("buckets")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }
}
