//! Handles to the platform services: tables, buckets and realtime.

use std::sync::{Arc, Mutex, MutexGuard};

use mshb_realtime::{spawn_hub, ChangeFilter, ChangeStream, RealtimeHub};
use mshb_store::{BucketStore, Database};
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[derive(Clone)]
pub struct Platform {
    db: Arc<Mutex<Database>>,
    pub storage: Arc<BucketStore>,
    pub realtime: RealtimeHub,
}

impl Platform {
    /// Open the on-disk database and buckets below the configured data
    /// directory and start the realtime hub.
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let db = Database::open_at(&config.database_path())?;
        let storage = BucketStore::new(config.buckets_dir(), &config.public_url).await?;

        info!(dir = %config.data_dir.display(), "platform opened");
        Ok(Self::from_parts(db, storage))
    }

    /// In-memory tables with buckets under `config.data_dir`.
    pub async fn ephemeral(config: &ClientConfig) -> Result<Self> {
        let db = Database::open_in_memory()?;
        let storage = BucketStore::new(config.buckets_dir(), &config.public_url).await?;
        Ok(Self::from_parts(db, storage))
    }

    fn from_parts(db: Database, storage: BucketStore) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            storage: Arc::new(storage),
            realtime: spawn_hub(),
        }
    }

    /// Lock the database. Never hold the guard across an `.await`.
    pub fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db.lock().map_err(|_| ClientError::LockPoisoned)
    }

    /// Row changes matching `filter` from this point on.
    pub fn changes(&self, filter: ChangeFilter) -> Result<ChangeStream> {
        Ok(ChangeStream::new(self.db()?.subscribe_changes(), filter))
    }
}
