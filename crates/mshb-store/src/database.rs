//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. It also owns the sending
//! half of the change feed: each CRUD helper publishes the row it touched.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use mshb_shared::types::RowChange;
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Buffered change notifications per subscriber before it starts lagging.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    changes: broadcast::Sender<RowChange>,
}

impl Database {
    /// Open (or create) the default platform database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/mshb/mshb.db`
    /// - macOS:   `~/Library/Application Support/app.mshb.mshb/mshb.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\mshb\mshb\data\mshb.db`
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("app", "mshb", "mshb").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Self::open_at(&data_dir.join("mshb.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self { conn, changes })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// Subscribe to every row change written through this handle.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<RowChange> {
        self.changes.subscribe()
    }

    /// Clone of the change feed sender, for bridging into the realtime hub.
    pub fn change_sender(&self) -> broadcast::Sender<RowChange> {
        self.changes.clone()
    }

    pub(crate) fn emit(&self, change: RowChange) {
        tracing::trace!(table = %change.table, kind = %change.kind, "row change");
        // No subscribers is the normal case for headless use.
        let _ = self.changes.send(change);
    }

    pub(crate) fn emit_insert<T: Serialize>(&self, table: &str, row: &T) -> Result<()> {
        self.emit(RowChange::insert(table, serde_json::to_value(row)?));
        Ok(())
    }

    pub(crate) fn emit_update<T: Serialize>(&self, table: &str, row: &T) -> Result<()> {
        self.emit(RowChange::update(table, serde_json::to_value(row)?));
        Ok(())
    }

    pub(crate) fn emit_delete<T: Serialize>(&self, table: &str, row: &T) -> Result<()> {
        self.emit(RowChange::delete(table, serde_json::to_value(row)?));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());

        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[test]
    fn in_memory_has_no_path() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
    }
}
