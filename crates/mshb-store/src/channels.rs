//! CRUD operations for [`Channel`] records.

use rusqlite::params;

use mshb_shared::types::{ChannelId, ChannelKind, ServerId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Channel;
use crate::rows::{collect_rows, enum_at, now, ts, ts_at, uuid_at};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Append a channel after the existing ones. Owners and admins only.
    pub fn create_channel(
        &self,
        server: ServerId,
        acting: UserId,
        name: &str,
        kind: ChannelKind,
    ) -> Result<Channel> {
        self.require_manager(server, acting)?;
        let name = channel_name(name)?;

        let position: i64 = self.conn().query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM channels WHERE server_id = ?1",
            params![server.to_string()],
            |row| row.get(0),
        )?;
        let channel = Channel {
            id: ChannelId::new(),
            server_id: server,
            name,
            kind,
            position,
            created_at: now(),
        };

        self.conn().execute(
            "INSERT INTO channels (id, server_id, name, kind, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                channel.id.to_string(),
                server.to_string(),
                channel.name,
                kind.as_str(),
                position,
                ts(&channel.created_at),
            ],
        )?;

        tracing::debug!(channel = %channel.id.short(), kind = %kind, "channel created");
        self.emit_insert("channels", &channel)?;
        Ok(channel)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_channel(&self, id: ChannelId) -> Result<Channel> {
        self.conn()
            .query_row(
                "SELECT id, server_id, name, kind, position, created_at
                 FROM channels
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_channel,
            )
            .map_err(StoreError::not_found_or)
    }

    /// All channels of a server in display order.
    pub fn list_channels(&self, server: ServerId) -> Result<Vec<Channel>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, server_id, name, kind, position, created_at
             FROM channels
             WHERE server_id = ?1
             ORDER BY position ASC, created_at ASC",
        )?;
        let rows = stmt.query_map(params![server.to_string()], row_to_channel)?;
        collect_rows(rows)
    }

    // ------------------------------------------------------------------
    // Update / Delete
    // ------------------------------------------------------------------

    pub fn rename_channel(&self, id: ChannelId, acting: UserId, name: &str) -> Result<Channel> {
        let mut channel = self.get_channel(id)?;
        self.require_manager(channel.server_id, acting)?;
        channel.name = channel_name(name)?;

        self.conn().execute(
            "UPDATE channels SET name = ?2 WHERE id = ?1",
            params![id.to_string(), channel.name],
        )?;
        self.emit_update("channels", &channel)?;
        Ok(channel)
    }

    /// Delete a channel and its messages. Clears the server's system
    /// channel if it pointed here.
    pub fn delete_channel(&self, id: ChannelId, acting: UserId) -> Result<()> {
        let channel = self.get_channel(id)?;
        self.require_manager(channel.server_id, acting)?;

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE servers SET system_channel_id = NULL WHERE system_channel_id = ?1",
            params![id.to_string()],
        )?;
        tx.execute("DELETE FROM channels WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        tracing::debug!(channel = %id.short(), "channel deleted");
        self.emit_delete("channels", &channel)?;
        Ok(())
    }
}

fn channel_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(StoreError::Invalid("channel name must be 1-100 characters".into()));
    }
    Ok(name.to_string())
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: uuid_at(row, 0)?,
        server_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        kind: enum_at(row, 3)?,
        position: row.get(4)?,
        created_at: ts_at(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{db, user};

    #[test]
    fn channels_append_in_position_order() {
        let db = db();
        let owner = user(&db, "owner");
        let (server, _) = db.create_server(owner, "guild").unwrap();

        let c = db
            .create_channel(server.id, owner, "music", ChannelKind::Voice)
            .unwrap();
        assert_eq!(c.position, 2);

        let names: Vec<_> = db
            .list_channels(server.id)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["general", "General", "music"]);
    }

    #[test]
    fn members_cannot_manage_channels() {
        let db = db();
        let owner = user(&db, "owner");
        let member = user(&db, "member");
        let (server, channels) = db.create_server(owner, "guild").unwrap();
        db.add_server_member(server.id, member).unwrap();

        assert!(db
            .create_channel(server.id, member, "x", ChannelKind::Text)
            .is_err());
        assert!(db.rename_channel(channels[0].id, member, "y").is_err());
        assert!(db.delete_channel(channels[0].id, member).is_err());
    }

    #[test]
    fn deleting_system_channel_clears_setting() {
        let db = db();
        let owner = user(&db, "owner");
        let (server, channels) = db.create_server(owner, "guild").unwrap();

        let renamed = db.rename_channel(channels[0].id, owner, " lobby ").unwrap();
        assert_eq!(renamed.name, "lobby");

        db.delete_channel(channels[0].id, owner).unwrap();
        assert_eq!(db.get_server(server.id).unwrap().system_channel_id, None);
        assert_eq!(db.list_channels(server.id).unwrap().len(), 1);
    }
}
