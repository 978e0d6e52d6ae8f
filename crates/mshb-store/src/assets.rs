//! Custom emoji, stickers and soundboard clips attached to a server.

use rusqlite::params;
use uuid::Uuid;

use mshb_shared::types::{AssetKind, ServerId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ServerAsset;
use crate::rows::{collect_rows, enum_at, now, ts, ts_at, uuid_at};

impl Database {
    /// Register an uploaded asset. Owners and admins only; names are unique
    /// per server and kind.
    pub fn add_server_asset(
        &self,
        server: ServerId,
        acting: UserId,
        kind: AssetKind,
        name: &str,
        url: &str,
    ) -> Result<ServerAsset> {
        self.require_manager(server, acting)?;

        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == ' ') {
            return Err(StoreError::Invalid(format!("invalid asset name: {name:?}")));
        }

        let asset = ServerAsset {
            id: Uuid::new_v4(),
            server_id: server,
            kind,
            name: name.to_string(),
            url: url.to_string(),
            uploaded_by: acting,
            created_at: now(),
        };
        self.conn()
            .execute(
                "INSERT INTO server_assets (id, server_id, kind, name, url, uploaded_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    asset.id.to_string(),
                    server.to_string(),
                    kind.as_str(),
                    asset.name,
                    asset.url,
                    acting.to_string(),
                    ts(&asset.created_at),
                ],
            )
            .map_err(|e| StoreError::conflict_or(e, "asset name already used"))?;

        self.emit_insert("server_assets", &asset)?;
        Ok(asset)
    }

    pub fn list_server_assets(&self, server: ServerId, kind: AssetKind) -> Result<Vec<ServerAsset>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, server_id, kind, name, url, uploaded_by, created_at
             FROM server_assets
             WHERE server_id = ?1 AND kind = ?2
             ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map(params![server.to_string(), kind.as_str()], |row| {
            Ok(ServerAsset {
                id: uuid_at(row, 0)?,
                server_id: uuid_at(row, 1)?,
                kind: enum_at(row, 2)?,
                name: row.get(3)?,
                url: row.get(4)?,
                uploaded_by: uuid_at(row, 5)?,
                created_at: ts_at(row, 6)?,
            })
        })?;
        collect_rows(rows)
    }

    /// Remove an asset row. Returns the removed row so the caller can delete
    /// the stored object as well.
    pub fn remove_server_asset(&self, server: ServerId, acting: UserId, id: Uuid) -> Result<ServerAsset> {
        self.require_manager(server, acting)?;

        let mut found = None;
        for kind in [AssetKind::Emoji, AssetKind::Sticker, AssetKind::Sound] {
            if let Some(asset) = self
                .list_server_assets(server, kind)?
                .into_iter()
                .find(|a| a.id == id)
            {
                found = Some(asset);
                break;
            }
        }
        let asset = found.ok_or(StoreError::NotFound)?;

        self.conn().execute(
            "DELETE FROM server_assets WHERE id = ?1",
            params![id.to_string()],
        )?;
        self.emit_delete("server_assets", &asset)?;
        Ok(asset)
    }
}
