use rusqlite::{params, OptionalExtension};

use mshb_shared::types::{ChannelId, ChannelKind, ServerId, ServerRole, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Channel, Server, ServerMember, ServerSettingsUpdate};
use crate::rows::{collect_rows, enum_at, now, opt_uuid_at, ts, ts_at, uuid_at};

const SERVER_COLUMNS: &str = "id, name, owner_id, icon_url, banner_url, tag, badge, color, \
     default_notifications, system_channel_id, created_at";

const NOTIFICATION_LEVELS: [&str; 3] = ["all", "mentions", "none"];

impl Database {
    /// Create a server with its owner membership and the default channels.
    ///
    /// Returns the server and its channels: `general` (text, also the
    /// system channel) then `General` (voice).
    pub fn create_server(&self, owner: UserId, name: &str) -> Result<(Server, Vec<Channel>)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("server name is empty".into()));
        }

        let created_at = now();
        let text = Channel {
            id: ChannelId::new(),
            server_id: ServerId::new(),
            name: "general".into(),
            kind: ChannelKind::Text,
            position: 0,
            created_at,
        };
        let server = Server {
            id: text.server_id,
            name: name.to_string(),
            owner_id: owner,
            icon_url: None,
            banner_url: None,
            tag: None,
            badge: None,
            color: None,
            default_notifications: "all".into(),
            system_channel_id: Some(text.id),
            created_at,
        };
        let voice = Channel {
            id: ChannelId::new(),
            server_id: server.id,
            name: "General".into(),
            kind: ChannelKind::Voice,
            position: 1,
            created_at,
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO servers (id, name, owner_id, default_notifications, system_channel_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                server.id.to_string(),
                server.name,
                owner.to_string(),
                server.default_notifications,
                text.id.to_string(),
                ts(&created_at),
            ],
        )?;
        tx.execute(
            "INSERT INTO server_members (server_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                server.id.to_string(),
                owner.to_string(),
                ServerRole::Owner.as_str(),
                ts(&created_at),
            ],
        )?;
        for channel in [&text, &voice] {
            tx.execute(
                "INSERT INTO channels (id, server_id, name, kind, position, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    channel.id.to_string(),
                    server.id.to_string(),
                    channel.name,
                    channel.kind.as_str(),
                    channel.position,
                    ts(&created_at),
                ],
            )?;
        }
        tx.commit()?;

        tracing::info!(server = %server.id.short(), owner = %owner.short(), "server created");
        self.emit_insert("servers", &server)?;
        let channels = vec![text, voice];
        for channel in &channels {
            self.emit_insert("channels", channel)?;
        }
        Ok((server, channels))
    }

    pub fn get_server(&self, id: ServerId) -> Result<Server> {
        self.conn()
            .query_row(
                &format!("SELECT {SERVER_COLUMNS} FROM servers WHERE id = ?1"),
                params![id.to_string()],
                row_to_server,
            )
            .map_err(StoreError::not_found_or)
    }

    /// Servers `user` belongs to, oldest membership first.
    pub fn list_servers_for_user(&self, user: UserId) -> Result<Vec<Server>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {cols} FROM servers s
             JOIN server_members m ON m.server_id = s.id
             WHERE m.user_id = ?1
             ORDER BY m.joined_at ASC",
            cols = prefixed("s", SERVER_COLUMNS)
        ))?;
        let rows = stmt.query_map(params![user.to_string()], row_to_server)?;
        collect_rows(rows)
    }

    /// Apply a settings edit. Owners and admins only.
    pub fn update_server(
        &self,
        id: ServerId,
        acting: UserId,
        update: &ServerSettingsUpdate,
    ) -> Result<Server> {
        self.require_manager(id, acting)?;

        if let Some(level) = update.default_notifications.as_deref() {
            if !NOTIFICATION_LEVELS.contains(&level) {
                return Err(StoreError::Invalid(format!("unknown notification level: {level}")));
            }
        }
        if let Some(name) = update.name.as_deref() {
            if name.trim().is_empty() {
                return Err(StoreError::Invalid("server name is empty".into()));
            }
        }
        if let Some(channel) = update.system_channel_id {
            let ch = self.get_channel(channel)?;
            if ch.server_id != id || ch.kind != ChannelKind::Text {
                return Err(StoreError::Invalid(
                    "system channel must be a text channel of this server".into(),
                ));
            }
        }

        self.conn().execute(
            "UPDATE servers SET
                name                  = COALESCE(?2, name),
                icon_url              = COALESCE(?3, icon_url),
                banner_url            = COALESCE(?4, banner_url),
                tag                   = COALESCE(?5, tag),
                badge                 = COALESCE(?6, badge),
                color                 = COALESCE(?7, color),
                default_notifications = COALESCE(?8, default_notifications),
                system_channel_id     = COALESCE(?9, system_channel_id)
             WHERE id = ?1",
            params![
                id.to_string(),
                update.name.as_deref().map(str::trim),
                update.icon_url,
                update.banner_url,
                update.tag,
                update.badge,
                update.color,
                update.default_notifications,
                update.system_channel_id.map(|c| c.to_string()),
            ],
        )?;

        let server = self.get_server(id)?;
        self.emit_update("servers", &server)?;
        Ok(server)
    }

    /// Delete a server and everything in it. Owner only.
    pub fn delete_server(&self, id: ServerId, acting: UserId) -> Result<()> {
        let server = self.get_server(id)?;
        if server.owner_id != acting {
            return Err(StoreError::Forbidden("only the owner can delete a server".into()));
        }

        // ON DELETE CASCADE: members, channels, messages, invites, assets
        self.conn()
            .execute("DELETE FROM servers WHERE id = ?1", params![id.to_string()])?;

        tracing::info!(server = %id.short(), "server deleted");
        self.emit_delete("servers", &server)?;
        Ok(())
    }

    // ----------------------------------------------------------------
    // Members
    // ----------------------------------------------------------------

    pub fn list_server_members(&self, server: ServerId) -> Result<Vec<ServerMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT server_id, user_id, role, joined_at FROM server_members
             WHERE server_id = ?1
             ORDER BY joined_at, user_id",
        )?;
        let rows = stmt.query_map(params![server.to_string()], row_to_member)?;
        collect_rows(rows)
    }

    /// Add a plain member. Idempotent: existing members keep their role.
    pub fn add_server_member(&self, server: ServerId, user: UserId) -> Result<ServerMember> {
        if let Some(role) = self.member_role(server, user)? {
            return Ok(self
                .list_server_members(server)?
                .into_iter()
                .find(|m| m.user_id == user)
                .unwrap_or(ServerMember {
                    server_id: server,
                    user_id: user,
                    role,
                    joined_at: now(),
                }));
        }

        let member = ServerMember {
            server_id: server,
            user_id: user,
            role: ServerRole::Member,
            joined_at: now(),
        };
        self.conn().execute(
            "INSERT INTO server_members (server_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                server.to_string(),
                user.to_string(),
                member.role.as_str(),
                ts(&member.joined_at),
            ],
        )?;

        tracing::debug!(server = %server.short(), user = %user.short(), "member joined");
        self.emit_insert("server_members", &member)?;
        Ok(member)
    }

    /// Kick (`acting` is owner/admin) or leave (`acting == user`).
    /// The owner can neither leave nor be kicked.
    pub fn remove_server_member(&self, server: ServerId, acting: UserId, user: UserId) -> Result<()> {
        let target_role = self.member_role(server, user)?.ok_or(StoreError::NotFound)?;
        if target_role == ServerRole::Owner {
            return Err(StoreError::Forbidden("the owner cannot leave the server".into()));
        }
        if acting != user {
            let acting_role = self.require_manager(server, acting)?;
            if target_role == ServerRole::Admin && acting_role != ServerRole::Owner {
                return Err(StoreError::Forbidden("only the owner can kick admins".into()));
            }
        }

        let member = self
            .list_server_members(server)?
            .into_iter()
            .find(|m| m.user_id == user)
            .ok_or(StoreError::NotFound)?;
        self.conn().execute(
            "DELETE FROM server_members WHERE server_id = ?1 AND user_id = ?2",
            params![server.to_string(), user.to_string()],
        )?;
        self.emit_delete("server_members", &member)?;
        Ok(())
    }

    /// Promote or demote a member. Owner only; ownership is not transferable here.
    pub fn set_member_role(
        &self,
        server: ServerId,
        acting: UserId,
        user: UserId,
        role: ServerRole,
    ) -> Result<()> {
        if self.member_role(server, acting)? != Some(ServerRole::Owner) {
            return Err(StoreError::Forbidden("only the owner can change roles".into()));
        }
        if role == ServerRole::Owner || acting == user {
            return Err(StoreError::Invalid("ownership cannot be reassigned".into()));
        }

        let affected = self.conn().execute(
            "UPDATE server_members SET role = ?3 WHERE server_id = ?1 AND user_id = ?2",
            params![server.to_string(), user.to_string(), role.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Role of `user` in `server`, `None` when not a member.
    pub fn member_role(&self, server: ServerId, user: UserId) -> Result<Option<ServerRole>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT role FROM server_members WHERE server_id = ?1 AND user_id = ?2",
                params![server.to_string(), user.to_string()],
                |row| enum_at(row, 0),
            )
            .optional()?)
    }

    pub(crate) fn require_manager(&self, server: ServerId, acting: UserId) -> Result<ServerRole> {
        match self.member_role(server, acting)? {
            Some(role) if role.can_manage() => Ok(role),
            _ => Err(StoreError::Forbidden("owner or admin required".into())),
        }
    }
}

fn prefixed(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_server(row: &rusqlite::Row<'_>) -> rusqlite::Result<Server> {
    Ok(Server {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        owner_id: uuid_at(row, 2)?,
        icon_url: row.get(3)?,
        banner_url: row.get(4)?,
        tag: row.get(5)?,
        badge: row.get(6)?,
        color: row.get(7)?,
        default_notifications: row.get(8)?,
        system_channel_id: opt_uuid_at(row, 9)?,
        created_at: ts_at(row, 10)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerMember> {
    Ok(ServerMember {
        server_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        role: enum_at(row, 2)?,
        joined_at: ts_at(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{db, user};

    #[test]
    fn create_sets_up_defaults() {
        let db = db();
        let owner = user(&db, "owner");

        let (server, channels) = db.create_server(owner, "  Rustaceans ").unwrap();
        assert_eq!(server.name, "Rustaceans");
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].kind, ChannelKind::Text);
        assert_eq!(channels[1].kind, ChannelKind::Voice);
        assert_eq!(server.system_channel_id, Some(channels[0].id));
        assert_eq!(db.member_role(server.id, owner).unwrap(), Some(ServerRole::Owner));
        assert_eq!(db.list_channels(server.id).unwrap(), channels);
        assert_eq!(db.list_servers_for_user(owner).unwrap(), vec![server]);
    }

    #[test]
    fn settings_require_manager() {
        let db = db();
        let owner = user(&db, "owner");
        let member = user(&db, "member");
        let (server, _) = db.create_server(owner, "guild").unwrap();
        db.add_server_member(server.id, member).unwrap();

        let update = ServerSettingsUpdate {
            tag: Some("RUST".into()),
            color: Some("#ff6600".into()),
            ..Default::default()
        };
        assert!(matches!(
            db.update_server(server.id, member, &update),
            Err(StoreError::Forbidden(_))
        ));

        let updated = db.update_server(server.id, owner, &update).unwrap();
        assert_eq!(updated.tag.as_deref(), Some("RUST"));
        assert_eq!(updated.name, "guild");

        let bad = ServerSettingsUpdate {
            default_notifications: Some("loud".into()),
            ..Default::default()
        };
        assert!(db.update_server(server.id, owner, &bad).is_err());
    }

    #[test]
    fn add_member_is_idempotent() {
        let db = db();
        let owner = user(&db, "owner");
        let member = user(&db, "member");
        let (server, _) = db.create_server(owner, "guild").unwrap();

        db.add_server_member(server.id, member).unwrap();
        db.add_server_member(server.id, member).unwrap();
        let again = db.add_server_member(server.id, owner).unwrap();

        assert_eq!(again.role, ServerRole::Owner);
        assert_eq!(db.list_server_members(server.id).unwrap().len(), 2);
    }

    #[test]
    fn kick_and_leave_rules() {
        let db = db();
        let owner = user(&db, "owner");
        let admin = user(&db, "admin");
        let member = user(&db, "member");
        let (server, _) = db.create_server(owner, "guild").unwrap();
        db.add_server_member(server.id, admin).unwrap();
        db.add_server_member(server.id, member).unwrap();
        db.set_member_role(server.id, owner, admin, ServerRole::Admin).unwrap();

        assert!(db.remove_server_member(server.id, member, admin).is_err());
        assert!(db.remove_server_member(server.id, owner, owner).is_err());

        db.remove_server_member(server.id, admin, member).unwrap();
        db.remove_server_member(server.id, admin, admin).unwrap();
        assert_eq!(db.list_server_members(server.id).unwrap().len(), 1);
    }

    #[test]
    fn delete_is_owner_only_and_cascades() {
        let db = db();
        let owner = user(&db, "owner");
        let member = user(&db, "member");
        let (server, channels) = db.create_server(owner, "guild").unwrap();
        db.add_server_member(server.id, member).unwrap();

        assert!(db.delete_server(server.id, member).is_err());
        db.delete_server(server.id, owner).unwrap();
        assert!(matches!(db.get_channel(channels[0].id), Err(StoreError::NotFound)));
        assert!(db.list_servers_for_user(member).unwrap().is_empty());
    }
}
