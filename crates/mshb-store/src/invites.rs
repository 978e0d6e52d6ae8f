use chrono::Duration;
use rusqlite::{params, OptionalExtension};

use mshb_shared::invite::generate_invite_code;
use mshb_shared::types::{ServerId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ServerInvite;
use crate::rows::{collect_rows, now, opt_ts_at, ts, ts_at, uuid_at};

const INVITE_COLUMNS: &str = "code, server_id, created_by, max_uses, uses, expires_at, created_at";

impl Database {
    /// Create an invite. Any member may invite.
    ///
    /// `max_uses = None` means unlimited, `expires_in = None` means never.
    pub fn create_invite(
        &self,
        server: ServerId,
        acting: UserId,
        max_uses: Option<i64>,
        expires_in: Option<Duration>,
    ) -> Result<ServerInvite> {
        if self.member_role(server, acting)?.is_none() {
            return Err(StoreError::Forbidden("not a member of this server".into()));
        }
        if matches!(max_uses, Some(n) if n < 1) {
            return Err(StoreError::Invalid("max uses must be at least 1".into()));
        }

        let created_at = now();
        let invite = ServerInvite {
            code: generate_invite_code(),
            server_id: server,
            created_by: acting,
            max_uses,
            uses: 0,
            expires_at: expires_in.map(|d| created_at + d),
            created_at,
        };

        self.conn()
            .execute(
                "INSERT INTO server_invites (code, server_id, created_by, max_uses, uses, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
                params![
                    invite.code,
                    server.to_string(),
                    acting.to_string(),
                    max_uses,
                    invite.expires_at.as_ref().map(ts),
                    ts(&created_at),
                ],
            )
            .map_err(|e| StoreError::conflict_or(e, "invite code collision"))?;

        tracing::debug!(server = %server.short(), code = %invite.code, "invite created");
        self.emit_insert("server_invites", &invite)?;
        Ok(invite)
    }

    pub fn get_invite(&self, code: &str) -> Result<Option<ServerInvite>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {INVITE_COLUMNS} FROM server_invites WHERE code = ?1"),
                params![code],
                row_to_invite,
            )
            .optional()?)
    }

    pub fn list_invites(&self, server: ServerId, acting: UserId) -> Result<Vec<ServerInvite>> {
        self.require_manager(server, acting)?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {INVITE_COLUMNS} FROM server_invites
             WHERE server_id = ?1
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![server.to_string()], row_to_invite)?;
        collect_rows(rows)
    }

    /// Revoke an invite. Its creator or a server manager may do it.
    pub fn delete_invite(&self, code: &str, acting: UserId) -> Result<()> {
        let invite = self.get_invite(code)?.ok_or(StoreError::NotFound)?;
        if invite.created_by != acting {
            self.require_manager(invite.server_id, acting)?;
        }

        self.conn()
            .execute("DELETE FROM server_invites WHERE code = ?1", params![code])?;
        self.emit_delete("server_invites", &invite)?;
        Ok(())
    }
}

pub(crate) fn row_to_invite(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerInvite> {
    Ok(ServerInvite {
        code: row.get(0)?,
        server_id: uuid_at(row, 1)?,
        created_by: uuid_at(row, 2)?,
        max_uses: row.get(3)?,
        uses: row.get(4)?,
        expires_at: opt_ts_at(row, 5)?,
        created_at: ts_at(row, 6)?,
    })
}
