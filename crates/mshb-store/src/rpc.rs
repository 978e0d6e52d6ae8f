//! Server-side functions callable by clients.
//!
//! These cover the lookups a client cannot do with its own row access:
//! resolving a username to an email for sign-in, membership checks used by
//! access rules, and invite redemption.

use rusqlite::{params, OptionalExtension};

use mshb_shared::invite::normalize_invite_code;
use mshb_shared::types::{GroupId, GroupRole, ServerId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ServerInvite;
use crate::rows::now;

impl Database {
    /// Email registered for `username`, used by sign-in-by-username.
    pub fn get_email_by_username(&self, username: &str) -> Result<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT a.email FROM auth_users a
                 JOIN profiles p ON p.id = a.id
                 WHERE p.username = ?1",
                params![username.trim()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn is_group_admin(&self, group: GroupId, user: UserId) -> Result<bool> {
        Ok(self.group_role(group, user)? == Some(GroupRole::Admin))
    }

    pub fn is_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        Ok(self.group_role(group, user)?.is_some())
    }

    fn group_role(&self, group: GroupId, user: UserId) -> Result<Option<GroupRole>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group.to_string(), user.to_string()],
                |row| crate::rows::enum_at(row, 0),
            )
            .optional()?)
    }

    /// Preview an invite without consuming it.
    ///
    /// Accepts a bare code or any invite link. Fails with `NotFound` for
    /// unknown codes and `Invalid` for expired or exhausted ones.
    pub fn get_server_id_by_invite_link(&self, link: &str) -> Result<ServerId> {
        let invite = self.find_invite(link)?;
        ensure_usable(&invite)?;
        Ok(invite.server_id)
    }

    /// Redeem an invite for `user`.
    ///
    /// Existing members get the server id back even when the invite has
    /// since expired or run out. New members get a `member` row and the use
    /// counter goes up.
    pub fn use_invite(&self, link: &str, user: UserId) -> Result<ServerId> {
        let invite = self.find_invite(link)?;
        let server = invite.server_id;

        if self.member_role(server, user)?.is_some() {
            tracing::debug!(server = %server.short(), user = %user.short(), "invite used by existing member");
            return Ok(server);
        }
        ensure_usable(&invite)?;

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE server_invites SET uses = uses + 1 WHERE code = ?1",
            params![invite.code],
        )?;
        self.add_server_member(server, user)?;
        tx.commit()?;

        tracing::info!(server = %server.short(), user = %user.short(), code = %invite.code, "invite redeemed");
        Ok(server)
    }

    fn find_invite(&self, link: &str) -> Result<ServerInvite> {
        let code =
            normalize_invite_code(link).map_err(|e| StoreError::Invalid(e.to_string()))?;
        self.get_invite(&code)?.ok_or(StoreError::NotFound)
    }
}

fn ensure_usable(invite: &ServerInvite) -> Result<()> {
    if invite.is_usable(now()) {
        Ok(())
    } else {
        Err(StoreError::Invalid("invite expired or used up".into()))
    }
}
