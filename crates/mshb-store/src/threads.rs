//! Direct message threads and group conversations.

use rusqlite::{params, OptionalExtension};

use mshb_shared::types::{GroupId, GroupRole, ThreadId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{DmThread, GroupMember, GroupThread};
use crate::rows::{collect_rows, enum_at, now, ts, ts_at, uuid_at};

impl Database {
    // ----------------------------------------------------------------
    // Direct messages
    // ----------------------------------------------------------------

    /// Return the DM thread between two users, creating it on first use.
    ///
    /// Participants are stored ordered so each pair maps to one row.
    pub fn get_or_create_dm(&self, a: UserId, b: UserId) -> Result<DmThread> {
        if a == b {
            return Err(StoreError::Invalid("cannot open a DM with yourself".into()));
        }
        let (user1, user2) = if a < b { (a, b) } else { (b, a) };

        let existing = self
            .conn()
            .query_row(
                "SELECT id, user1_id, user2_id, created_at FROM dm_threads
                 WHERE user1_id = ?1 AND user2_id = ?2",
                params![user1.to_string(), user2.to_string()],
                row_to_dm,
            )
            .optional()?;
        if let Some(thread) = existing {
            return Ok(thread);
        }

        let thread = DmThread {
            id: ThreadId::new(),
            user1_id: user1,
            user2_id: user2,
            created_at: now(),
        };
        self.conn().execute(
            "INSERT INTO dm_threads (id, user1_id, user2_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                thread.id.to_string(),
                user1.to_string(),
                user2.to_string(),
                ts(&thread.created_at),
            ],
        )?;

        tracing::debug!(thread = %thread.id.short(), "dm thread created");
        self.emit_insert("dm_threads", &thread)?;
        Ok(thread)
    }

    pub fn get_dm_thread(&self, id: ThreadId) -> Result<DmThread> {
        self.conn()
            .query_row(
                "SELECT id, user1_id, user2_id, created_at FROM dm_threads WHERE id = ?1",
                params![id.to_string()],
                row_to_dm,
            )
            .map_err(StoreError::not_found_or)
    }

    pub fn list_dm_threads(&self, user: UserId) -> Result<Vec<DmThread>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user1_id, user2_id, created_at FROM dm_threads
             WHERE user1_id = ?1 OR user2_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], row_to_dm)?;
        collect_rows(rows)
    }

    // ----------------------------------------------------------------
    // Groups
    // ----------------------------------------------------------------

    /// Create a group owned by `owner` (admin) with `members` as plain members.
    pub fn create_group(&self, owner: UserId, name: &str, members: &[UserId]) -> Result<GroupThread> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("group name is empty".into()));
        }

        let group = GroupThread {
            id: GroupId::new(),
            name: name.to_string(),
            icon_url: None,
            owner_id: owner,
            created_at: now(),
        };

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO group_threads (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                group.id.to_string(),
                group.name,
                owner.to_string(),
                ts(&group.created_at),
            ],
        )?;
        let joined_at = ts(&group.created_at);
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
            params![group.id.to_string(), owner.to_string(), GroupRole::Admin.as_str(), joined_at],
        )?;
        for member in members.iter().filter(|m| **m != owner) {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![group.id.to_string(), member.to_string(), GroupRole::Member.as_str(), joined_at],
            )?;
        }
        tx.commit()?;

        tracing::info!(group = %group.id.short(), members = members.len(), "group created");
        self.emit_insert("group_threads", &group)?;
        Ok(group)
    }

    pub fn get_group(&self, id: GroupId) -> Result<GroupThread> {
        self.conn()
            .query_row(
                "SELECT id, name, icon_url, owner_id, created_at FROM group_threads WHERE id = ?1",
                params![id.to_string()],
                row_to_group,
            )
            .map_err(StoreError::not_found_or)
    }

    pub fn list_groups_for_user(&self, user: UserId) -> Result<Vec<GroupThread>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.icon_url, g.owner_id, g.created_at
             FROM group_threads g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1
             ORDER BY g.created_at DESC",
        )?;
        let rows = stmt.query_map(params![user.to_string()], row_to_group)?;
        collect_rows(rows)
    }

    pub fn list_group_members(&self, group: GroupId) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT group_id, user_id, role, joined_at FROM group_members
             WHERE group_id = ?1
             ORDER BY joined_at, user_id",
        )?;
        let rows = stmt.query_map(params![group.to_string()], |row| {
            Ok(GroupMember {
                group_id: uuid_at(row, 0)?,
                user_id: uuid_at(row, 1)?,
                role: enum_at(row, 2)?,
                joined_at: ts_at(row, 3)?,
            })
        })?;
        collect_rows(rows)
    }

    /// Add `user` to a group. `acting` must be an admin.
    pub fn add_group_member(&self, group: GroupId, acting: UserId, user: UserId) -> Result<GroupMember> {
        self.require_group_admin(group, acting)?;

        let member = GroupMember {
            group_id: group,
            user_id: user,
            role: GroupRole::Member,
            joined_at: now(),
        };
        self.conn()
            .execute(
                "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    group.to_string(),
                    user.to_string(),
                    member.role.as_str(),
                    ts(&member.joined_at),
                ],
            )
            .map_err(|e| StoreError::conflict_or(e, "already a member"))?;

        self.emit_insert("group_members", &member)?;
        Ok(member)
    }

    /// Remove `user` from a group. Admins may remove anyone; members only
    /// themselves. A group left without members is deleted.
    pub fn remove_group_member(&self, group: GroupId, acting: UserId, user: UserId) -> Result<()> {
        if acting != user {
            self.require_group_admin(group, acting)?;
        }

        let member = self
            .list_group_members(group)?
            .into_iter()
            .find(|m| m.user_id == user)
            .ok_or(StoreError::NotFound)?;

        self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.to_string(), user.to_string()],
        )?;
        self.emit_delete("group_members", &member)?;

        let remaining: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
            params![group.to_string()],
            |row| row.get(0),
        )?;
        if remaining == 0 {
            let thread = self.get_group(group)?;
            self.conn()
                .execute("DELETE FROM group_threads WHERE id = ?1", params![group.to_string()])?;
            tracing::debug!(group = %group.short(), "empty group deleted");
            self.emit_delete("group_threads", &thread)?;
        }
        Ok(())
    }

    pub fn set_group_role(&self, group: GroupId, acting: UserId, user: UserId, role: GroupRole) -> Result<()> {
        self.require_group_admin(group, acting)?;

        let affected = self.conn().execute(
            "UPDATE group_members SET role = ?3 WHERE group_id = ?1 AND user_id = ?2",
            params![group.to_string(), user.to_string(), role.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn rename_group(&self, group: GroupId, acting: UserId, name: &str) -> Result<GroupThread> {
        self.require_group_admin(group, acting)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("group name is empty".into()));
        }

        self.conn().execute(
            "UPDATE group_threads SET name = ?2 WHERE id = ?1",
            params![group.to_string(), name],
        )?;
        let thread = self.get_group(group)?;
        self.emit_update("group_threads", &thread)?;
        Ok(thread)
    }

    fn require_group_admin(&self, group: GroupId, acting: UserId) -> Result<()> {
        if self.is_group_admin(group, acting)? {
            Ok(())
        } else {
            Err(StoreError::Forbidden("group admin required".into()))
        }
    }
}

fn row_to_dm(row: &rusqlite::Row<'_>) -> rusqlite::Result<DmThread> {
    Ok(DmThread {
        id: uuid_at(row, 0)?,
        user1_id: uuid_at(row, 1)?,
        user2_id: uuid_at(row, 2)?,
        created_at: ts_at(row, 3)?,
    })
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupThread> {
    Ok(GroupThread {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        icon_url: row.get(2)?,
        owner_id: uuid_at(row, 3)?,
        created_at: ts_at(row, 4)?,
    })
}
