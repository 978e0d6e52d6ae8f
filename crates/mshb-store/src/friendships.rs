use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use mshb_shared::types::{FriendshipStatus, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Friendship;
use crate::rows::{collect_rows, enum_at, now, ts, ts_at, uuid_at};

const FRIENDSHIP_COLUMNS: &str = "id, requester_id, addressee_id, status, created_at";

impl Database {
    /// Send a friend request.
    ///
    /// If the addressee already asked us, the existing request is accepted
    /// instead of creating a second row.
    pub fn request_friendship(&self, requester: UserId, addressee: UserId) -> Result<Friendship> {
        if requester == addressee {
            return Err(StoreError::Invalid("cannot befriend yourself".into()));
        }

        if let Some(existing) = self.friendship_between(requester, addressee)? {
            return match existing.status {
                FriendshipStatus::Accepted => Err(StoreError::Conflict("already friends".into())),
                FriendshipStatus::Pending if existing.requester_id == requester => {
                    Err(StoreError::Conflict("request already sent".into()))
                }
                FriendshipStatus::Pending => self.accept_friendship(existing.id, requester),
            };
        }

        let friendship = Friendship {
            id: Uuid::new_v4(),
            requester_id: requester,
            addressee_id: addressee,
            status: FriendshipStatus::Pending,
            created_at: now(),
        };
        self.conn().execute(
            "INSERT INTO friendships (id, requester_id, addressee_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                friendship.id.to_string(),
                requester.to_string(),
                addressee.to_string(),
                friendship.status.as_str(),
                ts(&friendship.created_at),
            ],
        )?;

        tracing::debug!(from = %requester.short(), to = %addressee.short(), "friend request");
        self.emit_insert("friendships", &friendship)?;
        Ok(friendship)
    }

    /// Accept a pending request. Only the addressee may accept.
    pub fn accept_friendship(&self, id: Uuid, acting: UserId) -> Result<Friendship> {
        let mut friendship = self.get_friendship(id)?;
        if friendship.addressee_id != acting {
            return Err(StoreError::Forbidden("only the addressee can accept".into()));
        }
        if friendship.status == FriendshipStatus::Accepted {
            return Ok(friendship);
        }

        self.conn().execute(
            "UPDATE friendships SET status = ?2 WHERE id = ?1",
            params![id.to_string(), FriendshipStatus::Accepted.as_str()],
        )?;
        friendship.status = FriendshipStatus::Accepted;

        self.emit_update("friendships", &friendship)?;
        Ok(friendship)
    }

    /// Decline, cancel or unfriend. Either participant may do it.
    pub fn delete_friendship(&self, id: Uuid, acting: UserId) -> Result<()> {
        let friendship = self.get_friendship(id)?;
        if friendship.requester_id != acting && friendship.addressee_id != acting {
            return Err(StoreError::Forbidden("not a participant".into()));
        }

        self.conn()
            .execute("DELETE FROM friendships WHERE id = ?1", params![id.to_string()])?;
        self.emit_delete("friendships", &friendship)?;
        Ok(())
    }

    pub fn get_friendship(&self, id: Uuid) -> Result<Friendship> {
        self.conn()
            .query_row(
                &format!("SELECT {FRIENDSHIP_COLUMNS} FROM friendships WHERE id = ?1"),
                params![id.to_string()],
                row_to_friendship,
            )
            .map_err(StoreError::not_found_or)
    }

    /// The row linking two users, in either direction.
    pub fn friendship_between(&self, a: UserId, b: UserId) -> Result<Option<Friendship>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {FRIENDSHIP_COLUMNS} FROM friendships
                     WHERE (requester_id = ?1 AND addressee_id = ?2)
                        OR (requester_id = ?2 AND addressee_id = ?1)"
                ),
                params![a.to_string(), b.to_string()],
                row_to_friendship,
            )
            .optional()?)
    }

    pub fn list_friends(&self, user: UserId) -> Result<Vec<Friendship>> {
        self.query_friendships(
            &format!(
                "SELECT {FRIENDSHIP_COLUMNS} FROM friendships
                 WHERE status = 'accepted' AND (requester_id = ?1 OR addressee_id = ?1)
                 ORDER BY created_at"
            ),
            user,
        )
    }

    /// Requests waiting for `user` to answer.
    pub fn list_incoming_requests(&self, user: UserId) -> Result<Vec<Friendship>> {
        self.query_friendships(
            &format!(
                "SELECT {FRIENDSHIP_COLUMNS} FROM friendships
                 WHERE status = 'pending' AND addressee_id = ?1
                 ORDER BY created_at"
            ),
            user,
        )
    }

    /// Requests `user` sent that are still unanswered.
    pub fn list_outgoing_requests(&self, user: UserId) -> Result<Vec<Friendship>> {
        self.query_friendships(
            &format!(
                "SELECT {FRIENDSHIP_COLUMNS} FROM friendships
                 WHERE status = 'pending' AND requester_id = ?1
                 ORDER BY created_at"
            ),
            user,
        )
    }

    fn query_friendships(&self, sql: &str, user: UserId) -> Result<Vec<Friendship>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![user.to_string()], row_to_friendship)?;
        collect_rows(rows)
    }
}

fn row_to_friendship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friendship> {
    Ok(Friendship {
        id: uuid_at(row, 0)?,
        requester_id: uuid_at(row, 1)?,
        addressee_id: uuid_at(row, 2)?,
        status: enum_at(row, 3)?,
        created_at: ts_at(row, 4)?,
    })
}
