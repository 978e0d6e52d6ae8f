//! Last-read markers and unread counters.
//!
//! Counts are computed with one grouped query per conversation kind. A
//! message is unread for a viewer when it is newer than the viewer's marker
//! (or there is no marker), was written by someone else, was not deleted for
//! everyone and was not hidden by the viewer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use mshb_shared::types::{ChannelId, GroupId, ServerId, ThreadId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{MessageTarget, UnreadCounts};
use crate::rows::{collect_rows, ts, uuid_at};

const UNREAD_FILTER: &str = "m.author_id != ?1
       AND m.deleted_for_everyone = 0
       AND (r.last_read_at IS NULL OR m.created_at > r.last_read_at)
       AND NOT EXISTS (SELECT 1 FROM message_hidden h
                       WHERE h.message_id = m.id AND h.user_id = ?1)";

impl Database {
    /// Move the viewer's marker for a conversation to `at`.
    pub fn mark_read(&self, user: UserId, target: MessageTarget, at: DateTime<Utc>) -> Result<()> {
        let sql = match target {
            MessageTarget::Dm(_) | MessageTarget::Group(_) => {
                "INSERT INTO thread_read_status (user_id, thread_id, last_read_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, thread_id)
                 DO UPDATE SET last_read_at = MAX(last_read_at, excluded.last_read_at)"
            }
            MessageTarget::Channel(_) => {
                "INSERT INTO channel_read_status (user_id, channel_id, last_read_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, channel_id)
                 DO UPDATE SET last_read_at = MAX(last_read_at, excluded.last_read_at)"
            }
        };
        self.conn()
            .execute(sql, params![user.to_string(), target.id_string(), ts(&at)])?;
        Ok(())
    }

    /// Unread totals for every DM and group thread of `user`.
    pub fn unread_counts(&self, user: UserId) -> Result<UnreadCounts> {
        let mut counts = UnreadCounts::default();

        let mut stmt = self.conn().prepare(&format!(
            "SELECT t.id, COUNT(m.id)
             FROM dm_threads t
             JOIN messages m ON m.dm_thread_id = t.id
             LEFT JOIN thread_read_status r ON r.user_id = ?1 AND r.thread_id = t.id
             WHERE (t.user1_id = ?1 OR t.user2_id = ?1)
               AND {UNREAD_FILTER}
             GROUP BY t.id"
        ))?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            Ok((uuid_at::<ThreadId>(row, 0)?, row.get::<_, u32>(1)?))
        })?;
        counts.dms.extend(collect_rows(rows)?);

        let mut stmt = self.conn().prepare(&format!(
            "SELECT g.group_id, COUNT(m.id)
             FROM group_members g
             JOIN messages m ON m.group_thread_id = g.group_id
             LEFT JOIN thread_read_status r ON r.user_id = ?1 AND r.thread_id = g.group_id
             WHERE g.user_id = ?1
               AND {UNREAD_FILTER}
             GROUP BY g.group_id"
        ))?;
        let rows = stmt.query_map(params![user.to_string()], |row| {
            Ok((uuid_at::<GroupId>(row, 0)?, row.get::<_, u32>(1)?))
        })?;
        counts.groups.extend(collect_rows(rows)?);

        Ok(counts)
    }

    /// Unread totals for the text channels of one server. Channels with
    /// nothing unread are absent from the map.
    pub fn channel_unread_counts(&self, user: UserId, server: ServerId) -> Result<HashMap<ChannelId, u32>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT c.id, COUNT(m.id)
             FROM channels c
             JOIN server_members sm ON sm.server_id = c.server_id AND sm.user_id = ?1
             JOIN messages m ON m.channel_id = c.id
             LEFT JOIN channel_read_status r ON r.user_id = ?1 AND r.channel_id = c.id
             WHERE c.server_id = ?2
               AND {UNREAD_FILTER}
             GROUP BY c.id"
        ))?;
        let rows = stmt.query_map(params![user.to_string(), server.to_string()], |row| {
            Ok((uuid_at::<ChannelId>(row, 0)?, row.get::<_, u32>(1)?))
        })?;
        Ok(collect_rows(rows)?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::now;
    use crate::testutil::{db, user};

    #[test]
    fn counts_only_others_messages_since_marker() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let dm = db.get_or_create_dm(alice, bob).unwrap();
        let target = MessageTarget::Dm(dm.id);

        db.insert_message(alice, target, "one", None).unwrap();
        db.insert_message(alice, target, "two", None).unwrap();
        db.insert_message(bob, target, "mine", None).unwrap();

        // No marker yet: everything from alice counts.
        assert_eq!(db.unread_counts(bob).unwrap().dms[&dm.id], 2);
        assert!(db.unread_counts(alice).unwrap().dms.get(&dm.id) == Some(&1));

        db.mark_read(bob, target, now()).unwrap();
        assert!(db.unread_counts(bob).unwrap().dms.is_empty());

        std::thread::sleep(std::time::Duration::from_millis(2));
        db.insert_message(alice, target, "three", None).unwrap();
        assert_eq!(db.unread_counts(bob).unwrap().total(), 1);
    }

    #[test]
    fn hidden_and_deleted_messages_do_not_count() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let group = db.create_group(alice, "g", &[bob]).unwrap();
        let target = MessageTarget::Group(group.id);

        let a = db.insert_message(alice, target, "a", None).unwrap();
        let b = db.insert_message(alice, target, "b", None).unwrap();
        db.insert_message(alice, target, "c", None).unwrap();

        db.hide_message(a.id, bob).unwrap();
        db.delete_message_for_everyone(b.id, alice).unwrap();

        assert_eq!(db.unread_counts(bob).unwrap().groups[&group.id], 1);
    }

    #[test]
    fn marker_never_moves_backwards() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let dm = db.get_or_create_dm(alice, bob).unwrap();
        let target = MessageTarget::Dm(dm.id);

        db.insert_message(alice, target, "hi", None).unwrap();
        let later = now() + chrono::Duration::seconds(5);
        db.mark_read(bob, target, later).unwrap();
        db.mark_read(bob, target, later - chrono::Duration::hours(1)).unwrap();

        assert!(db.unread_counts(bob).unwrap().dms.is_empty());
    }

    #[test]
    fn channel_counts_per_server() {
        let db = db();
        let owner = user(&db, "owner");
        let member = user(&db, "member");
        let (server, channels) = db.create_server(owner, "guild").unwrap();
        db.add_server_member(server.id, member).unwrap();
        let general = MessageTarget::Channel(channels[0].id);

        db.insert_message(owner, general, "welcome", None).unwrap();
        db.insert_message(owner, general, "rules", None).unwrap();

        let counts = db.channel_unread_counts(member, server.id).unwrap();
        assert_eq!(counts[&channels[0].id], 2);
        assert!(db.channel_unread_counts(owner, server.id).unwrap().is_empty());

        db.mark_read(member, general, now()).unwrap();
        assert!(db.channel_unread_counts(member, server.id).unwrap().is_empty());
    }
}
