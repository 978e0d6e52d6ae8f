//! Voice channel participant rows.
//!
//! A row means "this user is in this voice channel right now". The roster a
//! joining client reads here decides whom it sends offers to.

use rusqlite::params;
use uuid::Uuid;

use mshb_shared::types::{ChannelId, ChannelKind, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::VoiceParticipant;
use crate::rows::{collect_rows, now, ts, ts_at, uuid_at};

impl Database {
    /// Record that `user` joined `channel`.
    ///
    /// Idempotent: a second join leaves the existing row untouched and
    /// returns `(row, false)`.
    pub fn join_voice(&self, channel: ChannelId, user: UserId) -> Result<(VoiceParticipant, bool)> {
        let ch = self.get_channel(channel)?;
        if ch.kind != ChannelKind::Voice {
            return Err(StoreError::Invalid("not a voice channel".into()));
        }
        if self.member_role(ch.server_id, user)?.is_none() {
            return Err(StoreError::Forbidden("not a member of this server".into()));
        }

        let row = VoiceParticipant {
            id: Uuid::new_v4(),
            channel_id: channel,
            user_id: user,
            is_muted: false,
            joined_at: now(),
        };
        let inserted = self.conn().execute(
            "INSERT INTO voice_participants (id, channel_id, user_id, is_muted, joined_at)
             VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT (channel_id, user_id) DO NOTHING",
            params![
                row.id.to_string(),
                channel.to_string(),
                user.to_string(),
                ts(&row.joined_at),
            ],
        )? > 0;

        if !inserted {
            let existing = self
                .list_voice_participants(channel)?
                .into_iter()
                .find(|p| p.user_id == user)
                .ok_or(StoreError::NotFound)?;
            return Ok((existing, false));
        }

        tracing::info!(channel = %channel.short(), user = %user.short(), "joined voice");
        self.emit_insert("voice_participants", &row)?;
        Ok((row, true))
    }

    /// Remove `user` from `channel`. Returns whether a row existed.
    pub fn leave_voice(&self, channel: ChannelId, user: UserId) -> Result<bool> {
        let existing = self
            .list_voice_participants(channel)?
            .into_iter()
            .find(|p| p.user_id == user);
        let Some(row) = existing else {
            return Ok(false);
        };

        self.conn().execute(
            "DELETE FROM voice_participants WHERE id = ?1",
            params![row.id.to_string()],
        )?;
        tracing::info!(channel = %channel.short(), user = %user.short(), "left voice");
        self.emit_delete("voice_participants", &row)?;
        Ok(true)
    }

    /// Current roster in join order.
    pub fn list_voice_participants(&self, channel: ChannelId) -> Result<Vec<VoiceParticipant>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, channel_id, user_id, is_muted, joined_at
             FROM voice_participants
             WHERE channel_id = ?1
             ORDER BY joined_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![channel.to_string()], row_to_participant)?;
        collect_rows(rows)
    }

    /// Drop every voice row `user` left behind, e.g. after a crash.
    /// Returns the number of rows removed.
    pub fn remove_voice_rows_for_user(&self, user: UserId) -> Result<usize> {
        let mut stmt = self.conn().prepare(
            "SELECT id, channel_id, user_id, is_muted, joined_at
             FROM voice_participants WHERE user_id = ?1",
        )?;
        let stale = collect_rows(stmt.query_map(params![user.to_string()], row_to_participant)?)?;
        drop(stmt);

        for row in &stale {
            self.conn().execute(
                "DELETE FROM voice_participants WHERE id = ?1",
                params![row.id.to_string()],
            )?;
            self.emit_delete("voice_participants", row)?;
        }
        if !stale.is_empty() {
            tracing::warn!(user = %user.short(), rows = stale.len(), "removed stale voice rows");
        }
        Ok(stale.len())
    }

    pub fn set_voice_muted(&self, channel: ChannelId, user: UserId, muted: bool) -> Result<VoiceParticipant> {
        let affected = self.conn().execute(
            "UPDATE voice_participants SET is_muted = ?3 WHERE channel_id = ?1 AND user_id = ?2",
            params![channel.to_string(), user.to_string(), muted],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        let row = self
            .list_voice_participants(channel)?
            .into_iter()
            .find(|p| p.user_id == user)
            .ok_or(StoreError::NotFound)?;
        self.emit_update("voice_participants", &row)?;
        Ok(row)
    }
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<VoiceParticipant> {
    Ok(VoiceParticipant {
        id: uuid_at(row, 0)?,
        channel_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        is_muted: row.get(3)?,
        joined_at: ts_at(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{db, user};
    use mshb_shared::types::ChangeKind;

    fn voice_setup(db: &Database) -> (UserId, ChannelId) {
        let owner = user(db, "owner");
        let (_, channels) = db.create_server(owner, "guild").unwrap();
        (owner, channels[1].id)
    }

    #[test]
    fn join_twice_keeps_one_row() {
        let db = db();
        let (owner, voice) = voice_setup(&db);

        let (first, inserted) = db.join_voice(voice, owner).unwrap();
        assert!(inserted);
        let (second, inserted) = db.join_voice(voice, owner).unwrap();
        assert!(!inserted);
        assert_eq!(first.id, second.id);
        assert_eq!(db.list_voice_participants(voice).unwrap().len(), 1);
    }

    #[test]
    fn text_channels_and_outsiders_rejected() {
        let db = db();
        let owner = user(&db, "owner");
        let outsider = user(&db, "outsider");
        let (_, channels) = db.create_server(owner, "guild").unwrap();

        assert!(matches!(
            db.join_voice(channels[0].id, owner),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            db.join_voice(channels[1].id, outsider),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn leave_emits_delete() {
        let db = db();
        let (owner, voice) = voice_setup(&db);
        db.join_voice(voice, owner).unwrap();
        let mut rx = db.subscribe_changes();

        assert!(db.leave_voice(voice, owner).unwrap());
        assert!(!db.leave_voice(voice, owner).unwrap());

        let change = rx.try_recv().unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.table, "voice_participants");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_rows_removed_for_user() {
        let db = db();
        let (owner, voice) = voice_setup(&db);
        db.join_voice(voice, owner).unwrap();

        assert_eq!(db.remove_voice_rows_for_user(owner).unwrap(), 1);
        assert!(db.list_voice_participants(voice).unwrap().is_empty());
        assert_eq!(db.remove_voice_rows_for_user(owner).unwrap(), 0);
    }

    #[test]
    fn mute_flag_updates() {
        let db = db();
        let (owner, voice) = voice_setup(&db);
        db.join_voice(voice, owner).unwrap();

        assert!(db.set_voice_muted(voice, owner, true).unwrap().is_muted);
        assert!(db.list_voice_participants(voice).unwrap()[0].is_muted);
    }
}
