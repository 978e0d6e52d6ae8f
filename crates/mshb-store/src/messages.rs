use rusqlite::params;

use mshb_shared::constants::MAX_MESSAGE_LEN;
use mshb_shared::types::{MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attachment, Message, MessageTarget};
use crate::rows::{collect_rows, now, opt_ts_at, opt_uuid_at, ts, ts_at, uuid_at};

const MESSAGE_COLUMNS: &str = "id, dm_thread_id, group_thread_id, channel_id, author_id, content, \
     file_url, file_name, file_type, file_size, edited_at, deleted_for_everyone, created_at";

impl Database {
    /// Insert a message into exactly one conversation.
    ///
    /// Rejects messages with neither text nor attachment; callers that want
    /// a silent no-op check that first.
    pub fn insert_message(
        &self,
        author: UserId,
        target: MessageTarget,
        content: &str,
        attachment: Option<&Attachment>,
    ) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() && attachment.is_none() {
            return Err(StoreError::Invalid("message is empty".into()));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(StoreError::Invalid(format!(
                "message longer than {MAX_MESSAGE_LEN} characters"
            )));
        }
        self.ensure_can_access(author, target)?;

        let mut message = Message {
            id: MessageId::new(),
            dm_thread_id: None,
            group_thread_id: None,
            channel_id: None,
            author_id: author,
            content: content.to_string(),
            file_url: attachment.map(|a| a.url.clone()),
            file_name: attachment.map(|a| a.name.clone()),
            file_type: attachment.map(|a| a.mime_type.clone()),
            file_size: attachment.map(|a| a.size),
            edited_at: None,
            deleted_for_everyone: false,
            created_at: now(),
        };
        match target {
            MessageTarget::Dm(id) => message.dm_thread_id = Some(id),
            MessageTarget::Group(id) => message.group_thread_id = Some(id),
            MessageTarget::Channel(id) => message.channel_id = Some(id),
        }

        self.conn().execute(
            &format!(
                "INSERT INTO messages (id, {}, author_id, content, file_url, file_name, file_type,
                                       file_size, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                target.column()
            ),
            params![
                message.id.to_string(),
                target.id_string(),
                author.to_string(),
                message.content,
                message.file_url,
                message.file_name,
                message.file_type,
                message.file_size,
                ts(&message.created_at),
            ],
        )?;

        tracing::debug!(
            message = %message.id.short(),
            author = %author.short(),
            container = target.column(),
            "message inserted"
        );
        self.emit_insert("messages", &message)?;
        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(StoreError::not_found_or)
    }

    /// One page of a conversation, oldest first.
    ///
    /// Returns the `limit` newest messages older than `before` (or the
    /// newest overall), skipping rows the viewer hid for themselves.
    pub fn list_messages(
        &self,
        viewer: UserId,
        target: MessageTarget,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.ensure_can_access(viewer, target)?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.{col} = ?1
               AND NOT EXISTS (SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?2)
               AND (?3 IS NULL OR (m.created_at, m.rowid) <
                    (SELECT c.created_at, c.rowid FROM messages c WHERE c.id = ?3))
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?4",
            col = target.column()
        ))?;
        let rows = stmt.query_map(
            params![
                target.id_string(),
                viewer.to_string(),
                before.map(|id| id.to_string()),
                limit,
            ],
            row_to_message,
        )?;

        let mut page = collect_rows(rows)?;
        page.reverse();
        Ok(page)
    }

    /// Replace the text of a message. Author only.
    pub fn edit_message(&self, id: MessageId, acting: UserId, content: &str) -> Result<Message> {
        let mut message = self.get_message(id)?;
        if message.author_id != acting {
            return Err(StoreError::Forbidden("only the author can edit".into()));
        }
        if message.deleted_for_everyone {
            return Err(StoreError::Invalid("message was deleted".into()));
        }

        let content = content.trim();
        if content.is_empty() && message.file_url.is_none() {
            return Err(StoreError::Invalid("message is empty".into()));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(StoreError::Invalid(format!(
                "message longer than {MAX_MESSAGE_LEN} characters"
            )));
        }

        let edited_at = now();
        self.conn().execute(
            "UPDATE messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
            params![id.to_string(), content, ts(&edited_at)],
        )?;
        message.content = content.to_string();
        message.edited_at = Some(edited_at);

        self.emit_update("messages", &message)?;
        Ok(message)
    }

    /// Hide a message for `viewer` only.
    pub fn hide_message(&self, id: MessageId, viewer: UserId) -> Result<()> {
        let message = self.get_message(id)?;
        if let Some(target) = message.target() {
            self.ensure_can_access(viewer, target)?;
        }

        self.conn().execute(
            "INSERT OR IGNORE INTO message_hidden (message_id, user_id) VALUES (?1, ?2)",
            params![id.to_string(), viewer.to_string()],
        )?;
        Ok(())
    }

    /// Tombstone a message for every participant.
    ///
    /// Allowed for the author, and for server owners/admins on channel
    /// messages. Content and attachment are cleared; the row stays so the
    /// UI can render "message deleted".
    pub fn delete_message_for_everyone(&self, id: MessageId, acting: UserId) -> Result<Message> {
        let mut message = self.get_message(id)?;

        let allowed = message.author_id == acting
            || match message.channel_id {
                Some(channel) => {
                    let server = self.get_channel(channel)?.server_id;
                    self.member_role(server, acting)?
                        .is_some_and(|role| role.can_manage())
                }
                None => false,
            };
        if !allowed {
            return Err(StoreError::Forbidden("cannot delete this message".into()));
        }

        self.conn().execute(
            "UPDATE messages
             SET deleted_for_everyone = 1, content = '',
                 file_url = NULL, file_name = NULL, file_type = NULL, file_size = NULL
             WHERE id = ?1",
            params![id.to_string()],
        )?;
        message.deleted_for_everyone = true;
        message.content.clear();
        message.file_url = None;
        message.file_name = None;
        message.file_type = None;
        message.file_size = None;

        tracing::debug!(message = %id.short(), by = %acting.short(), "message deleted for everyone");
        self.emit_update("messages", &message)?;
        Ok(message)
    }

    /// Case-insensitive substring search inside one conversation, newest first.
    pub fn search_messages(
        &self,
        viewer: UserId,
        target: MessageTarget,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Message>> {
        self.ensure_can_access(viewer, target)?;
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m
             WHERE m.{col} = ?1
               AND m.deleted_for_everyone = 0
               AND instr(lower(m.content), lower(?3)) > 0
               AND NOT EXISTS (SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?2)
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?4",
            col = target.column()
        ))?;
        let rows = stmt.query_map(
            params![target.id_string(), viewer.to_string(), query, limit],
            row_to_message,
        )?;
        collect_rows(rows)
    }

    /// Row-level access check: DM participant, group member, or member of
    /// the server owning the channel.
    pub fn ensure_can_access(&self, user: UserId, target: MessageTarget) -> Result<()> {
        let allowed = match target {
            MessageTarget::Dm(id) => self.get_dm_thread(id)?.includes(&user),
            MessageTarget::Group(id) => self.is_group_member(id, user)?,
            MessageTarget::Channel(id) => {
                let server = self.get_channel(id)?.server_id;
                self.member_role(server, user)?.is_some()
            }
        };
        if allowed {
            Ok(())
        } else {
            Err(StoreError::Forbidden("not a participant".into()))
        }
    }
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        dm_thread_id: opt_uuid_at(row, 1)?,
        group_thread_id: opt_uuid_at(row, 2)?,
        channel_id: opt_uuid_at(row, 3)?,
        author_id: uuid_at(row, 4)?,
        content: row.get(5)?,
        file_url: row.get(6)?,
        file_name: row.get(7)?,
        file_type: row.get(8)?,
        file_size: row.get(9)?,
        edited_at: opt_ts_at(row, 10)?,
        deleted_for_everyone: row.get(11)?,
        created_at: ts_at(row, 12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{db, user};
    use mshb_shared::types::ServerRole;

    #[test]
    fn pages_are_oldest_first() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let dm = MessageTarget::Dm(db.get_or_create_dm(alice, bob).unwrap().id);

        let ids: Vec<_> = (0..5)
            .map(|i| db.insert_message(alice, dm, &format!("m{i}"), None).unwrap().id)
            .collect();

        let newest = db.list_messages(bob, dm, None, 3).unwrap();
        let contents: Vec<_> = newest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);

        let older = db.list_messages(bob, dm, Some(ids[2]), 3).unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1"]);
    }

    #[test]
    fn outsiders_cannot_read_or_write() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let eve = user(&db, "eve");
        let dm = MessageTarget::Dm(db.get_or_create_dm(alice, bob).unwrap().id);

        assert!(matches!(
            db.insert_message(eve, dm, "hi", None),
            Err(StoreError::Forbidden(_))
        ));
        assert!(db.list_messages(eve, dm, None, 10).is_err());
    }

    #[test]
    fn empty_message_is_rejected_but_attachment_alone_is_fine() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let dm = MessageTarget::Dm(db.get_or_create_dm(alice, bob).unwrap().id);

        assert!(matches!(
            db.insert_message(alice, dm, "   ", None),
            Err(StoreError::Invalid(_))
        ));

        let file = Attachment {
            url: "http://localhost/storage/v1/object/public/chat-files/a/cat.png".into(),
            name: "cat.png".into(),
            mime_type: "image/png".into(),
            size: 42,
        };
        let m = db.insert_message(alice, dm, "", Some(&file)).unwrap();
        assert_eq!(m.attachment(), Some(file));
    }

    #[test]
    fn edit_is_author_only_and_sets_edited_at() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let dm = MessageTarget::Dm(db.get_or_create_dm(alice, bob).unwrap().id);
        let m = db.insert_message(alice, dm, "helo", None).unwrap();

        assert!(db.edit_message(m.id, bob, "nope").is_err());
        let edited = db.edit_message(m.id, alice, "hello").unwrap();
        assert_eq!(edited.content, "hello");
        assert!(db.get_message(m.id).unwrap().edited_at.is_some());
    }

    #[test]
    fn hidden_messages_disappear_for_that_viewer_only() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let dm = MessageTarget::Dm(db.get_or_create_dm(alice, bob).unwrap().id);
        let m = db.insert_message(alice, dm, "oops", None).unwrap();

        db.hide_message(m.id, bob).unwrap();
        assert!(db.list_messages(bob, dm, None, 10).unwrap().is_empty());
        assert_eq!(db.list_messages(alice, dm, None, 10).unwrap().len(), 1);
    }

    #[test]
    fn server_admin_can_delete_channel_messages() {
        let db = db();
        let owner = user(&db, "owner");
        let mod_user = user(&db, "moderator");
        let member = user(&db, "member");

        let (server, channels) = db.create_server(owner, "guild").unwrap();
        db.add_server_member(server.id, mod_user).unwrap();
        db.add_server_member(server.id, member).unwrap();
        db.set_member_role(server.id, owner, mod_user, ServerRole::Admin).unwrap();

        let general = MessageTarget::Channel(channels[0].id);
        let m = db.insert_message(member, general, "spam", None).unwrap();

        let other = user(&db, "other");
        db.add_server_member(server.id, other).unwrap();
        assert!(db.delete_message_for_everyone(m.id, other).is_err());

        let deleted = db.delete_message_for_everyone(m.id, mod_user).unwrap();
        assert!(deleted.deleted_for_everyone);
        assert!(deleted.content.is_empty());
    }

    #[test]
    fn dm_delete_for_everyone_is_author_only() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let dm = MessageTarget::Dm(db.get_or_create_dm(alice, bob).unwrap().id);
        let m = db.insert_message(alice, dm, "secret", None).unwrap();

        assert!(db.delete_message_for_everyone(m.id, bob).is_err());
        db.delete_message_for_everyone(m.id, alice).unwrap();
        assert!(db.search_messages(bob, dm, "secret", 10).unwrap().is_empty());
    }

    #[test]
    fn search_is_case_insensitive() {
        let db = db();
        let alice = user(&db, "alice");
        let bob = user(&db, "bob");
        let dm = MessageTarget::Dm(db.get_or_create_dm(alice, bob).unwrap().id);
        db.insert_message(alice, dm, "Lunch at noon?", None).unwrap();
        db.insert_message(bob, dm, "sure", None).unwrap();

        let hits = db.search_messages(bob, dm, "LUNCH", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].author_id, alice);
    }
}
