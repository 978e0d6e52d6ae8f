use std::collections::HashMap;

use rusqlite::params;

use mshb_shared::types::{MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Reaction, ReactionSummary};
use crate::rows::{collect_rows, now, ts, ts_at, uuid_at};

impl Database {
    /// Add the reaction if absent, remove it if present.
    ///
    /// Returns `true` when the reaction is now present.
    pub fn toggle_reaction(&self, message_id: MessageId, user: UserId, emoji: &str) -> Result<bool> {
        let emoji = emoji.trim();
        if emoji.is_empty() {
            return Err(StoreError::Invalid("emoji is empty".into()));
        }

        let message = self.get_message(message_id)?;
        if message.deleted_for_everyone {
            return Err(StoreError::Invalid("message was deleted".into()));
        }
        if let Some(target) = message.target() {
            self.ensure_can_access(user, target)?;
        }

        let removed = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            params![message_id.to_string(), user.to_string(), emoji],
        )?;
        let reaction = Reaction {
            message_id,
            user_id: user,
            emoji: emoji.to_string(),
            created_at: now(),
        };
        if removed > 0 {
            self.emit_delete("reactions", &reaction)?;
            return Ok(false);
        }

        self.conn().execute(
            "INSERT INTO reactions (message_id, user_id, emoji, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                message_id.to_string(),
                user.to_string(),
                emoji,
                ts(&reaction.created_at),
            ],
        )?;
        self.emit_insert("reactions", &reaction)?;
        Ok(true)
    }

    pub fn get_reactions_for_message(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, user_id, emoji, created_at
             FROM reactions WHERE message_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], row_to_reaction)?;
        collect_rows(rows)
    }

    /// Reactions for a batch of messages, folded by emoji in first-use order.
    pub fn reaction_summaries(
        &self,
        message_ids: &[MessageId],
    ) -> Result<HashMap<MessageId, Vec<ReactionSummary>>> {
        let mut out: HashMap<MessageId, Vec<ReactionSummary>> = HashMap::new();

        for id in message_ids {
            let mut summaries: Vec<ReactionSummary> = Vec::new();
            for reaction in self.get_reactions_for_message(*id)? {
                match summaries.iter_mut().find(|s| s.emoji == reaction.emoji) {
                    Some(summary) => {
                        summary.count += 1;
                        summary.user_ids.push(reaction.user_id);
                    }
                    None => summaries.push(ReactionSummary {
                        emoji: reaction.emoji,
                        count: 1,
                        user_ids: vec![reaction.user_id],
                    }),
                }
            }
            if !summaries.is_empty() {
                out.insert(*id, summaries);
            }
        }

        Ok(out)
    }
}

fn row_to_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        message_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        emoji: row.get(2)?,
        created_at: ts_at(row, 3)?,
    })
}
