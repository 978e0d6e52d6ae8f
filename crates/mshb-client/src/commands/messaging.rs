use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mshb_shared::types::{Bucket, ChannelId, MessageId, ServerId, ThreadId, UserId};
use mshb_store::storage::{guess_mime, object_key};
use mshb_store::{Attachment, DmThread, Message, MessageTarget, Profile, ReactionSummary, UnreadCounts};

use crate::error::Result;
use crate::state::{signed_in, SharedState};

use super::profile::remove_object;

pub const PAGE_SIZE: u32 = 50;
pub const SEARCH_LIMIT: u32 = 25;

/// A file picked by the user, not yet uploaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingFile {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub message: Message,
    pub reactions: Vec<ReactionSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DmThreadDto {
    pub thread: DmThread,
    pub other: Profile,
    pub unread: u32,
}

/// Find or create the DM thread with `other`.
pub fn open_dm(state: &SharedState, other: UserId) -> Result<DmThread> {
    let (user_id, platform) = signed_in(state)?;
    let thread = platform.db()?.get_or_create_dm(user_id, other)?;
    Ok(thread)
}

pub fn list_dm_threads(state: &SharedState) -> Result<Vec<DmThreadDto>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    let unread = db.unread_counts(user_id)?;

    let mut out = Vec::new();
    for thread in db.list_dm_threads(user_id)? {
        let other = db.get_profile(thread.other(&user_id))?;
        let unread = unread.dms.get(&thread.id).copied().unwrap_or(0);
        out.push(DmThreadDto { thread, other, unread });
    }
    Ok(out)
}

/// Send a message with an optional attachment.
///
/// Blank text without a file is ignored and yields `Ok(None)`.
pub async fn send_message(
    state: &SharedState,
    target: MessageTarget,
    content: &str,
    file: Option<OutgoingFile>,
) -> Result<Option<Message>> {
    let content = content.trim();
    if content.is_empty() && file.is_none() {
        return Ok(None);
    }

    let (user_id, platform) = signed_in(state)?;
    platform.db()?.ensure_can_access(user_id, target)?;

    let attachment = match file {
        Some(file) => {
            let key = object_key(&user_id.to_string(), &file.name, &file.data);
            let url = platform.storage.upload(Bucket::ChatFiles, &key, &file.data).await?;
            Some(Attachment {
                url,
                mime_type: guess_mime(&file.name).to_string(),
                size: file.data.len() as i64,
                name: file.name,
            })
        }
        None => None,
    };

    let inserted = platform
        .db()?
        .insert_message(user_id, target, content, attachment.as_ref());
    match inserted {
        Ok(message) => {
            debug!(message = %message.id.short(), author = %user_id.short(), "Message sent");
            Ok(Some(message))
        }
        Err(e) => {
            if let Some(attachment) = &attachment {
                remove_object(&platform, &attachment.url).await;
            }
            Err(e.into())
        }
    }
}

pub fn edit_message(state: &SharedState, message_id: MessageId, content: &str) -> Result<Message> {
    let (user_id, platform) = signed_in(state)?;
    let message = platform.db()?.edit_message(message_id, user_id, content)?;
    Ok(message)
}

/// Hide a message for the current user only.
pub fn hide_message(state: &SharedState, message_id: MessageId) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.hide_message(message_id, user_id)?;
    Ok(())
}

pub async fn delete_for_everyone(state: &SharedState, message_id: MessageId) -> Result<Message> {
    let (user_id, platform) = signed_in(state)?;
    let (deleted, file_url) = {
        let db = platform.db()?;
        let file_url = db.get_message(message_id)?.file_url;
        (db.delete_message_for_everyone(message_id, user_id)?, file_url)
    };

    if let Some(url) = file_url {
        remove_object(&platform, &url).await;
    }
    info!(message = %message_id.short(), by = %user_id.short(), "Message deleted for everyone");
    Ok(deleted)
}

/// One page of history, oldest first, with reaction summaries.
pub fn list_messages(
    state: &SharedState,
    target: MessageTarget,
    before: Option<MessageId>,
) -> Result<Vec<MessageView>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    let messages = db.list_messages(user_id, target, before, PAGE_SIZE)?;

    let ids: Vec<MessageId> = messages.iter().map(|m| m.id).collect();
    let mut reactions = db.reaction_summaries(&ids)?;
    Ok(messages
        .into_iter()
        .map(|message| MessageView {
            reactions: reactions.remove(&message.id).unwrap_or_default(),
            message,
        })
        .collect())
}

pub fn search_messages(state: &SharedState, target: MessageTarget, query: &str) -> Result<Vec<Message>> {
    let (user_id, platform) = signed_in(state)?;
    let found = platform.db()?.search_messages(user_id, target, query, SEARCH_LIMIT)?;
    Ok(found)
}

/// Add the reaction, or remove it if it was already there. Returns whether
/// the reaction is now present.
pub fn toggle_reaction(state: &SharedState, message_id: MessageId, emoji: &str) -> Result<bool> {
    let (user_id, platform) = signed_in(state)?;
    let present = platform.db()?.toggle_reaction(message_id, user_id, emoji)?;
    Ok(present)
}

pub fn mark_read(state: &SharedState, target: MessageTarget) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.mark_read(user_id, target, Utc::now())?;
    Ok(())
}

pub fn unread_counts(state: &SharedState) -> Result<UnreadCounts> {
    let (user_id, platform) = signed_in(state)?;
    let counts = platform.db()?.unread_counts(user_id)?;
    Ok(counts)
}

pub fn channel_unread_counts(state: &SharedState, server_id: ServerId) -> Result<HashMap<ChannelId, u32>> {
    let (user_id, platform) = signed_in(state)?;
    let counts = platform.db()?.channel_unread_counts(user_id, server_id)?;
    Ok(counts)
}

/// Target for a DM thread id, as the UI passes it around.
pub fn dm(thread: ThreadId) -> MessageTarget {
    MessageTarget::Dm(thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::auth;
    use crate::events::ClientEvent;
    use crate::state::test_support;
    use std::time::Duration;

    async fn pair() -> (SharedState, SharedState, Profile, Profile, tempfile::TempDir) {
        let (alice, dir) = test_support::state().await;
        let bob = test_support::peer_state(&alice);
        let a = auth::sign_up(&alice, "alice@example.com", "123456", "alice").await.unwrap();
        let b = auth::sign_up(&bob, "bob@example.com", "123456", "bob").await.unwrap();
        (alice, bob, a, b, dir)
    }

    #[tokio::test]
    async fn dm_round_trip_with_unread_and_event() {
        let (alice, bob, _a, b, _dir) = pair().await;
        let mut bob_events = bob.lock().unwrap().subscribe();

        let thread = open_dm(&alice, b.id).unwrap();
        assert!(send_message(&alice, dm(thread.id), "   ", None).await.unwrap().is_none());
        let sent = send_message(&alice, dm(thread.id), "hi bob", None).await.unwrap().unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), bob_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ClientEvent::NewMessage(m) if m.id == sent.id));

        let threads = list_dm_threads(&bob).unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].other.username, "alice");
        assert_eq!(threads[0].unread, 1);

        mark_read(&bob, dm(thread.id)).unwrap();
        assert_eq!(unread_counts(&bob).unwrap().total(), 0);

        let history = list_messages(&bob, dm(thread.id), None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message.content, "hi bob");
    }

    #[tokio::test]
    async fn reactions_edit_hide_and_search() {
        let (alice, bob, _a, b, _dir) = pair().await;
        let thread = open_dm(&alice, b.id).unwrap();
        let sent = send_message(&alice, dm(thread.id), "lunch today?", None).await.unwrap().unwrap();

        assert!(toggle_reaction(&bob, sent.id, "👍").unwrap());
        assert!(toggle_reaction(&alice, sent.id, "👍").unwrap());
        let view = &list_messages(&alice, dm(thread.id), None).unwrap()[0];
        assert_eq!(view.reactions.len(), 1);
        assert_eq!(view.reactions[0].count, 2);
        assert!(!toggle_reaction(&bob, sent.id, "👍").unwrap());

        // Only the author can edit.
        assert!(edit_message(&bob, sent.id, "nope").is_err());
        let edited = edit_message(&alice, sent.id, "lunch tomorrow?").unwrap();
        assert!(edited.edited_at.is_some());
        assert_eq!(search_messages(&bob, dm(thread.id), "TOMORROW").unwrap().len(), 1);

        hide_message(&bob, sent.id).unwrap();
        assert!(list_messages(&bob, dm(thread.id), None).unwrap().is_empty());
        assert_eq!(list_messages(&alice, dm(thread.id), None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attachment_upload_and_delete_for_everyone() {
        let (alice, bob, _a, b, _dir) = pair().await;
        let thread = open_dm(&alice, b.id).unwrap();

        let file = OutgoingFile {
            name: "notes.txt".into(),
            data: b"remember the milk".to_vec(),
        };
        let sent = send_message(&alice, dm(thread.id), "", Some(file)).await.unwrap().unwrap();
        let url = sent.file_url.clone().unwrap();
        assert_eq!(sent.file_type.as_deref(), Some("text/plain"));

        let platform = alice.lock().unwrap().platform.clone();
        let (bucket, path) = platform.storage.parse_public_url(&url).unwrap();
        assert_eq!(bucket, Bucket::ChatFiles);
        assert!(platform.storage.download(bucket, &path).await.is_ok());

        assert!(delete_for_everyone(&bob, sent.id).await.is_err());
        let deleted = delete_for_everyone(&alice, sent.id).await.unwrap();
        assert!(deleted.deleted_for_everyone);
        assert!(deleted.file_url.is_none());
        assert!(platform.storage.download(bucket, &path).await.is_err());
    }

    #[tokio::test]
    async fn outsiders_cannot_post_or_upload() {
        let (alice, _bob, _a, b, _dir) = pair().await;
        let thread = open_dm(&alice, b.id).unwrap();

        let carol = test_support::peer_state(&alice);
        auth::sign_up(&carol, "carol@example.com", "123456", "carol").await.unwrap();
        let file = OutgoingFile {
            name: "x.png".into(),
            data: vec![1, 2, 3],
        };
        assert!(send_message(&carol, dm(thread.id), "hi", Some(file)).await.is_err());

        let platform = alice.lock().unwrap().platform.clone();
        let chat_dir = platform.storage.root().join("chat-files");
        assert!(!chat_dir.exists());
    }
}
