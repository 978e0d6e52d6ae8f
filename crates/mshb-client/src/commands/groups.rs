use serde::Serialize;
use tracing::info;

use mshb_shared::types::{GroupId, GroupRole, UserId};
use mshb_store::{GroupThread, Profile};

use crate::error::Result;
use crate::state::{signed_in, SharedState};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberDto {
    pub profile: Profile,
    pub role: GroupRole,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub group: GroupThread,
    pub member_count: usize,
    pub unread: u32,
}

pub fn create_group(state: &SharedState, name: &str, members: &[UserId]) -> Result<GroupThread> {
    let (user_id, platform) = signed_in(state)?;
    let group = platform.db()?.create_group(user_id, name, members)?;
    info!(group = %group.id.short(), owner = %user_id.short(), "Group created");
    Ok(group)
}

pub fn rename_group(state: &SharedState, group: GroupId, name: &str) -> Result<GroupThread> {
    let (user_id, platform) = signed_in(state)?;
    let group = platform.db()?.rename_group(group, user_id, name)?;
    Ok(group)
}

/// Admins only.
pub fn add_group_member(state: &SharedState, group: GroupId, user: UserId) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.add_group_member(group, user_id, user)?;
    Ok(())
}

/// Admins may remove anyone, members only themselves.
pub fn remove_group_member(state: &SharedState, group: GroupId, user: UserId) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.remove_group_member(group, user_id, user)?;
    Ok(())
}

pub fn leave_group(state: &SharedState, group: GroupId) -> Result<()> {
    let (user_id, platform) = signed_in(state)?;
    platform.db()?.remove_group_member(group, user_id, user_id)?;
    info!(group = %group.short(), user = %user_id.short(), "Left group");
    Ok(())
}

pub fn list_groups(state: &SharedState) -> Result<Vec<GroupDto>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    let unread = db.unread_counts(user_id)?;

    db.list_groups_for_user(user_id)?
        .into_iter()
        .map(|group| -> Result<GroupDto> {
            Ok(GroupDto {
                member_count: db.list_group_members(group.id)?.len(),
                unread: unread.groups.get(&group.id).copied().unwrap_or(0),
                group,
            })
        })
        .collect()
}

pub fn group_members(state: &SharedState, group: GroupId) -> Result<Vec<GroupMemberDto>> {
    let (user_id, platform) = signed_in(state)?;
    let db = platform.db()?;
    db.ensure_can_access(user_id, mshb_store::MessageTarget::Group(group))?;

    db.list_group_members(group)?
        .into_iter()
        .map(|member| -> Result<GroupMemberDto> {
            Ok(GroupMemberDto {
                profile: db.get_profile(member.user_id)?,
                role: member.role,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{auth, messaging};
    use crate::state::test_support;
    use mshb_store::MessageTarget;

    #[tokio::test]
    async fn group_lifecycle() {
        let (alice, _dir) = test_support::state().await;
        let bob = test_support::peer_state(&alice);
        let carol = test_support::peer_state(&alice);
        auth::sign_up(&alice, "alice@example.com", "123456", "alice").await.unwrap();
        let b = auth::sign_up(&bob, "bob@example.com", "123456", "bob").await.unwrap();
        let c = auth::sign_up(&carol, "carol@example.com", "123456", "carol").await.unwrap();

        let group = create_group(&alice, "Trip", &[b.id]).unwrap();
        assert_eq!(group_members(&bob, group.id).unwrap().len(), 2);

        // Members cannot add or rename.
        assert!(add_group_member(&bob, group.id, c.id).is_err());
        assert!(rename_group(&bob, group.id, "Mine").is_err());

        add_group_member(&alice, group.id, c.id).unwrap();
        let renamed = rename_group(&alice, group.id, "Road trip").unwrap();
        assert_eq!(renamed.name, "Road trip");

        messaging::send_message(&carol, MessageTarget::Group(group.id), "hello all", None)
            .await
            .unwrap();
        let listed = list_groups(&bob).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].member_count, 3);
        assert_eq!(listed[0].unread, 1);

        // Bob may not remove Carol but may leave.
        assert!(remove_group_member(&bob, group.id, c.id).is_err());
        leave_group(&bob, group.id).unwrap();
        assert!(list_groups(&bob).unwrap().is_empty());
        assert!(group_members(&bob, group.id).is_err());
    }
}
