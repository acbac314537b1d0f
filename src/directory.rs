//! Group lifecycle: creating groups, growing membership, deleting.
use bson::oid::ObjectId;

use crate::error::{LedgerError, ValidationError};
use crate::schemas::{Group, Member, MemberId};
use crate::store::DocumentStore;

/// Creates a group owned by `creator`. The creator is always a member and
/// duplicate ids are folded into the first occurrence.
pub async fn create_group(
    store: &dyn DocumentStore,
    creator: &Member,
    group_id: Option<String>,
    name: &str,
    members: Vec<Member>,
) -> Result<Group, LedgerError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyGroupName.into());
    }

    let mut unique: Vec<Member> = Vec::with_capacity(members.len() + 1);
    for member in members.into_iter().chain(std::iter::once(creator.clone())) {
        if !unique.iter().any(|m| m.id == member.id) {
            unique.push(member);
        }
    }

    let group = Group {
        id: group_id.unwrap_or_else(|| ObjectId::new().to_hex()),
        name: name.to_string(),
        members: unique,
    };
    if !store.insert_group(&group).await? {
        return Err(ValidationError::GroupExists(group.id).into());
    }
    tracing::info!(group = %group.id, members = group.members.len(), "group created");
    Ok(group)
}

/// Adds `member` to the group on behalf of `actor`, who must already belong
/// to it. Returns the updated group.
pub async fn add_member(
    store: &dyn DocumentStore,
    group: &Group,
    actor: &MemberId,
    member: Member,
) -> Result<Group, LedgerError> {
    if !group.is_member(actor) {
        return Err(ValidationError::NotAMember(actor.clone()).into());
    }
    if group.is_member(&member.id) {
        return Err(ValidationError::AlreadyMember(member.id).into());
    }

    let mut updated = group.clone();
    updated.members.push(member);
    store.replace_members(&updated.id, &updated.members).await?;
    tracing::info!(group = %updated.id, members = updated.members.len(), "member added");
    Ok(updated)
}

pub async fn groups_for(store: &dyn DocumentStore, member: &MemberId) -> Result<Vec<Group>, LedgerError> {
    Ok(store.groups_for_member(member).await?)
}

pub async fn delete_group(
    store: &dyn DocumentStore,
    group: &Group,
    actor: &MemberId,
) -> Result<(), LedgerError> {
    if !group.is_member(actor) {
        return Err(ValidationError::NotAMember(actor.clone()).into());
    }
    if !store.delete_group(&group.id).await? {
        return Err(LedgerError::GroupNotFound(group.id.clone()));
    }
    tracing::info!(group = %group.id, "group deleted");
    Ok(())
}
