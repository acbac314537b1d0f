//! # Storage boundary
//!
//! [`DocumentStore`] is everything the engine needs from the external
//! document database: group documents, raw expense documents, and a change
//! feed per group. Expense documents come back undecoded so the ledger can
//! drop a corrupt record without failing the whole load.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bson::Document;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::StoreError;
use crate::schemas::{Expense, Group, GroupId, Member};

/// Notifications that something in a group changed. Each item means "reload
/// the snapshot"; the stream carries no payload.
pub type ChangeStream = BoxStream<'static, Result<(), StoreError>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Files a new group. Returns false, leaving the stored group untouched,
    /// if the id is already taken.
    async fn insert_group(&self, group: &Group) -> Result<bool, StoreError>;

    async fn find_group(&self, group_id: &str) -> Result<Option<Group>, StoreError>;

    /// Groups listing `member_id` among their members.
    async fn groups_for_member(&self, member_id: &str) -> Result<Vec<Group>, StoreError>;

    async fn replace_members(&self, group_id: &str, members: &[Member]) -> Result<(), StoreError>;

    /// Removes the group and every expense filed under it.
    /// Returns false if the group didn't exist.
    async fn delete_group(&self, group_id: &str) -> Result<bool, StoreError>;

    /// Raw expense documents for a group, in no particular order.
    async fn expense_documents(&self, group_id: &str) -> Result<Vec<Document>, StoreError>;

    async fn insert_expense(&self, group_id: &str, expense: &Expense) -> Result<(), StoreError>;

    /// Returns false if no such expense was filed under the group.
    async fn delete_expense(&self, group_id: &str, expense_id: &str) -> Result<bool, StoreError>;

    async fn watch_group(&self, group_id: &str) -> Result<ChangeStream, StoreError>;
}

#[derive(Default)]
struct GroupEntry {
    group: Option<Group>,
    expenses: Vec<Document>,
}

/// In-process store for tests and local runs.
pub struct MemoryStore {
    groups: Mutex<HashMap<GroupId, GroupEntry>>,
    changes: broadcast::Sender<GroupId>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            groups: Mutex::new(HashMap::new()),
            changes,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files a document as-is, bypassing encoding. Lets tests plant records
    /// that won't decode.
    pub fn insert_raw_expense(&self, group_id: &str, document: Document) -> Result<(), StoreError> {
        self.with_group(group_id, |entry| entry.expenses.push(document))
    }

    fn with_group<T>(
        &self,
        group_id: &str,
        f: impl FnOnce(&mut GroupEntry) -> T,
    ) -> Result<T, StoreError> {
        let result = {
            let mut groups = self.groups.lock().map_err(|_| StoreError::Poisoned)?;
            f(groups.entry(group_id.to_string()).or_default())
        };
        // Nobody listening is fine
        let _ = self.changes.send(group_id.to_string());
        Ok(result)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_group(&self, group: &Group) -> Result<bool, StoreError> {
        self.with_group(&group.id, |entry| {
            if entry.group.is_some() {
                return false;
            }
            entry.group = Some(group.clone());
            true
        })
    }

    async fn find_group(&self, group_id: &str) -> Result<Option<Group>, StoreError> {
        let groups = self.groups.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(groups.get(group_id).and_then(|entry| entry.group.clone()))
    }

    async fn groups_for_member(&self, member_id: &str) -> Result<Vec<Group>, StoreError> {
        let groups = self.groups.lock().map_err(|_| StoreError::Poisoned)?;
        let mut found: Vec<Group> = groups
            .values()
            .filter_map(|entry| entry.group.as_ref())
            .filter(|group| group.is_member(member_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn replace_members(&self, group_id: &str, members: &[Member]) -> Result<(), StoreError> {
        self.with_group(group_id, |entry| {
            if let Some(group) = entry.group.as_mut() {
                group.members = members.to_vec();
            }
        })
    }

    async fn delete_group(&self, group_id: &str) -> Result<bool, StoreError> {
        let removed = {
            let mut groups = self.groups.lock().map_err(|_| StoreError::Poisoned)?;
            groups.remove(group_id).is_some_and(|entry| entry.group.is_some())
        };
        let _ = self.changes.send(group_id.to_string());
        Ok(removed)
    }

    async fn expense_documents(&self, group_id: &str) -> Result<Vec<Document>, StoreError> {
        let groups = self.groups.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(groups
            .get(group_id)
            .map(|entry| entry.expenses.clone())
            .unwrap_or_default())
    }

    async fn insert_expense(&self, group_id: &str, expense: &Expense) -> Result<(), StoreError> {
        let document = bson::to_document(expense)?;
        self.with_group(group_id, |entry| entry.expenses.push(document))
    }

    async fn delete_expense(&self, group_id: &str, expense_id: &str) -> Result<bool, StoreError> {
        self.with_group(group_id, |entry| {
            let before = entry.expenses.len();
            entry
                .expenses
                .retain(|doc| doc.get_str("id").map_or(true, |id| id != expense_id));
            entry.expenses.len() != before
        })
    }

    async fn watch_group(&self, group_id: &str) -> Result<ChangeStream, StoreError> {
        let receiver = self.changes.subscribe();
        let group_id = group_id.to_string();
        let changes = stream::unfold(receiver, move |mut receiver| {
            let group_id = group_id.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(changed) if changed == group_id => return Some((Ok(()), receiver)),
                        Ok(_) => continue,
                        // Missed some; a reload catches up anyway
                        Err(RecvError::Lagged(_)) => return Some((Ok(()), receiver)),
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(changes.boxed())
    }
}
