use async_trait::async_trait;
use bson::{doc, Document};
use futures::stream::{self, StreamExt, TryStreamExt};
use mongodb::options::{ChangeStreamOptions, FullDocumentType, UpdateOptions};
use mongodb::{Client, Collection, Database};

use crate::error::StoreError;
use crate::schemas::{Expense, Group, Member};
use crate::store::{ChangeStream, DocumentStore};

/// Groups live in `Groups`; expenses in `Expenses`, each tagged with the
/// `groupId` it was filed under.
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    pub fn new(client: &Client, database: &str) -> Self {
        Self {
            database: client.database(database),
        }
    }

    fn groups(&self) -> Collection<Group> {
        self.database.collection("Groups")
    }

    fn expenses(&self) -> Collection<Document> {
        self.database.collection("Expenses")
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    /// Upserts with `$setOnInsert` so an existing group with the same id is
    /// never replaced or duplicated.
    async fn insert_group(&self, group: &Group) -> Result<bool, StoreError> {
        let document = bson::to_document(group)?;
        let options = UpdateOptions::builder().upsert(true).build();
        let result = self
            .groups()
            .update_one(
                doc! { "id": group.id.as_str() },
                doc! { "$setOnInsert": document },
                options,
            )
            .await?;
        Ok(result.upserted_id.is_some())
    }

    async fn find_group(&self, group_id: &str) -> Result<Option<Group>, StoreError> {
        Ok(self.groups().find_one(doc! { "id": group_id }, None).await?)
    }

    async fn groups_for_member(&self, member_id: &str) -> Result<Vec<Group>, StoreError> {
        let cursor = self
            .groups()
            .find(doc! { "members.id": member_id }, None)
            .await?;
        let mut groups: Vec<Group> = cursor.try_collect().await?;
        groups.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn replace_members(&self, group_id: &str, members: &[Member]) -> Result<(), StoreError> {
        let members = bson::to_bson(members)?;
        self.groups()
            .update_one(
                doc! { "id": group_id },
                doc! { "$set": { "members": members } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<bool, StoreError> {
        let deleted = self
            .groups()
            .delete_one(doc! { "id": group_id }, None)
            .await?;
        self.expenses()
            .delete_many(doc! { "groupId": group_id }, None)
            .await?;
        Ok(deleted.deleted_count > 0)
    }

    async fn expense_documents(&self, group_id: &str) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .expenses()
            .find(doc! { "groupId": group_id }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_expense(&self, group_id: &str, expense: &Expense) -> Result<(), StoreError> {
        let mut document = bson::to_document(expense)?;
        document.insert("groupId", group_id);
        self.expenses().insert_one(document, None).await?;
        Ok(())
    }

    async fn delete_expense(&self, group_id: &str, expense_id: &str) -> Result<bool, StoreError> {
        let deleted = self
            .expenses()
            .delete_one(doc! { "groupId": group_id, "id": expense_id }, None)
            .await?;
        Ok(deleted.deleted_count > 0)
    }

    /// Change streams need a replica set. Deletes carry no document, so any
    /// expense delete wakes every watcher; the reload sorts it out.
    async fn watch_group(&self, group_id: &str) -> Result<ChangeStream, StoreError> {
        let options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .build();

        let expense_changes = self
            .expenses()
            .watch(
                [doc! { "$match": { "$or": [
                    { "fullDocument.groupId": group_id },
                    { "operationType": "delete" },
                ] } }],
                options.clone(),
            )
            .await?
            .map_ok(|_| ())
            .map_err(StoreError::from);

        let group_changes = self
            .groups()
            .watch(
                [doc! { "$match": { "$or": [
                    { "fullDocument.id": group_id },
                    { "operationType": "delete" },
                ] } }],
                options,
            )
            .await?
            .map_ok(|_| ())
            .map_err(StoreError::from);

        Ok(stream::select(expense_changes, group_changes).boxed())
    }
}
