use std::sync::Arc;

use bson::oid::ObjectId;
use serde::Serialize;

use crate::balance::EPSILON;
use crate::error::{LedgerError, ValidationError};
use crate::exchange::{settle, Settlement};
use crate::schemas::{Expense, ExpenseDraft, Group, MemberId, SplitMethod};
use crate::store::DocumentStore;

/// A group and its full expense list at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub group: Group,
    pub expenses: Vec<Expense>,
}

impl Snapshot {
    pub fn settle(&self) -> Result<Settlement, LedgerError> {
        Ok(settle(&self.group.members, &self.expenses)?)
    }
}

/// How far custom splits are checked against the expense amount.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Shares are taken as entered; a mismatch only gets logged.
    #[default]
    Lenient,
    /// Shares must add up to the amount.
    Strict,
}

/// Checks an expense against the group it is being filed under.
pub fn validate(group: &Group, expense: &Expense, policy: SplitPolicy) -> Result<(), ValidationError> {
    if expense.title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if !expense.amount.is_finite() || expense.amount <= 0.0 {
        return Err(ValidationError::NonPositiveAmount(expense.amount));
    }
    if !group.is_member(&expense.paid_by) {
        return Err(ValidationError::PayerNotMember(expense.paid_by.clone()));
    }

    match (expense.split_method, &expense.custom_split) {
        (SplitMethod::Equal, None) => Ok(()),
        (SplitMethod::Equal, Some(_)) => Err(ValidationError::UnexpectedCustomSplit),
        (SplitMethod::Custom, None) => Err(ValidationError::MissingCustomSplit),
        (SplitMethod::Custom, Some(split)) => {
            if split.is_empty() {
                return Err(ValidationError::MissingCustomSplit);
            }
            for (member, &share) in split {
                if !group.is_member(member) {
                    return Err(ValidationError::UnknownSplitMember(member.clone()));
                }
                if !share.is_finite() || share < 0.0 {
                    return Err(ValidationError::InvalidShare {
                        member: member.clone(),
                        share,
                    });
                }
            }
            let total: f64 = split.values().sum();
            if policy == SplitPolicy::Strict && (total - expense.amount).abs() > EPSILON {
                return Err(ValidationError::SplitTotalMismatch {
                    expected: expense.amount,
                    actual: total,
                });
            }
            Ok(())
        }
    }
}

/// The authoritative expense list of each group, read from and written
/// through to a [`DocumentStore`].
#[derive(Clone)]
pub struct ExpenseLedger {
    store: Arc<dyn DocumentStore>,
    policy: SplitPolicy,
}

impl ExpenseLedger {
    pub fn new(store: Arc<dyn DocumentStore>, policy: SplitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// All expenses filed under a group, newest first. Records that fail to
    /// decode are skipped with a warning.
    pub async fn load(&self, group_id: &str) -> Result<Vec<Expense>, LedgerError> {
        let documents = self.store.expense_documents(group_id).await?;
        let mut expenses: Vec<Expense> = documents
            .into_iter()
            .filter_map(|document| {
                let id = document.get_str("id").unwrap_or("<missing>").to_string();
                match bson::from_document::<Expense>(document) {
                    Ok(expense) if expense.amount.is_finite() && expense.amount >= 0.0 => {
                        Some(expense)
                    }
                    Ok(expense) => {
                        tracing::warn!(group = group_id, expense = %id, amount = expense.amount, "skipping expense with invalid amount");
                        None
                    }
                    Err(err) => {
                        tracing::warn!(group = group_id, expense = %id, error = %err, "skipping malformed expense");
                        None
                    }
                }
            })
            .collect();
        expenses.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
        Ok(expenses)
    }

    pub async fn group(&self, group_id: &str) -> Result<Group, LedgerError> {
        self.store
            .find_group(group_id)
            .await?
            .ok_or_else(|| LedgerError::GroupNotFound(group_id.to_string()))
    }

    pub async fn snapshot(&self, group_id: &str) -> Result<Snapshot, LedgerError> {
        let group = self.group(group_id).await?;
        let expenses = self.load(group_id).await?;
        Ok(Snapshot { group, expenses })
    }

    pub async fn settlement(&self, group_id: &str) -> Result<Settlement, LedgerError> {
        self.snapshot(group_id).await?.settle()
    }

    /// Validates the draft on behalf of `actor` and files it. Nothing is
    /// written if validation fails.
    pub async fn add(
        &self,
        group: &Group,
        actor: &MemberId,
        draft: ExpenseDraft,
    ) -> Result<Expense, LedgerError> {
        if !group.is_member(actor) {
            return Err(ValidationError::NotAMember(actor.clone()).into());
        }
        let expense = draft.into_expense(ObjectId::new().to_hex(), actor);
        validate(group, &expense, self.policy)?;

        self.store.insert_expense(&group.id, &expense).await?;
        tracing::info!(group = %group.id, expense = %expense.id, amount = expense.amount, "expense added");
        Ok(expense)
    }

    pub async fn remove(
        &self,
        group: &Group,
        actor: &MemberId,
        expense_id: &str,
    ) -> Result<(), LedgerError> {
        if !group.is_member(actor) {
            return Err(ValidationError::NotAMember(actor.clone()).into());
        }
        if !self.store.delete_expense(&group.id, expense_id).await? {
            return Err(LedgerError::ExpenseNotFound(expense_id.to_string()));
        }
        tracing::info!(group = %group.id, expense = expense_id, "expense removed");
        Ok(())
    }
}
