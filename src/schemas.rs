use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type MemberId = String;
pub type GroupId = String;
pub type ExpenseId = String;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Group {
    pub fn is_member(&self, id: &str) -> bool {
        self.members.iter().any(|member| member.id == id)
    }

    pub fn member_name(&self, id: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|member| member.id == id)
            .map(|member| member.name.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMethod {
    Equal,
    Custom,
}

/// Absolute amount each listed member owes for one expense.
pub type CustomSplit = BTreeMap<MemberId, f64>;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: ExpenseId,
    pub title: String,
    pub amount: f64,
    pub paid_by: MemberId,
    pub split_method: SplitMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_split: Option<CustomSplit>,
    pub date: DateTime<Utc>,
}

/// What a caller submits; the ledger fills in the id, and the payer and date
/// when they are left out.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDraft {
    pub title: String,
    pub amount: f64,
    #[serde(default)]
    pub paid_by: Option<MemberId>,
    #[serde(default = "default_split_method")]
    pub split_method: SplitMethod,
    #[serde(default)]
    pub custom_split: Option<CustomSplit>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

fn default_split_method() -> SplitMethod {
    SplitMethod::Equal
}

impl ExpenseDraft {
    pub fn equal(title: impl Into<String>, amount: f64) -> Self {
        Self {
            title: title.into(),
            amount,
            paid_by: None,
            split_method: SplitMethod::Equal,
            custom_split: None,
            date: None,
        }
    }

    pub fn custom(title: impl Into<String>, amount: f64, split: CustomSplit) -> Self {
        Self {
            split_method: SplitMethod::Custom,
            custom_split: Some(split),
            ..Self::equal(title, amount)
        }
    }

    pub fn paid_by(mut self, payer: impl Into<MemberId>) -> Self {
        self.paid_by = Some(payer.into());
        self
    }

    pub fn dated(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    pub fn into_expense(self, id: ExpenseId, actor: &MemberId) -> Expense {
        Expense {
            id,
            title: self.title,
            amount: self.amount,
            paid_by: self.paid_by.unwrap_or_else(|| actor.clone()),
            split_method: self.split_method,
            custom_split: self.custom_split,
            date: self.date.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expense_documents_use_camel_case_keys() {
        let json = serde_json::json!({
            "id": "e1",
            "title": "Hotel",
            "amount": 300.0,
            "paidBy": "alice",
            "splitMethod": "custom",
            "customSplit": { "alice": 100.0, "bob": 200.0 },
            "date": "2025-08-31T10:00:00Z"
        });
        let expense: Expense = serde_json::from_value(json).unwrap();
        assert_eq!(expense.paid_by, "alice");
        assert_eq!(expense.split_method, SplitMethod::Custom);
        assert_eq!(expense.custom_split.unwrap()["bob"], 200.0);
    }

    #[test]
    fn equal_expense_without_custom_split_decodes() {
        let json = serde_json::json!({
            "id": "e1",
            "title": "Taxi",
            "amount": 12.5,
            "paidBy": "alice",
            "splitMethod": "equal",
            "date": "2025-08-31T10:00:00Z"
        });
        let expense: Expense = serde_json::from_value(json).unwrap();
        assert_eq!(expense.custom_split, None);
    }

    #[test]
    fn draft_defaults_payer_to_actor() {
        let expense = ExpenseDraft::equal("Lunch", 30.0).into_expense("e1".into(), &"bob".into());
        assert_eq!(expense.paid_by, "bob");
        assert_eq!(expense.split_method, SplitMethod::Equal);
    }
}
