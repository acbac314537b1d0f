//! Errors raised by the settlement engine and its storage boundary.
//!
//! - [`ValidationError`]: an expense or group change was rejected before it
//!   reached the store.
//! - [`BalanceError`] and [`SettlementError`]: a ledger could not be reduced.
//! - [`StoreError`]: the document store failed; passed through untouched.
//! - [`LedgerError`]: what ledger and directory operations return.
use crate::schemas::{ExpenseId, GroupId, MemberId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Expense title can't be empty")]
    EmptyTitle,
    #[error("Amount must be greater than zero, got {0}")]
    NonPositiveAmount(f64),
    #[error("Payer `{0}` is not a member of the group")]
    PayerNotMember(MemberId),
    #[error("`{0}` is not a member of the group")]
    NotAMember(MemberId),
    #[error("Custom split can't be empty")]
    MissingCustomSplit,
    #[error("Equal split expenses can't carry a custom split")]
    UnexpectedCustomSplit,
    #[error("Custom split names `{0}`, who is not a member of the group")]
    UnknownSplitMember(MemberId),
    #[error("Share {share} for `{member}` is not a valid amount")]
    InvalidShare { member: MemberId, share: f64 },
    #[error("Custom split adds up to {actual} but the expense is {expected}")]
    SplitTotalMismatch { expected: f64, actual: f64 },
    #[error("Group name can't be empty")]
    EmptyGroupName,
    #[error("`{0}` is already a member of the group")]
    AlreadyMember(MemberId),
    #[error("Group `{0}` already exists")]
    GroupExists(GroupId),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BalanceError {
    #[error("Group has no members, can't split {0} expense(s)")]
    EmptyGroup(usize),
    #[error("Expense `{0}` uses a custom split but has no shares")]
    MissingCustomSplit(ExpenseId),
    #[error("Expense `{expense}` assigns a share to `{member}`, who is not a member")]
    UnknownSplitMember { expense: ExpenseId, member: MemberId },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Balances don't add up to zero (residue {0})")]
    Unbalanced(f64),
    #[error(transparent)]
    Balance(#[from] BalanceError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error("Couldn't encode document: {0}")]
    Encode(#[from] bson::ser::Error),
    #[error("Couldn't decode document: {0}")]
    Decode(#[from] bson::de::Error),
    #[error("Store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Couldn't find group `{0}`")]
    GroupNotFound(GroupId),
    #[error("Couldn't find expense `{0}`")]
    ExpenseNotFound(ExpenseId),
}

impl From<BalanceError> for LedgerError {
    fn from(err: BalanceError) -> Self {
        LedgerError::Settlement(err.into())
    }
}
