use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::error::BalanceError;
use crate::schemas::{Expense, ExpenseId, Group, Member, MemberId, SplitMethod};

/// Net position per member: positive means the group owes them.
pub type Balances = BTreeMap<MemberId, f64>;

/// Tolerance used when comparing derived amounts.
pub const EPSILON: f64 = 1e-6;

/// Reduces a ledger to net balances over the current membership.
///
/// Every current member gets an entry, zero if untouched. A member listed
/// twice is still one participant in equal splits. A payer who has
/// since left the group still gets credited. The result doesn't depend on
/// the order of `expenses`.
pub fn compute_balances(members: &[Member], expenses: &[Expense]) -> Result<Balances, BalanceError> {
    if members.is_empty() {
        return if expenses.is_empty() {
            Ok(Balances::new())
        } else {
            Err(BalanceError::EmptyGroup(expenses.len()))
        };
    }

    let member_ids: HashSet<&str> = members.iter().map(|m| m.id.as_str()).collect();
    let mut balance: Balances = members.iter().map(|m| (m.id.clone(), 0.0)).collect();

    for expense in expenses {
        let amount = expense.amount;
        balance
            .entry(expense.paid_by.clone())
            .and_modify(|v| *v += amount)
            .or_insert(amount);

        match expense.split_method {
            SplitMethod::Equal => {
                let amount_per_member = amount / member_ids.len() as f64;
                for member in &member_ids {
                    balance
                        .entry(member.to_string())
                        .and_modify(|v| *v -= amount_per_member)
                        .or_insert(-amount_per_member);
                }
            }
            SplitMethod::Custom => {
                let split = match &expense.custom_split {
                    Some(split) if !split.is_empty() => split,
                    _ => return Err(BalanceError::MissingCustomSplit(expense.id.clone())),
                };
                for (member, share) in split {
                    if !member_ids.contains(member.as_str()) {
                        return Err(BalanceError::UnknownSplitMember {
                            expense: expense.id.clone(),
                            member: member.clone(),
                        });
                    }
                    balance
                        .entry(member.clone())
                        .and_modify(|v| *v -= share)
                        .or_insert(-share);
                }
            }
        }
    }

    for (expense, difference) in split_total_mismatches(expenses) {
        tracing::warn!(%expense, difference, "custom split doesn't add up to the expense amount");
    }

    Ok(balance)
}

/// Sum of all balances. Zero (within [`EPSILON`]) for a consistent ledger.
pub fn residue(balances: &Balances) -> f64 {
    balances.values().sum()
}

/// Custom-split expenses whose shares don't add up to the amount, with the
/// signed difference `shares - amount`.
pub fn split_total_mismatches(expenses: &[Expense]) -> Vec<(ExpenseId, f64)> {
    expenses
        .iter()
        .filter(|e| e.split_method == SplitMethod::Custom)
        .filter_map(|e| {
            let total: f64 = e.custom_split.as_ref()?.values().sum();
            let difference = total - e.amount;
            (difference.abs() > EPSILON).then(|| (e.id.clone(), difference))
        })
        .collect()
}

pub fn round_to_cents(n: f64) -> f64 {
    let rounded = (n * 100.0).round() / 100.0;
    // Avoid printing "-0"
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Owed,
    Owes,
    Settled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MemberBalance {
    pub id: MemberId,
    pub name: String,
    pub balance: f64,
    pub direction: Direction,
}

/// Display lines for a group, current members first in group order, then
/// anyone who only appears in the balances (former members).
pub fn summarize(group: &Group, balances: &Balances) -> Vec<MemberBalance> {
    let former = balances
        .keys()
        .filter(|id| !group.is_member(id))
        .map(|id| (id.clone(), "Unknown".to_string()));

    group
        .members
        .iter()
        .map(|m| (m.id.clone(), m.name.clone()))
        .chain(former)
        .map(|(id, name)| {
            let balance = round_to_cents(balances.get(&id).copied().unwrap_or(0.0));
            let direction = if balance > 0.0 {
                Direction::Owed
            } else if balance < 0.0 {
                Direction::Owes
            } else {
                Direction::Settled
            };
            MemberBalance {
                id,
                name,
                balance,
                direction,
            }
        })
        .collect()
}
