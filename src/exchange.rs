use crate::balance::{compute_balances, residue, Balances, EPSILON};
use crate::error::{BalanceError, SettlementError};
use crate::schemas::{Expense, Member, MemberId, SplitMethod};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::mem::swap;

#[derive(Clone, Debug)]
pub struct PersonalBalance {
    pub id: MemberId,
    pub balance: f64,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct MemberPair {
    pub member1: MemberId,
    pub member2: MemberId,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Transfer {
    pub from: MemberId,
    pub to: MemberId,
    pub amount: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Settlement {
    pub balances: Balances,
    pub transfers: Vec<Transfer>,
}

// Larger magnitude first, then member id ascending
fn by_priority(a: &PersonalBalance, b: &PersonalBalance) -> Ordering {
    b.balance.total_cmp(&a.balance).then_with(|| a.id.cmp(&b.id))
}

/// Greedy settlement: the largest debtor pays the largest creditor until
/// everyone is within [`EPSILON`] of zero.
///
/// Needs at most `members - 1` transfers. Fails when the balances don't add
/// up to zero, which happens with custom splits that don't cover the
/// expense amount.
pub fn minimize_transfers(balances: &Balances) -> Result<Vec<Transfer>, SettlementError> {
    let leftover = residue(balances);
    if leftover.abs() > EPSILON {
        return Err(SettlementError::Unbalanced(leftover));
    }

    // Divide people into payers and receivers. Balances within EPSILON of
    // zero are left out but still count when checking what's left over.
    let mut payers = Vec::new();
    let mut receivers = Vec::new();
    let mut dust = 0.0;
    for (id, &balance) in balances {
        let person = PersonalBalance {
            id: id.clone(),
            balance: balance.abs(),
        };
        if balance < -EPSILON {
            payers.push(person);
        } else if balance > EPSILON {
            receivers.push(person);
        } else {
            dust += balance;
        }
    }

    let mut transfers = Vec::new();
    while !payers.is_empty() && !receivers.is_empty() {
        payers.sort_by(by_priority);
        receivers.sort_by(by_priority);
        let payer = &mut payers[0];
        let receiver = &mut receivers[0];

        let amount = payer.balance.min(receiver.balance);
        transfers.push(Transfer {
            from: payer.id.clone(),
            to: receiver.id.clone(),
            amount,
        });
        payer.balance -= amount;
        receiver.balance -= amount;

        if payers[0].balance <= EPSILON {
            dust -= payers.remove(0).balance;
        }
        if receivers[0].balance <= EPSILON {
            dust += receivers.remove(0).balance;
        }
    }

    // Whatever one side has left must be made up by dust on the other
    let stranded: f64 = receivers.iter().map(|r| r.balance).sum::<f64>()
        - payers.iter().map(|p| p.balance).sum::<f64>();
    if (stranded + dust).abs() > EPSILON {
        return Err(SettlementError::Unbalanced(stranded + dust));
    }

    Ok(transfers)
}

/// The transfers that would be made if no simplification happens: every
/// participant of an expense pays its payer back directly, netted per pair.
pub fn direct_transfers(
    members: &[Member],
    expenses: &[Expense],
) -> Result<Vec<Transfer>, BalanceError> {
    if members.is_empty() && !expenses.is_empty() {
        return Err(BalanceError::EmptyGroup(expenses.len()));
    }
    let member_ids: HashSet<&str> = members.iter().map(|m| m.id.as_str()).collect();
    let mut balances_between_people: BTreeMap<MemberPair, f64> = BTreeMap::new();

    for expense in expenses {
        let shares: Vec<(MemberId, f64)> = match expense.split_method {
            SplitMethod::Equal => {
                let share = expense.amount / member_ids.len() as f64;
                member_ids.iter().map(|id| (id.to_string(), share)).collect()
            }
            SplitMethod::Custom => {
                let split = match &expense.custom_split {
                    Some(split) if !split.is_empty() => split,
                    _ => return Err(BalanceError::MissingCustomSplit(expense.id.clone())),
                };
                if let Some(member) = split.keys().find(|m| !member_ids.contains(m.as_str())) {
                    return Err(BalanceError::UnknownSplitMember {
                        expense: expense.id.clone(),
                        member: member.clone(),
                    });
                }
                split.iter().map(|(m, s)| (m.clone(), *s)).collect()
            }
        };

        for (participant, share) in shares {
            if participant == expense.paid_by {
                continue;
            }
            let mut pair = MemberPair {
                member1: expense.paid_by.clone(),
                member2: participant.clone(),
            };
            let mut amount = share;

            // Alphabetical order keeps every debt between the same two
            // members stored in the same direction
            if pair.member1 > pair.member2 {
                pair.member1 = participant;
                pair.member2 = expense.paid_by.clone();
                amount = -amount;
            }

            balances_between_people
                .entry(pair)
                .and_modify(|balance| *balance += amount)
                .or_insert(amount);
        }
    }

    // member1 is owed a positive balance by member2
    let mut transfers = Vec::new();
    for (pair, balance) in balances_between_people {
        if balance.abs() <= EPSILON {
            continue;
        }
        let mut from = pair.member2;
        let mut to = pair.member1;
        if balance < 0.0 {
            swap(&mut from, &mut to);
        }
        transfers.push(Transfer {
            from,
            to,
            amount: balance.abs(),
        });
    }

    Ok(transfers)
}

/// Balances plus the shorter of the greedy and the direct transfer lists.
pub fn settle(members: &[Member], expenses: &[Expense]) -> Result<Settlement, SettlementError> {
    let balances = compute_balances(members, expenses)?;
    let simplified = minimize_transfers(&balances)?;
    let direct = direct_transfers(members, expenses)?;

    // Make sure the simplification didn't end up more complicated than
    // paying everyone back directly
    let transfers = if direct.len() < simplified.len() {
        direct
    } else {
        simplified
    };
    Ok(Settlement {
        balances,
        transfers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::tests::{custom, equal, members};
    use proptest::prelude::*;

    fn balances(entries: &[(&str, f64)]) -> Balances {
        entries.iter().map(|(id, b)| (id.to_string(), *b)).collect()
    }

    fn apply(balances: &Balances, transfers: &[Transfer]) -> Balances {
        let mut after = balances.clone();
        for t in transfers {
            *after.get_mut(&t.from).unwrap() += t.amount;
            *after.get_mut(&t.to).unwrap() -= t.amount;
        }
        after
    }

    fn transfer(from: &str, to: &str, amount: f64) -> Transfer {
        Transfer {
            from: from.into(),
            to: to.into(),
            amount,
        }
    }

    #[test]
    fn single_creditor_collects_from_each_debtor() {
        let input = balances(&[("a", 200.0), ("b", -100.0), ("c", -100.0)]);
        let transfers = minimize_transfers(&input).unwrap();
        assert_eq!(
            transfers,
            vec![transfer("b", "a", 100.0), transfer("c", "a", 100.0)]
        );
        assert!(apply(&input, &transfers).values().all(|b| b.abs() < EPSILON));
    }

    #[test]
    fn largest_debtor_pays_largest_creditor_first() {
        let input = balances(&[("a", 30.0), ("b", 70.0), ("c", -80.0), ("d", -20.0)]);
        let transfers = minimize_transfers(&input).unwrap();
        assert_eq!(transfers[0], transfer("c", "b", 70.0));
        assert_eq!(transfers.len(), 3);
        assert!(apply(&input, &transfers).values().all(|b| b.abs() < EPSILON));
    }

    #[test]
    fn ties_go_to_the_lowest_member_id() {
        let input = balances(&[("x", 50.0), ("a", 50.0), ("m", -50.0), ("b", -50.0)]);
        let transfers = minimize_transfers(&input).unwrap();
        assert_eq!(
            transfers,
            vec![transfer("b", "a", 50.0), transfer("m", "x", 50.0)]
        );
    }

    #[test]
    fn settled_or_empty_balances_need_no_transfers() {
        assert!(minimize_transfers(&Balances::new()).unwrap().is_empty());
        assert!(minimize_transfers(&balances(&[("a", 0.0), ("b", 1e-9)]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn debt_spread_over_dust_creditors_is_settled() {
        let mut entries: Vec<(String, f64)> =
            (0..10).map(|i| (format!("c{i}"), 0.9e-6)).collect();
        entries.push(("d".into(), -9e-6));
        let input: Balances = entries.into_iter().collect();
        assert!(residue(&input).abs() < EPSILON);
        assert_eq!(minimize_transfers(&input), Ok(vec![]));
    }

    #[test]
    fn unbalanced_input_is_reported() {
        let input = balances(&[("a", 80.0), ("b", -60.0)]);
        assert_eq!(
            minimize_transfers(&input),
            Err(SettlementError::Unbalanced(20.0))
        );
    }

    #[test]
    fn direct_transfers_net_opposite_debts() {
        let group = members(&["a", "b"]);
        let expenses = [equal("e1", 100.0, "a"), equal("e2", 40.0, "b")];
        assert_eq!(
            direct_transfers(&group, &expenses).unwrap(),
            vec![transfer("b", "a", 30.0)]
        );
    }

    #[test]
    fn direct_transfers_count_repeated_members_once() {
        let group = members(&["a", "a", "b"]);
        assert_eq!(
            direct_transfers(&group, &[equal("e1", 100.0, "a")]).unwrap(),
            vec![transfer("b", "a", 50.0)]
        );
    }

    #[test]
    fn direct_transfers_follow_custom_shares() {
        let group = members(&["a", "b", "c"]);
        let expenses = [custom("e1", 100.0, "c", &[("a", 70.0), ("c", 30.0)])];
        assert_eq!(
            direct_transfers(&group, &expenses).unwrap(),
            vec![transfer("a", "c", 70.0)]
        );
    }

    #[test]
    fn settle_prefers_greedy_on_cycles() {
        // a pays for b, b pays for c, c pays for a: everyone ends at zero
        let group = members(&["a", "b", "c"]);
        let expenses = [
            custom("e1", 10.0, "a", &[("b", 10.0)]),
            custom("e2", 10.0, "b", &[("c", 10.0)]),
            custom("e3", 10.0, "c", &[("a", 10.0)]),
        ];
        let settlement = settle(&group, &expenses).unwrap();
        assert!(settlement.transfers.is_empty());
        assert_eq!(direct_transfers(&group, &expenses).unwrap().len(), 3);
    }

    #[test]
    fn settle_surfaces_balance_errors() {
        let result = settle(&[], &[equal("e1", 10.0, "a")]);
        assert_eq!(
            result,
            Err(SettlementError::Balance(BalanceError::EmptyGroup(1)))
        );
    }

    #[test]
    fn settle_rejects_uncovered_custom_split() {
        let group = members(&["a", "b"]);
        let result = settle(&group, &[custom("e1", 100.0, "a", &[("b", 60.0)])]);
        assert!(matches!(result, Err(SettlementError::Unbalanced(r)) if (r - 40.0).abs() < EPSILON));
    }

    proptest! {
        #[test]
        fn transfers_zero_every_balance(
            cents in prop::collection::vec(-100_000i64..100_000, 1..12)
        ) {
            // Last member absorbs the remainder so the input is balanced
            let mut input = Balances::new();
            let mut total = 0i64;
            for (i, c) in cents.iter().enumerate() {
                input.insert(format!("m{i:02}"), *c as f64 / 100.0);
                total += c;
            }
            input.insert("zz".into(), -(total as f64) / 100.0);

            let transfers = minimize_transfers(&input).unwrap();
            prop_assert!(transfers.len() < input.len().max(1));
            prop_assert!(transfers.iter().all(|t| t.amount > 0.0));
            for value in apply(&input, &transfers).values() {
                prop_assert!(value.abs() < 1e-4);
            }
        }
    }
}
