//! Live settlement per group.
//!
//! The store pushes complete [`Snapshot`]s; one reducer task per group
//! consumes them in arrival order and publishes the latest settlement on a
//! `watch` channel. Snapshots still queued behind a newer one are skipped
//! rather than computed, so a stale result can never overwrite a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::error::SettlementError;
use crate::exchange::{settle, Settlement};
use crate::ledger::{ExpenseLedger, Snapshot};
use crate::schemas::GroupId;

#[derive(Clone, Debug, PartialEq)]
pub struct SettlementUpdate {
    /// Arrival number of the snapshot this was computed from, starting at 1.
    pub sequence: u64,
    pub outcome: Result<Settlement, SettlementError>,
}

/// One group's reducer. Dropping it cancels the task.
pub struct GroupSubscription {
    snapshots: mpsc::UnboundedSender<Snapshot>,
    updates: watch::Receiver<Option<SettlementUpdate>>,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl GroupSubscription {
    pub fn spawn(group_id: GroupId) -> Self {
        let (snapshots, receiver) = mpsc::unbounded_channel();
        let (publisher, updates) = watch::channel(None);
        let shutdown = Arc::new(Notify::new());

        let handle = tokio::spawn(reduce(group_id, receiver, publisher, shutdown.clone()));
        Self {
            snapshots,
            updates,
            shutdown,
            handle,
        }
    }

    /// Hands a snapshot to the reducer. Returns false once the reducer has
    /// stopped.
    pub fn push(&self, snapshot: Snapshot) -> bool {
        self.snapshots.send(snapshot).is_ok()
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<Snapshot> {
        self.snapshots.clone()
    }

    pub fn updates(&self) -> watch::Receiver<Option<SettlementUpdate>> {
        self.updates.clone()
    }

    pub fn latest(&self) -> Option<SettlementUpdate> {
        self.updates.borrow().clone()
    }

    pub fn cancel(&self) {
        self.shutdown.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for GroupSubscription {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

async fn reduce(
    group_id: GroupId,
    mut snapshots: mpsc::UnboundedReceiver<Snapshot>,
    publisher: watch::Sender<Option<SettlementUpdate>>,
    shutdown: Arc<Notify>,
) {
    tracing::debug!(group = %group_id, "settlement reducer started");
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::debug!(group = %group_id, "settlement reducer cancelled");
                break;
            }
            next = snapshots.recv() => {
                let Some(mut snapshot) = next else { break };
                sequence += 1;

                // Only the newest queued snapshot matters
                while let Ok(newer) = snapshots.try_recv() {
                    sequence += 1;
                    snapshot = newer;
                }

                let outcome = settle(&snapshot.group.members, &snapshot.expenses);
                if let Err(err) = &outcome {
                    tracing::warn!(group = %group_id, sequence, error = %err, "settlement failed");
                }
                publisher.send_replace(Some(SettlementUpdate { sequence, outcome }));
            }
        }
    }
    tracing::debug!(group = %group_id, "settlement reducer stopped");
}

/// Feeds a subscription from the store: one snapshot up front, then a
/// fresh one after every change notification. Stops when the change
/// stream ends, the reducer goes away, or the group disappears. A reducer
/// going away is noticed even while no changes arrive.
pub async fn feed(ledger: ExpenseLedger, group_id: GroupId, target: mpsc::UnboundedSender<Snapshot>) {
    let mut changes = match ledger.store().watch_group(&group_id).await {
        Ok(changes) => changes,
        Err(err) => {
            tracing::error!(group = %group_id, error = %err, "couldn't watch group");
            return;
        }
    };

    let mut pending = true;
    loop {
        if pending {
            match ledger.snapshot(&group_id).await {
                Ok(snapshot) => {
                    if target.send(snapshot).is_err() {
                        break;
                    }
                }
                Err(crate::error::LedgerError::GroupNotFound(_)) => {
                    tracing::info!(group = %group_id, "group gone, closing feed");
                    break;
                }
                // Store errors are passed on by skipping this round; the next
                // change notification tries again
                Err(err) => tracing::error!(group = %group_id, error = %err, "couldn't load snapshot"),
            }
        }

        let next = tokio::select! {
            _ = target.closed() => {
                tracing::debug!(group = %group_id, "reducer gone, closing feed");
                break;
            }
            next = changes.next() => next,
        };
        match next {
            Some(Ok(())) => pending = true,
            Some(Err(err)) => {
                tracing::error!(group = %group_id, error = %err, "change stream failed");
                break;
            }
            None => break,
        }
    }
}

/// At most one live subscription per group.
#[derive(Default)]
pub struct Subscriptions {
    groups: Mutex<HashMap<GroupId, Arc<GroupSubscription>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a reducer for the group, cancelling the one it replaces.
    pub fn subscribe(&self, group_id: &str) -> Arc<GroupSubscription> {
        let subscription = Arc::new(GroupSubscription::spawn(group_id.to_string()));
        let previous = match self.groups.lock() {
            Ok(mut groups) => groups.insert(group_id.to_string(), subscription.clone()),
            Err(_) => None,
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
        tracing::info!(group = group_id, "subscribed");
        subscription
    }

    /// Like [`subscribe`](Self::subscribe), with the store feeding it.
    pub fn watch(&self, ledger: &ExpenseLedger, group_id: &str) -> Arc<GroupSubscription> {
        let subscription = self.subscribe(group_id);
        tokio::spawn(feed(ledger.clone(), group_id.to_string(), subscription.sender()));
        subscription
    }

    pub fn get(&self, group_id: &str) -> Option<Arc<GroupSubscription>> {
        self.groups.lock().ok()?.get(group_id).cloned()
    }

    pub fn unsubscribe(&self, group_id: &str) {
        let removed = self.groups.lock().ok().and_then(|mut groups| groups.remove(group_id));
        if let Some(subscription) = removed {
            subscription.cancel();
            tracing::info!(group = group_id, "unsubscribed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::tests::{equal, members};
    use crate::ledger::SplitPolicy;
    use crate::schemas::{ExpenseDraft, Group};
    use crate::store::{DocumentStore, MemoryStore};
    use std::time::Duration;
    use tokio::time::timeout;

    fn snapshot(amounts: &[f64]) -> Snapshot {
        Snapshot {
            group: Group {
                id: "g".into(),
                name: "Trip".into(),
                members: members(&["a", "b"]),
            },
            expenses: amounts
                .iter()
                .enumerate()
                .map(|(i, amount)| equal(&format!("e{i}"), *amount, "a"))
                .collect(),
        }
    }

    async fn next_update(
        updates: &mut watch::Receiver<Option<SettlementUpdate>>,
    ) -> SettlementUpdate {
        timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("no update in time")
            .expect("reducer gone");
        updates.borrow_and_update().clone().expect("empty update")
    }

    #[tokio::test]
    async fn last_arrival_wins() {
        let subscription = GroupSubscription::spawn("g".into());
        let mut updates = subscription.updates();

        // All three are queued before the reducer gets to run
        assert!(subscription.push(snapshot(&[10.0])));
        assert!(subscription.push(snapshot(&[20.0])));
        assert!(subscription.push(snapshot(&[40.0])));

        let mut update = next_update(&mut updates).await;
        while update.sequence < 3 {
            update = next_update(&mut updates).await;
        }
        let settlement = update.outcome.unwrap();
        assert_eq!(settlement.balances["a"], 20.0);
        assert_eq!(subscription.latest().unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn failures_are_published_not_swallowed() {
        let subscription = GroupSubscription::spawn("g".into());
        let mut updates = subscription.updates();
        let mut empty = snapshot(&[10.0]);
        empty.group.members.clear();

        subscription.push(empty);
        let update = next_update(&mut updates).await;
        assert!(matches!(update.outcome, Err(SettlementError::Balance(_))));
    }

    #[tokio::test]
    async fn cancelled_reducer_stops() {
        let subscription = GroupSubscription::spawn("g".into());
        subscription.cancel();
        timeout(Duration::from_secs(5), async {
            while !subscription.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reducer kept running");
        assert!(!subscription.push(snapshot(&[1.0])));
    }

    #[tokio::test]
    async fn resubscribing_replaces_the_reducer() {
        let subscriptions = Subscriptions::new();
        let first = subscriptions.subscribe("g");
        let second = subscriptions.subscribe("g");
        assert!(Arc::ptr_eq(&subscriptions.get("g").unwrap(), &second));

        timeout(Duration::from_secs(5), async {
            while !first.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("old reducer kept running");

        subscriptions.unsubscribe("g");
        assert!(subscriptions.get("g").is_none());
    }

    #[tokio::test]
    async fn store_changes_flow_into_settlements() {
        let store = Arc::new(MemoryStore::new());
        let group = snapshot(&[]).group;
        store.insert_group(&group).await.unwrap();
        let ledger = ExpenseLedger::new(store.clone(), SplitPolicy::Lenient);

        let subscriptions = Subscriptions::new();
        let subscription = subscriptions.watch(&ledger, "g");
        let mut updates = subscription.updates();

        let first = next_update(&mut updates).await;
        assert!(first.outcome.unwrap().transfers.is_empty());

        ledger
            .add(&group, &"a".into(), ExpenseDraft::equal("Hotel", 100.0))
            .await
            .unwrap();

        let mut update = next_update(&mut updates).await;
        while update.outcome.as_ref().map_or(true, |s| s.transfers.is_empty()) {
            update = next_update(&mut updates).await;
        }
        let settlement = update.outcome.unwrap();
        assert_eq!(settlement.transfers.len(), 1);
        assert_eq!(settlement.transfers[0].from, "b");
        assert_eq!(settlement.transfers[0].amount, 50.0);
    }

    #[tokio::test]
    async fn feed_stops_once_the_reducer_is_gone() {
        let store = Arc::new(MemoryStore::new());
        store.insert_group(&snapshot(&[]).group).await.unwrap();
        let ledger = ExpenseLedger::new(store, SplitPolicy::Lenient);

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(feed(ledger, "g".into(), sender));
        let first = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("no snapshot in time")
            .expect("feed closed early");
        assert_eq!(first.group.id, "g");

        // No further writes: only the dropped receiver can wake the feed
        drop(receiver);
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("feed kept running")
            .unwrap();
    }

    #[tokio::test]
    async fn unsubscribing_stops_the_feed() {
        let store = Arc::new(MemoryStore::new());
        store.insert_group(&snapshot(&[]).group).await.unwrap();
        let ledger = ExpenseLedger::new(store, SplitPolicy::Lenient);

        let subscription = GroupSubscription::spawn("g".into());
        let mut updates = subscription.updates();
        let handle = tokio::spawn(feed(ledger, "g".into(), subscription.sender()));
        next_update(&mut updates).await;

        // The feed's sender keeps the channel open, so the reducer only
        // stops through cancellation; its receiver goes with it.
        subscription.cancel();
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("feed kept running")
            .unwrap();
    }
}
