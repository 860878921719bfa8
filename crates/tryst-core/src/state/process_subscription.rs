use std::cell::RefCell;
use std::ops::ControlFlow;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::{SubscriptionId, TransientSubscriptionEntry, TransientSubscriptionIndex};
use crate::error::StorageResult;
use crate::storage::{keys, ColumnFamily, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessSubscriptionState {
    Opening,
    Opened,
    Closing,
}

/// The process-instance side of a message subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessMessageSubscription {
    pub process_instance_key: u64,
    pub element_instance_key: u64,
    pub bpmn_process_id: String,
    pub element_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub interrupting: bool,
    /// Partition that owns the message side of the subscription.
    pub subscription_partition_id: u32,
    pub command_sent_time: i64,
    pub state: ProcessSubscriptionState,
}

impl ProcessMessageSubscription {
    pub fn id(&self) -> SubscriptionId {
        SubscriptionId::new(self.element_instance_key, self.message_name.clone())
    }

    pub fn is_opening(&self) -> bool {
        self.state == ProcessSubscriptionState::Opening
    }

    pub fn is_opened(&self) -> bool {
        self.state == ProcessSubscriptionState::Opened
    }

    pub fn is_closing(&self) -> bool {
        self.state == ProcessSubscriptionState::Closing
    }
}

/// Persistent process message subscriptions plus the in-memory retry
/// schedule for the ones still waiting on an OPEN or CLOSE acknowledgment.
///
/// The schedule is never written to storage. Changes to it are deferred to
/// commit hooks, so a rolled back command leaves it untouched, and
/// [`recover`](Self::recover) rebuilds it from the persistent table.
#[derive(Debug, Default)]
pub struct ProcessSubscriptionCoordinator {
    transient: Rc<RefCell<TransientSubscriptionIndex>>,
}

impl ProcessSubscriptionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the subscription as OPENING and schedule it at `sent_time`.
    pub fn put(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &ProcessMessageSubscription,
        sent_time: i64,
    ) -> StorageResult<()> {
        let mut stored = subscription.clone();
        stored.state = ProcessSubscriptionState::Opening;
        stored.command_sent_time = sent_time;
        self.write(txn, &stored)?;
        self.schedule(txn, &stored);
        Ok(())
    }

    pub fn get(
        &self,
        txn: &Transaction<'_>,
        element_instance_key: u64,
        message_name: &str,
    ) -> StorageResult<Option<ProcessMessageSubscription>> {
        txn.get_value(
            ColumnFamily::ProcessSubscriptions,
            &keys::subscription_key(element_instance_key, message_name),
        )
    }

    pub fn exist(
        &self,
        txn: &Transaction<'_>,
        element_instance_key: u64,
        message_name: &str,
    ) -> StorageResult<bool> {
        txn.exists(
            ColumnFamily::ProcessSubscriptions,
            &keys::subscription_key(element_instance_key, message_name),
        )
    }

    /// Visit scheduled subscriptions with a sent time strictly before
    /// `deadline`, earliest first.
    pub fn visit_subscription_before(
        &self,
        txn: &Transaction<'_>,
        deadline: i64,
        mut visitor: impl FnMut(&ProcessMessageSubscription) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        let mut failure = None;
        self.transient.borrow().visit_before(deadline, |entry| {
            match self.get(txn, entry.element_instance_key, &entry.message_name) {
                Ok(Some(subscription)) => visitor(&subscription),
                Ok(None) => ControlFlow::Continue(()),
                Err(e) => {
                    failure = Some(e);
                    ControlFlow::Break(())
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Move the retry slot of a scheduled subscription. Unscheduled
    /// subscriptions are left alone; nothing is persisted.
    pub fn update_sent_time_in_transaction(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &ProcessMessageSubscription,
        sent_time: i64,
    ) {
        let entry = TransientSubscriptionEntry::new(
            subscription.element_instance_key,
            subscription.message_name.clone(),
            sent_time,
        );
        let transient = Rc::clone(&self.transient);
        txn.on_commit(move || {
            transient.borrow_mut().update(&entry);
        });
    }

    /// OPENING → OPENED: record the message partition and stop retrying.
    pub fn update_to_opened_state(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &ProcessMessageSubscription,
        subscription_partition_id: u32,
    ) -> StorageResult<()> {
        let Some(mut stored) =
            self.get(txn, subscription.element_instance_key, &subscription.message_name)?
        else {
            return Ok(());
        };
        stored.state = ProcessSubscriptionState::Opened;
        stored.subscription_partition_id = subscription_partition_id;
        self.write(txn, &stored)?;
        self.unschedule(txn, stored.id());
        Ok(())
    }

    /// Enter CLOSING and schedule the close command for retry.
    pub fn update_to_closing_state(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &ProcessMessageSubscription,
        sent_time: i64,
    ) -> StorageResult<()> {
        let Some(mut stored) =
            self.get(txn, subscription.element_instance_key, &subscription.message_name)?
        else {
            return Ok(());
        };
        stored.state = ProcessSubscriptionState::Closing;
        stored.command_sent_time = sent_time;
        self.write(txn, &stored)?;
        self.schedule(txn, &stored);
        Ok(())
    }

    pub fn remove(&self, txn: &mut Transaction<'_>, element_instance_key: u64, message_name: &str) {
        txn.delete(
            ColumnFamily::ProcessSubscriptions,
            keys::subscription_key(element_instance_key, message_name),
        );
        self.unschedule(txn, SubscriptionId::new(element_instance_key, message_name));
    }

    pub fn visit_element_subscriptions(
        &self,
        txn: &Transaction<'_>,
        element_instance_key: u64,
        mut visitor: impl FnMut(&ProcessMessageSubscription) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        let prefix = keys::subscription_prefix(element_instance_key);
        txn.scan_prefix(ColumnFamily::ProcessSubscriptions, &prefix, |_, value| {
            let subscription: ProcessMessageSubscription = serde_json::from_slice(value)?;
            Ok(visitor(&subscription))
        })
    }

    /// Rebuild the retry schedule from the persistent table. Every OPENING
    /// or CLOSING subscription is scheduled at its stored sent time.
    /// Returns the number of scheduled subscriptions.
    pub fn recover(&self, txn: &Transaction<'_>) -> StorageResult<usize> {
        let mut rebuilt = TransientSubscriptionIndex::new();
        txn.scan_from(ColumnFamily::ProcessSubscriptions, &[], |_, value| {
            let subscription: ProcessMessageSubscription = serde_json::from_slice(value)?;
            if !subscription.is_opened() {
                rebuilt.add(&TransientSubscriptionEntry::new(
                    subscription.element_instance_key,
                    subscription.message_name,
                    subscription.command_sent_time,
                ));
            }
            Ok(ControlFlow::Continue(()))
        })?;
        let count = rebuilt.len();
        *self.transient.borrow_mut() = rebuilt;
        Ok(count)
    }

    /// Number of subscriptions awaiting an acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.transient.borrow().len()
    }

    fn write(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &ProcessMessageSubscription,
    ) -> StorageResult<()> {
        txn.put_value(
            ColumnFamily::ProcessSubscriptions,
            keys::subscription_key(subscription.element_instance_key, &subscription.message_name),
            subscription,
        )
    }

    fn schedule(&self, txn: &mut Transaction<'_>, subscription: &ProcessMessageSubscription) {
        let entry = TransientSubscriptionEntry::new(
            subscription.element_instance_key,
            subscription.message_name.clone(),
            subscription.command_sent_time,
        );
        let transient = Rc::clone(&self.transient);
        txn.on_commit(move || transient.borrow_mut().add(&entry));
    }

    fn unschedule(&self, txn: &mut Transaction<'_>, id: SubscriptionId) {
        let transient = Rc::clone(&self.transient);
        txn.on_commit(move || {
            transient.borrow_mut().remove(&id);
        });
    }
}
