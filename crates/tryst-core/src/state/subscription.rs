use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::storage::{keys, ColumnFamily, Transaction};

/// A process instance element waiting for a message, as tracked on the
/// message partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSubscription {
    pub process_instance_key: u64,
    pub element_instance_key: u64,
    pub message_name: String,
    pub correlation_key: String,
    pub message_variables: Vec<u8>,
    /// Key of the message currently being delivered.
    pub message_key: Option<u64>,
    /// When the last correlate command was sent; `None` if never.
    pub command_sent_time: Option<i64>,
    pub interrupting: bool,
    pub correlating: bool,
}

impl MessageSubscription {
    pub fn new(
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: impl Into<String>,
        correlation_key: impl Into<String>,
        interrupting: bool,
    ) -> Self {
        Self {
            process_instance_key,
            element_instance_key,
            message_name: message_name.into(),
            correlation_key: correlation_key.into(),
            message_variables: Vec::new(),
            message_key: None,
            command_sent_time: None,
            interrupting,
            correlating: false,
        }
    }
}

/// Subscriptions of waiting elements, indexed by identity
/// `(element_instance_key, message_name)`, by `(message_name,
/// correlation_key)` for correlation and by sent time for retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageSubscriptionRegistry;

impl MessageSubscriptionRegistry {
    /// Insert or replace the subscription under its identity.
    pub fn put(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &MessageSubscription,
    ) -> StorageResult<()> {
        let previous = self.get(
            txn,
            subscription.element_instance_key,
            &subscription.message_name,
        )?;
        self.write(txn, previous.as_ref(), subscription)
    }

    pub fn get(
        &self,
        txn: &Transaction<'_>,
        element_instance_key: u64,
        message_name: &str,
    ) -> StorageResult<Option<MessageSubscription>> {
        txn.get_value(
            ColumnFamily::MessageSubscriptions,
            &keys::subscription_key(element_instance_key, message_name),
        )
    }

    pub fn exist_subscription_for_element_instance(
        &self,
        txn: &Transaction<'_>,
        element_instance_key: u64,
        message_name: &str,
    ) -> StorageResult<bool> {
        txn.exists(
            ColumnFamily::MessageSubscriptions,
            &keys::subscription_key(element_instance_key, message_name),
        )
    }

    /// Visit subscriptions with exactly this message name and correlation
    /// key, in ascending element instance key order.
    pub fn visit_subscriptions(
        &self,
        txn: &Transaction<'_>,
        message_name: &str,
        correlation_key: &str,
        mut visitor: impl FnMut(&MessageSubscription) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        let prefix = keys::subscription_name_prefix(message_name, correlation_key);
        txn.scan_prefix(ColumnFamily::SubscriptionNameIndex, &prefix, |key, _| {
            let element_instance_key = keys::parse_trailing_u64(key)
                .ok_or_else(|| super::corrupt_key(ColumnFamily::SubscriptionNameIndex))?;
            match self.get(txn, element_instance_key, message_name)? {
                Some(subscription) => Ok(visitor(&subscription)),
                None => Ok(ControlFlow::Continue(())),
            }
        })
    }

    /// Reschedule the subscription in the retry index.
    pub fn update_sent_time(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &MessageSubscription,
        sent_time: i64,
    ) -> StorageResult<()> {
        self.update(txn, subscription, |stored| {
            stored.command_sent_time = Some(sent_time);
        })
    }

    /// Visit subscriptions whose sent time is set and strictly before
    /// `deadline`, earliest first.
    pub fn visit_subscription_before(
        &self,
        txn: &Transaction<'_>,
        deadline: i64,
        mut visitor: impl FnMut(&MessageSubscription) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        txn.scan_from(ColumnFamily::SubscriptionSentTimes, &[], |key, _| {
            let (sent_time, element_instance_key, message_name) =
                keys::parse_subscription_sent_time_key(key)
                    .ok_or_else(|| super::corrupt_key(ColumnFamily::SubscriptionSentTimes))?;
            if sent_time >= deadline {
                return Ok(ControlFlow::Break(()));
            }
            match self.get(txn, element_instance_key, &message_name)? {
                Some(subscription) => Ok(visitor(&subscription)),
                None => Ok(ControlFlow::Continue(())),
            }
        })
    }

    /// Attach the matched message and mark the subscription as correlating.
    /// The sent time schedules a resend if the correlation is never
    /// acknowledged. Repeating the call only moves the retry slot.
    pub fn update_to_correlating_state(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &MessageSubscription,
        message_variables: &[u8],
        sent_time: i64,
        message_key: u64,
    ) -> StorageResult<()> {
        self.update(txn, subscription, |stored| {
            stored.correlating = true;
            stored.message_variables = message_variables.to_vec();
            stored.message_key = Some(message_key);
            stored.command_sent_time = Some(sent_time);
        })
    }

    /// Return an acknowledged (non-interrupting) subscription to waiting:
    /// not correlating, no pending message, out of the retry index.
    pub fn update_to_correlated_state(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &MessageSubscription,
    ) -> StorageResult<()> {
        self.update(txn, subscription, |stored| {
            stored.correlating = false;
            stored.message_variables.clear();
            stored.message_key = None;
            stored.command_sent_time = None;
        })
    }

    /// Remove the subscription and its index entries. Unknown identities
    /// are ignored.
    pub fn remove(
        &self,
        txn: &mut Transaction<'_>,
        element_instance_key: u64,
        message_name: &str,
    ) -> StorageResult<()> {
        if let Some(subscription) = self.get(txn, element_instance_key, message_name)? {
            self.delete_indices(txn, &subscription);
            txn.delete(
                ColumnFamily::MessageSubscriptions,
                keys::subscription_key(element_instance_key, message_name),
            );
        }
        Ok(())
    }

    /// Visit every subscription owned by one element instance.
    pub fn visit_element_subscriptions(
        &self,
        txn: &Transaction<'_>,
        element_instance_key: u64,
        mut visitor: impl FnMut(&MessageSubscription) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        let prefix = keys::subscription_prefix(element_instance_key);
        txn.scan_prefix(ColumnFamily::MessageSubscriptions, &prefix, |_, value| {
            let subscription: MessageSubscription = serde_json::from_slice(value)?;
            Ok(visitor(&subscription))
        })
    }

    fn update(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &MessageSubscription,
        change: impl FnOnce(&mut MessageSubscription),
    ) -> StorageResult<()> {
        let Some(previous) = self.get(
            txn,
            subscription.element_instance_key,
            &subscription.message_name,
        )?
        else {
            return Ok(());
        };
        let mut next = previous.clone();
        change(&mut next);
        self.write(txn, Some(&previous), &next)
    }

    fn write(
        &self,
        txn: &mut Transaction<'_>,
        previous: Option<&MessageSubscription>,
        next: &MessageSubscription,
    ) -> StorageResult<()> {
        if let Some(previous) = previous {
            self.delete_indices(txn, previous);
        }
        txn.put_value(
            ColumnFamily::MessageSubscriptions,
            keys::subscription_key(next.element_instance_key, &next.message_name),
            next,
        )?;
        txn.put(
            ColumnFamily::SubscriptionNameIndex,
            keys::subscription_name_key(
                &next.message_name,
                &next.correlation_key,
                next.element_instance_key,
            ),
            Vec::new(),
        );
        if let Some(sent_time) = next.command_sent_time {
            txn.put(
                ColumnFamily::SubscriptionSentTimes,
                keys::subscription_sent_time_key(
                    sent_time,
                    next.element_instance_key,
                    &next.message_name,
                ),
                Vec::new(),
            );
        }
        Ok(())
    }

    fn delete_indices(&self, txn: &mut Transaction<'_>, subscription: &MessageSubscription) {
        txn.delete(
            ColumnFamily::SubscriptionNameIndex,
            keys::subscription_name_key(
                &subscription.message_name,
                &subscription.correlation_key,
                subscription.element_instance_key,
            ),
        );
        if let Some(sent_time) = subscription.command_sent_time {
            txn.delete(
                ColumnFamily::SubscriptionSentTimes,
                keys::subscription_sent_time_key(
                    sent_time,
                    subscription.element_instance_key,
                    &subscription.message_name,
                ),
            );
        }
    }
}
