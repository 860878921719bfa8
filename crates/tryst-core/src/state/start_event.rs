use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::storage::{keys, ColumnFamily, Transaction};

/// A deployed message start event: publishing `message_name` may start a
/// new instance of the process definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageStartEventSubscription {
    pub process_definition_key: u64,
    pub bpmn_process_id: String,
    pub start_event_id: String,
    pub message_name: String,
    /// Variables of the message that started an instance; empty on a
    /// deployed subscription.
    #[serde(default)]
    pub variables: Vec<u8>,
}

impl MessageStartEventSubscription {
    /// This start event correlated with a message carrying `variables`.
    pub fn correlated(&self, variables: &[u8]) -> Self {
        Self {
            variables: variables.to_vec(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MessageStartEventRegistry;

impl MessageStartEventRegistry {
    pub fn put(
        &self,
        txn: &mut Transaction<'_>,
        subscription: &MessageStartEventSubscription,
    ) -> StorageResult<()> {
        let key = keys::start_event_key(
            subscription.process_definition_key,
            &subscription.start_event_id,
        );
        if let Some(previous) =
            txn.get_value::<MessageStartEventSubscription>(ColumnFamily::StartEventSubscriptions, &key)?
        {
            txn.delete(ColumnFamily::StartEventNameIndex, name_index_key(&previous));
            txn.delete(ColumnFamily::StartEventProcessIndex, process_index_key(&previous));
        }
        txn.put_value(ColumnFamily::StartEventSubscriptions, key, subscription)?;
        txn.put(
            ColumnFamily::StartEventNameIndex,
            name_index_key(subscription),
            Vec::new(),
        );
        txn.put(
            ColumnFamily::StartEventProcessIndex,
            process_index_key(subscription),
            Vec::new(),
        );
        Ok(())
    }

    /// Whether exactly this subscription is stored.
    pub fn exists(
        &self,
        txn: &Transaction<'_>,
        subscription: &MessageStartEventSubscription,
    ) -> StorageResult<bool> {
        let stored: Option<MessageStartEventSubscription> = txn.get_value(
            ColumnFamily::StartEventSubscriptions,
            &keys::start_event_key(
                subscription.process_definition_key,
                &subscription.start_event_id,
            ),
        )?;
        Ok(stored.as_ref() == Some(subscription))
    }

    /// Visit start events of every process definition listening for
    /// `message_name`, ordered by process definition key.
    pub fn visit_subscriptions_by_message_name(
        &self,
        txn: &Transaction<'_>,
        message_name: &str,
        mut visitor: impl FnMut(&MessageStartEventSubscription) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        let prefix = keys::start_event_name_prefix(message_name);
        visit_index(txn, ColumnFamily::StartEventNameIndex, &prefix, &mut visitor)
    }

    /// Visit start events of every deployed version of `bpmn_process_id`,
    /// ordered by process definition key.
    pub fn visit_subscriptions_of_process(
        &self,
        txn: &Transaction<'_>,
        bpmn_process_id: &str,
        mut visitor: impl FnMut(&MessageStartEventSubscription) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        let prefix = keys::start_event_process_prefix(bpmn_process_id);
        visit_index(txn, ColumnFamily::StartEventProcessIndex, &prefix, &mut visitor)
    }

    pub fn visit_subscriptions_of_process_definition(
        &self,
        txn: &Transaction<'_>,
        process_definition_key: u64,
        mut visitor: impl FnMut(&MessageStartEventSubscription) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        let prefix = keys::start_event_prefix(process_definition_key);
        txn.scan_prefix(ColumnFamily::StartEventSubscriptions, &prefix, |_, value| {
            let subscription: MessageStartEventSubscription = serde_json::from_slice(value)?;
            Ok(visitor(&subscription))
        })
    }

    /// Remove every start event of one process definition.
    pub fn remove_subscriptions_of_workflow(
        &self,
        txn: &mut Transaction<'_>,
        process_definition_key: u64,
    ) -> StorageResult<()> {
        let mut removed = Vec::new();
        self.visit_subscriptions_of_process_definition(txn, process_definition_key, |s| {
            removed.push(s.clone());
            ControlFlow::Continue(())
        })?;
        for subscription in removed {
            txn.delete(ColumnFamily::StartEventNameIndex, name_index_key(&subscription));
            txn.delete(ColumnFamily::StartEventProcessIndex, process_index_key(&subscription));
            txn.delete(
                ColumnFamily::StartEventSubscriptions,
                keys::start_event_key(process_definition_key, &subscription.start_event_id),
            );
        }
        Ok(())
    }
}

fn visit_index(
    txn: &Transaction<'_>,
    cf: ColumnFamily,
    prefix: &[u8],
    visitor: &mut impl FnMut(&MessageStartEventSubscription) -> ControlFlow<()>,
) -> StorageResult<()> {
    txn.scan_prefix(cf, prefix, |key, _| {
        let (_, process_definition_key, start_event_id) =
            keys::parse_start_event_index_key(key).ok_or_else(|| super::corrupt_key(cf))?;
        let stored: Option<MessageStartEventSubscription> = txn.get_value(
            ColumnFamily::StartEventSubscriptions,
            &keys::start_event_key(process_definition_key, &start_event_id),
        )?;
        match stored {
            Some(subscription) => Ok(visitor(&subscription)),
            None => Ok(ControlFlow::Continue(())),
        }
    })
}

fn name_index_key(subscription: &MessageStartEventSubscription) -> Vec<u8> {
    keys::start_event_name_key(
        &subscription.message_name,
        subscription.process_definition_key,
        &subscription.start_event_id,
    )
}

fn process_index_key(subscription: &MessageStartEventSubscription) -> Vec<u8> {
    keys::start_event_process_key(
        &subscription.bpmn_process_id,
        subscription.process_definition_key,
        &subscription.start_event_id,
    )
}
