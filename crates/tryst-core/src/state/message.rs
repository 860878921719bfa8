use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::state::correlation::MessageCorrelationTracker;
use crate::storage::{keys, ColumnFamily, Transaction};

/// A published message buffered until it is correlated or expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub key: u64,
    pub name: String,
    pub correlation_key: String,
    pub variables: Vec<u8>,
    /// Publisher-supplied idempotence token.
    pub message_id: Option<String>,
    pub time_to_live: i64,
    pub deadline: i64,
}

impl Message {
    fn indexed_id(&self) -> Option<&str> {
        self.message_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Durable store of buffered messages with its name, deadline and id
/// indices, plus the per-process correlation-key locks used by message
/// start events.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageStore {
    correlations: MessageCorrelationTracker,
}

impl MessageStore {
    /// Insert or replace the message stored under `message.key`. Index
    /// entries of a replaced message are dropped in the same transaction.
    pub fn put(&self, txn: &mut Transaction<'_>, message: &Message) -> StorageResult<()> {
        if let Some(previous) = self.get(txn, message.key)? {
            self.delete_indices(txn, &previous);
        }

        txn.put_value(
            ColumnFamily::Messages,
            keys::message_key(message.key),
            message,
        )?;
        txn.put(
            ColumnFamily::MessageNameIndex,
            keys::message_name_key(&message.name, &message.correlation_key, message.key),
            Vec::new(),
        );
        txn.put(
            ColumnFamily::MessageDeadlines,
            keys::message_deadline_key(message.deadline, message.key),
            Vec::new(),
        );
        if let Some(id) = message.indexed_id() {
            txn.put(
                ColumnFamily::MessageIds,
                keys::message_id_key(&message.name, &message.correlation_key, id),
                message.key.to_be_bytes().to_vec(),
            );
        }
        Ok(())
    }

    pub fn get(&self, txn: &Transaction<'_>, key: u64) -> StorageResult<Option<Message>> {
        txn.get_value(ColumnFamily::Messages, &keys::message_key(key))
    }

    /// Whether a buffered message with exactly this name, correlation key
    /// and non-empty id exists.
    pub fn exist(
        &self,
        txn: &Transaction<'_>,
        name: &str,
        correlation_key: &str,
        message_id: &str,
    ) -> StorageResult<bool> {
        if message_id.is_empty() {
            return Ok(false);
        }
        txn.exists(
            ColumnFamily::MessageIds,
            &keys::message_id_key(name, correlation_key, message_id),
        )
    }

    /// Visit messages with exactly this name and correlation key in
    /// ascending key order.
    pub fn visit_messages(
        &self,
        txn: &Transaction<'_>,
        name: &str,
        correlation_key: &str,
        mut visitor: impl FnMut(&Message) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        let prefix = keys::message_name_prefix(name, correlation_key);
        txn.scan_prefix(ColumnFamily::MessageNameIndex, &prefix, |key, _| {
            let message_key = keys::parse_trailing_u64(key)
                .ok_or_else(|| super::corrupt_key(ColumnFamily::MessageNameIndex))?;
            match self.get(txn, message_key)? {
                Some(message) => Ok(visitor(&message)),
                None => Ok(ControlFlow::Continue(())),
            }
        })
    }

    /// Visit `(deadline, message_key)` of every message whose deadline is
    /// strictly before `deadline`, earliest first.
    pub fn visit_messages_with_deadline_before(
        &self,
        txn: &Transaction<'_>,
        deadline: i64,
        mut visitor: impl FnMut(i64, u64) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        txn.scan_from(ColumnFamily::MessageDeadlines, &[], |key, _| {
            let (message_deadline, message_key) = keys::parse_message_deadline_key(key)
                .ok_or_else(|| super::corrupt_key(ColumnFamily::MessageDeadlines))?;
            if message_deadline >= deadline {
                return Ok(ControlFlow::Break(()));
            }
            Ok(visitor(message_deadline, message_key))
        })
    }

    /// Remove the message, its index entries and every correlation ledger
    /// row referencing it. Removing an unknown key is a no-op.
    pub fn remove(&self, txn: &mut Transaction<'_>, key: u64) -> StorageResult<()> {
        if let Some(message) = self.get(txn, key)? {
            self.delete_indices(txn, &message);
            txn.delete(ColumnFamily::Messages, keys::message_key(key));
        }
        self.correlations.remove_all_for_message(txn, key)
    }

    fn delete_indices(&self, txn: &mut Transaction<'_>, message: &Message) {
        txn.delete(
            ColumnFamily::MessageNameIndex,
            keys::message_name_key(&message.name, &message.correlation_key, message.key),
        );
        txn.delete(
            ColumnFamily::MessageDeadlines,
            keys::message_deadline_key(message.deadline, message.key),
        );
        if let Some(id) = message.indexed_id() {
            txn.delete(
                ColumnFamily::MessageIds,
                keys::message_id_key(&message.name, &message.correlation_key, id),
            );
        }
    }

    // --- Correlation ledger pass-through ---

    pub fn put_message_correlation(
        &self,
        txn: &mut Transaction<'_>,
        message_key: u64,
        process_instance_key: u64,
    ) {
        self.correlations
            .put(txn, message_key, process_instance_key);
    }

    pub fn exist_message_correlation(
        &self,
        txn: &Transaction<'_>,
        message_key: u64,
        process_instance_key: u64,
    ) -> StorageResult<bool> {
        self.correlations
            .exist(txn, message_key, process_instance_key)
    }

    pub fn remove_message_correlation(
        &self,
        txn: &mut Transaction<'_>,
        message_key: u64,
        process_instance_key: u64,
    ) {
        self.correlations
            .remove(txn, message_key, process_instance_key);
    }

    // --- Message start event locks ---

    /// Mark `(bpmn_process_id, correlation_key)` as having a running
    /// message-started instance.
    pub fn put_active_process_instance(
        &self,
        txn: &mut Transaction<'_>,
        bpmn_process_id: &str,
        correlation_key: &str,
        process_instance_key: u64,
    ) {
        txn.put(
            ColumnFamily::ActiveProcessInstances,
            keys::active_process_instance_key(bpmn_process_id, correlation_key),
            process_instance_key.to_be_bytes().to_vec(),
        );
    }

    pub fn exist_active_process_instance(
        &self,
        txn: &Transaction<'_>,
        bpmn_process_id: &str,
        correlation_key: &str,
    ) -> StorageResult<bool> {
        txn.exists(
            ColumnFamily::ActiveProcessInstances,
            &keys::active_process_instance_key(bpmn_process_id, correlation_key),
        )
    }

    pub fn remove_active_process_instance(
        &self,
        txn: &mut Transaction<'_>,
        bpmn_process_id: &str,
        correlation_key: &str,
    ) {
        txn.delete(
            ColumnFamily::ActiveProcessInstances,
            keys::active_process_instance_key(bpmn_process_id, correlation_key),
        );
    }

    pub fn put_process_instance_correlation_key(
        &self,
        txn: &mut Transaction<'_>,
        process_instance_key: u64,
        correlation_key: &str,
    ) {
        txn.put(
            ColumnFamily::InstanceCorrelationKeys,
            keys::instance_correlation_key(process_instance_key),
            correlation_key.as_bytes().to_vec(),
        );
    }

    pub fn get_process_instance_correlation_key(
        &self,
        txn: &Transaction<'_>,
        process_instance_key: u64,
    ) -> StorageResult<Option<String>> {
        match txn.get(
            ColumnFamily::InstanceCorrelationKeys,
            &keys::instance_correlation_key(process_instance_key),
        )? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| {
                crate::error::StorageError::Serialization(format!(
                    "instance correlation key is not utf-8: {e}"
                ))
            }),
            None => Ok(None),
        }
    }

    pub fn remove_process_instance_correlation_key(
        &self,
        txn: &mut Transaction<'_>,
        process_instance_key: u64,
    ) {
        txn.delete(
            ColumnFamily::InstanceCorrelationKeys,
            keys::instance_correlation_key(process_instance_key),
        );
    }
}
