use crate::error::StorageResult;
use crate::storage::{keys, ColumnFamily, Transaction};

/// Dedupe ledger of correlations that already happened.
///
/// `(message, process instance)` rows make catch-event correlation
/// at-most-once; `(message, bpmn process id)` rows make a message start at
/// most one instance per process, whatever the version or start event.
/// Both sets are purged when the message itself is removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCorrelationTracker;

impl MessageCorrelationTracker {
    pub fn put(&self, txn: &mut Transaction<'_>, message_key: u64, process_instance_key: u64) {
        txn.put(
            ColumnFamily::MessageCorrelations,
            keys::message_correlation_key(message_key, process_instance_key),
            Vec::new(),
        );
    }

    pub fn exist(
        &self,
        txn: &Transaction<'_>,
        message_key: u64,
        process_instance_key: u64,
    ) -> StorageResult<bool> {
        txn.exists(
            ColumnFamily::MessageCorrelations,
            &keys::message_correlation_key(message_key, process_instance_key),
        )
    }

    pub fn remove(&self, txn: &mut Transaction<'_>, message_key: u64, process_instance_key: u64) {
        txn.delete(
            ColumnFamily::MessageCorrelations,
            keys::message_correlation_key(message_key, process_instance_key),
        );
    }

    pub fn put_start_correlation(
        &self,
        txn: &mut Transaction<'_>,
        message_key: u64,
        bpmn_process_id: &str,
    ) {
        txn.put(
            ColumnFamily::MessageStartCorrelations,
            keys::message_start_correlation_key(message_key, bpmn_process_id),
            Vec::new(),
        );
    }

    pub fn exist_start_correlation(
        &self,
        txn: &Transaction<'_>,
        message_key: u64,
        bpmn_process_id: &str,
    ) -> StorageResult<bool> {
        txn.exists(
            ColumnFamily::MessageStartCorrelations,
            &keys::message_start_correlation_key(message_key, bpmn_process_id),
        )
    }

    /// Delete every ledger row that references `message_key`.
    pub fn remove_all_for_message(
        &self,
        txn: &mut Transaction<'_>,
        message_key: u64,
    ) -> StorageResult<()> {
        let prefix = keys::message_correlation_prefix(message_key);
        for cf in [
            ColumnFamily::MessageCorrelations,
            ColumnFamily::MessageStartCorrelations,
        ] {
            for key in txn.keys_with_prefix(cf, &prefix)? {
                txn.delete(cf, key);
            }
        }
        Ok(())
    }
}
