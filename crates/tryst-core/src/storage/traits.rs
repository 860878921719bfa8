use std::ops::ControlFlow;

use crate::error::StorageResult;

/// Column families of the correlation state. Each table and each secondary
/// index lives in its own column family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnFamily {
    Messages,
    MessageNameIndex,
    MessageDeadlines,
    MessageIds,
    MessageCorrelations,
    MessageStartCorrelations,
    ActiveProcessInstances,
    InstanceCorrelationKeys,
    MessageSubscriptions,
    SubscriptionNameIndex,
    SubscriptionSentTimes,
    ProcessSubscriptions,
    StartEventSubscriptions,
    StartEventNameIndex,
    StartEventProcessIndex,
    State,
}

impl ColumnFamily {
    /// All column families (excluding `default` which RocksDB creates automatically).
    pub const ALL: [ColumnFamily; 16] = [
        ColumnFamily::Messages,
        ColumnFamily::MessageNameIndex,
        ColumnFamily::MessageDeadlines,
        ColumnFamily::MessageIds,
        ColumnFamily::MessageCorrelations,
        ColumnFamily::MessageStartCorrelations,
        ColumnFamily::ActiveProcessInstances,
        ColumnFamily::InstanceCorrelationKeys,
        ColumnFamily::MessageSubscriptions,
        ColumnFamily::SubscriptionNameIndex,
        ColumnFamily::SubscriptionSentTimes,
        ColumnFamily::ProcessSubscriptions,
        ColumnFamily::StartEventSubscriptions,
        ColumnFamily::StartEventNameIndex,
        ColumnFamily::StartEventProcessIndex,
        ColumnFamily::State,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColumnFamily::Messages => "messages",
            ColumnFamily::MessageNameIndex => "message_name_index",
            ColumnFamily::MessageDeadlines => "message_deadlines",
            ColumnFamily::MessageIds => "message_ids",
            ColumnFamily::MessageCorrelations => "message_correlations",
            ColumnFamily::MessageStartCorrelations => "message_start_correlations",
            ColumnFamily::ActiveProcessInstances => "active_process_instances",
            ColumnFamily::InstanceCorrelationKeys => "instance_correlation_keys",
            ColumnFamily::MessageSubscriptions => "message_subscriptions",
            ColumnFamily::SubscriptionNameIndex => "subscription_name_index",
            ColumnFamily::SubscriptionSentTimes => "subscription_sent_times",
            ColumnFamily::ProcessSubscriptions => "process_subscriptions",
            ColumnFamily::StartEventSubscriptions => "start_event_subscriptions",
            ColumnFamily::StartEventNameIndex => "start_event_name_index",
            ColumnFamily::StartEventProcessIndex => "start_event_process_index",
            ColumnFamily::State => "state",
        }
    }
}

/// Represents a single operation in an atomic write batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteBatchOp {
    Put {
        cf: ColumnFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: ColumnFamily,
        key: Vec<u8>,
    },
}

/// Visitor over raw `(key, value)` pairs. Returning `ControlFlow::Break`
/// stops the scan.
pub type RawVisitor<'v> = dyn FnMut(&[u8], &[u8]) -> StorageResult<ControlFlow<()>> + 'v;

/// Ordered key-value store backing all correlation state. Implementations
/// must be thread-safe; mutation goes exclusively through `write_batch` so
/// that every command's writes land atomically.
pub trait Storage: Send + Sync {
    /// Retrieve a value by key.
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Visit entries with `key >= from` in ascending key order until the
    /// visitor breaks or the column family is exhausted.
    fn scan(&self, cf: ColumnFamily, from: &[u8], visitor: &mut RawVisitor<'_>)
        -> StorageResult<()>;

    /// Atomically apply a batch of write operations across column families.
    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()>;

    /// Flush the write-ahead log so committed batches survive a crash.
    fn flush(&self) -> StorageResult<()>;
}
