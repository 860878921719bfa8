//! Correlation state: the message store, the dedupe ledger and the three
//! subscription registries. Every component is a view over an explicit
//! [`Transaction`](crate::storage::Transaction); nothing here commits.
//!
//! Visitors return [`ControlFlow`](std::ops::ControlFlow):
//! `ControlFlow::Break(())` stops a traversal, leaving the rest unvisited.

mod correlation;
mod message;
mod process_subscription;
mod start_event;
mod subscription;
mod transient;

pub use correlation::MessageCorrelationTracker;
pub use message::{Message, MessageStore};
pub use process_subscription::{
    ProcessMessageSubscription, ProcessSubscriptionCoordinator, ProcessSubscriptionState,
};
pub use start_event::{MessageStartEventRegistry, MessageStartEventSubscription};
pub use subscription::{MessageSubscription, MessageSubscriptionRegistry};
pub use transient::{TransientSubscriptionEntry, TransientSubscriptionIndex};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::ColumnFamily;

/// Identity of a subscription on either side of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId {
    pub element_instance_key: u64,
    pub message_name: String,
}

impl SubscriptionId {
    pub fn new(element_instance_key: u64, message_name: impl Into<String>) -> Self {
        Self {
            element_instance_key,
            message_name: message_name.into(),
        }
    }
}

fn corrupt_key(cf: ColumnFamily) -> StorageError {
    StorageError::CorruptKey(cf.name().to_string())
}
