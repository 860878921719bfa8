use super::*;
use crate::engine::bridge::{Clock, ProcessInstanceBridge, SubscriptionTransport};
use crate::engine::command::{OpenSubscriptionRequest, PublishRequest};
use crate::state::{
    Message, MessageStartEventSubscription, MessageSubscription, ProcessMessageSubscription,
};
use crate::storage::RocksDbStorage;
use std::ops::ControlFlow;

mod common;
use common::*;

mod process_subscription;
mod sweeps;

fn stored_message(processor: &Processor, key: u64) -> Option<Message> {
    read(processor, |txn| processor.messages.get(txn, key).unwrap())
}

fn message_subscription(
    processor: &Processor,
    element_instance_key: u64,
    message_name: &str,
) -> Option<MessageSubscription> {
    read(processor, |txn| {
        processor
            .subscriptions
            .get(txn, element_instance_key, message_name)
            .unwrap()
    })
}

fn process_subscription(
    processor: &Processor,
    element_instance_key: u64,
    message_name: &str,
) -> Option<ProcessMessageSubscription> {
    read(processor, |txn| {
        processor
            .process_subscriptions
            .get(txn, element_instance_key, message_name)
            .unwrap()
    })
}

fn buffered_messages(processor: &Processor, name: &str, correlation_key: &str) -> Vec<u64> {
    read(processor, |txn| {
        let mut keys = Vec::new();
        processor
            .messages
            .visit_messages(txn, name, correlation_key, |message| {
                keys.push(message.key);
                ControlFlow::Continue(())
            })
            .unwrap();
        keys
    })
}
