use std::ops::ControlFlow;

use super::*;
use crate::engine::command::OpenSubscriptionRequest;
use crate::engine::partition::subscription_partition_id;
use crate::state::{ProcessMessageSubscription, ProcessSubscriptionState};

impl Processor {
    pub(super) fn handle_open_process_subscription(
        &mut self,
        request: OpenSubscriptionRequest,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            if this.process_subscriptions.exist(
                txn,
                request.element_instance_key,
                &request.message_name,
            )? {
                debug!(
                    element_instance_key = request.element_instance_key,
                    message_name = %request.message_name,
                    "process subscription already exists, open ignored"
                );
                return Ok(());
            }

            let now = this.now();
            let subscription = ProcessMessageSubscription {
                process_instance_key: request.process_instance_key,
                element_instance_key: request.element_instance_key,
                subscription_partition_id: subscription_partition_id(
                    &request.correlation_key,
                    this.partition_count,
                ),
                bpmn_process_id: request.bpmn_process_id,
                element_id: request.element_id,
                message_name: request.message_name,
                correlation_key: request.correlation_key,
                interrupting: request.interrupting,
                command_sent_time: now,
                state: ProcessSubscriptionState::Opening,
            };
            this.process_subscriptions.put(txn, &subscription, now)?;
            this.send(
                subscription.subscription_partition_id,
                open_command(&subscription),
            );
            Ok(())
        })
    }

    pub(super) fn handle_process_subscription_opened(
        &mut self,
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: &str,
        subscription_partition_id: u32,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            match this
                .process_subscriptions
                .get(txn, element_instance_key, message_name)?
            {
                Some(subscription) if subscription.is_opening() => this
                    .process_subscriptions
                    .update_to_opened_state(txn, &subscription, subscription_partition_id),
                Some(_) => {
                    debug!(element_instance_key, %message_name, "subscription not opening, opened acknowledgment ignored");
                    Ok(())
                }
                None => {
                    warn!(process_instance_key, element_instance_key, %message_name, "opened subscription not found");
                    Ok(())
                }
            }
        })
    }

    /// Deliver a correlated message to the waiting element, or reject it
    /// when the element no longer waits for it.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn handle_correlate_process_subscription(
        &mut self,
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
        correlation_key: String,
        message_key: u64,
        variables: Vec<u8>,
        subscription_partition_id: u32,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            let subscription = this
                .process_subscriptions
                .get(txn, element_instance_key, &message_name)?
                .filter(|subscription| !subscription.is_closing());
            let Some(subscription) = subscription else {
                debug!(element_instance_key, %message_name, message_key, "no open subscription, rejecting correlation");
                this.send(
                    subscription_partition_id,
                    SubscriptionCommand::RejectCorrelation {
                        process_instance_key,
                        element_instance_key,
                        message_name,
                        correlation_key,
                        message_key,
                    },
                );
                return Ok(());
            };

            // A correlation implies the message side has opened the subscription.
            if subscription.is_opening() {
                this.process_subscriptions.update_to_opened_state(
                    txn,
                    &subscription,
                    subscription_partition_id,
                )?;
            }
            if subscription.interrupting {
                this.process_subscriptions
                    .remove(txn, element_instance_key, &message_name);
            }

            this.outbox
                .push(SideEffect::TriggerElement(TriggerElementRequest {
                    process_instance_key,
                    element_instance_key,
                    element_id: subscription.element_id.clone(),
                    message_name: message_name.clone(),
                    message_key,
                    variables,
                    interrupting: subscription.interrupting,
                }));
            this.send(
                subscription_partition_id,
                SubscriptionCommand::AcknowledgeCorrelation {
                    process_instance_key,
                    element_instance_key,
                    message_name,
                    message_key,
                },
            );
            Ok(())
        })
    }

    pub(super) fn handle_close_process_subscription(
        &mut self,
        element_instance_key: u64,
        message_name: &str,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            let Some(subscription) =
                this.process_subscriptions
                    .get(txn, element_instance_key, message_name)?
            else {
                debug!(element_instance_key, %message_name, "process subscription not found, close ignored");
                return Ok(());
            };
            this.close_process_subscription(txn, &subscription)
        })
    }

    pub(super) fn handle_close_element_subscriptions(
        &mut self,
        element_instance_key: u64,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            let mut subscriptions = Vec::new();
            this.process_subscriptions.visit_element_subscriptions(
                txn,
                element_instance_key,
                |subscription| {
                    subscriptions.push(subscription.clone());
                    ControlFlow::Continue(())
                },
            )?;
            for subscription in &subscriptions {
                this.close_process_subscription(txn, subscription)?;
            }
            Ok(())
        })
    }

    pub(super) fn handle_process_subscription_closed(
        &mut self,
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: &str,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            match this
                .process_subscriptions
                .get(txn, element_instance_key, message_name)?
            {
                Some(subscription) if subscription.is_closing() => {
                    this.process_subscriptions
                        .remove(txn, element_instance_key, message_name);
                }
                Some(_) => {
                    debug!(element_instance_key, %message_name, "subscription not closing, closed acknowledgment ignored");
                }
                None => {
                    debug!(process_instance_key, element_instance_key, %message_name, "closed subscription already removed");
                }
            }
            Ok(())
        })
    }

    fn close_process_subscription(
        &mut self,
        txn: &mut Transaction<'_>,
        subscription: &ProcessMessageSubscription,
    ) -> StorageResult<()> {
        if subscription.is_closing() {
            return Ok(());
        }
        let now = self.now();
        self.process_subscriptions
            .update_to_closing_state(txn, subscription, now)?;
        self.send(
            subscription.subscription_partition_id,
            close_command(subscription),
        );
        Ok(())
    }
}

pub(super) fn open_command(subscription: &ProcessMessageSubscription) -> SubscriptionCommand {
    SubscriptionCommand::OpenMessageSubscription {
        process_instance_key: subscription.process_instance_key,
        element_instance_key: subscription.element_instance_key,
        message_name: subscription.message_name.clone(),
        correlation_key: subscription.correlation_key.clone(),
        interrupting: subscription.interrupting,
    }
}

pub(super) fn close_command(subscription: &ProcessMessageSubscription) -> SubscriptionCommand {
    SubscriptionCommand::CloseMessageSubscription {
        process_instance_key: subscription.process_instance_key,
        element_instance_key: subscription.element_instance_key,
        message_name: subscription.message_name.clone(),
    }
}
