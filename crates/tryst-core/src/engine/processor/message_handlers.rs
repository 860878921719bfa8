use std::collections::BTreeMap;
use std::ops::ControlFlow;

use super::*;
use crate::engine::command::PublishRequest;
use crate::engine::partition::decode_partition_id;
use crate::error::PublishError;
use crate::state::{Message, MessageStartEventSubscription, MessageSubscription};
use crate::storage::keys::MAX_KEY_STRING_LEN;

impl Processor {
    pub(super) fn handle_publish(&mut self, request: PublishRequest) -> Result<u64, PublishError> {
        check_key_len("message name", &request.name)?;
        check_key_len("correlation key", &request.correlation_key)?;
        if let Some(id) = &request.message_id {
            check_key_len("message id", id)?;
        }

        self.in_transaction(|this, txn| {
            let message_id = request.message_id.filter(|id| !id.is_empty());
            if let Some(id) = &message_id {
                if this
                    .messages
                    .exist(txn, &request.name, &request.correlation_key, id)?
                {
                    warn!(name = %request.name, correlation_key = %request.correlation_key, message_id = %id, "duplicate message id, publish rejected");
                    return Err(PublishError::DuplicateMessageId {
                        name: request.name,
                        correlation_key: request.correlation_key,
                        message_id: id.clone(),
                    });
                }
            }

            let now = this.now();
            let message = Message {
                key: this.keys.next_key(txn)?,
                name: request.name,
                correlation_key: request.correlation_key,
                variables: request.variables,
                message_id,
                time_to_live: request.time_to_live_ms,
                deadline: now.saturating_add(request.time_to_live_ms),
            };
            this.messages.put(txn, &message)?;

            this.correlate_to_start_events(txn, &message)?;
            this.correlate_to_subscriptions(txn, &message)?;

            if message.time_to_live <= 0 {
                this.messages.remove(txn, message.key)?;
            }
            debug!(message_key = message.key, deadline = message.deadline, "message published");
            Ok(message.key)
        })
    }

    pub(super) fn handle_open_message_subscription(
        &mut self,
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
        correlation_key: String,
        interrupting: bool,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            let process_partition = decode_partition_id(process_instance_key);
            if this.subscriptions.exist_subscription_for_element_instance(
                txn,
                element_instance_key,
                &message_name,
            )? {
                debug!(element_instance_key, %message_name, "message subscription already open, acknowledging again");
                let opened =
                    this.opened_command(process_instance_key, element_instance_key, &message_name);
                this.send(process_partition, opened);
                return Ok(());
            }

            let subscription = MessageSubscription::new(
                process_instance_key,
                element_instance_key,
                message_name.clone(),
                correlation_key,
                interrupting,
            );
            this.subscriptions.put(txn, &subscription)?;
            let opened =
                this.opened_command(process_instance_key, element_instance_key, &message_name);
            this.send(process_partition, opened);
            this.correlate_buffered_message(txn, &subscription)
        })
    }

    pub(super) fn handle_acknowledge_correlation(
        &mut self,
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: &str,
        message_key: u64,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            let Some(subscription) = this.subscriptions.get(txn, element_instance_key, message_name)?
            else {
                warn!(process_instance_key, element_instance_key, %message_name, "acknowledged subscription not found");
                return Ok(());
            };
            if !subscription.correlating || subscription.message_key != Some(message_key) {
                debug!(element_instance_key, message_key, "stale correlation acknowledgment ignored");
                return Ok(());
            }

            if subscription.interrupting {
                this.subscriptions
                    .remove(txn, element_instance_key, message_name)
            } else {
                this.subscriptions
                    .update_to_correlated_state(txn, &subscription)?;
                this.correlate_buffered_message(txn, &subscription)
            }
        })
    }

    pub(super) fn handle_reject_correlation(
        &mut self,
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: &str,
        correlation_key: &str,
        message_key: u64,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            debug!(process_instance_key, element_instance_key, %correlation_key, message_key, "correlation rejected");
            this.messages
                .remove_message_correlation(txn, message_key, process_instance_key);

            if let Some(subscription) =
                this.subscriptions.get(txn, element_instance_key, message_name)?
            {
                if subscription.message_key == Some(message_key) {
                    this.subscriptions
                        .remove(txn, element_instance_key, message_name)?;
                }
            }

            match this.messages.get(txn, message_key)? {
                Some(message) if message.deadline > this.now() => {
                    this.correlate_to_subscriptions(txn, &message)
                }
                _ => Ok(()),
            }
        })
    }

    pub(super) fn handle_close_message_subscription(
        &mut self,
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            this.subscriptions
                .remove(txn, element_instance_key, &message_name)?;
            this.send(
                decode_partition_id(process_instance_key),
                SubscriptionCommand::ProcessSubscriptionClosed {
                    process_instance_key,
                    element_instance_key,
                    message_name,
                },
            );
            Ok(())
        })
    }

    pub(super) fn handle_deploy_start_event(
        &mut self,
        subscription: MessageStartEventSubscription,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| this.start_events.put(txn, &subscription))
    }

    pub(super) fn handle_remove_process_definition(
        &mut self,
        process_definition_key: u64,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            this.start_events
                .remove_subscriptions_of_workflow(txn, process_definition_key)
        })
    }

    /// Release the correlation key lock of a message-started instance and
    /// start the next instance for a message buffered under the same key.
    /// The next instance uses the latest deployed version of the process,
    /// not the version that just completed.
    pub(super) fn handle_process_instance_completed(
        &mut self,
        process_instance_key: u64,
        bpmn_process_id: &str,
    ) -> StorageResult<()> {
        self.in_transaction(|this, txn| {
            let Some(correlation_key) = this
                .messages
                .get_process_instance_correlation_key(txn, process_instance_key)?
            else {
                return Ok(());
            };
            this.messages
                .remove_process_instance_correlation_key(txn, process_instance_key);
            this.messages
                .remove_active_process_instance(txn, bpmn_process_id, &correlation_key);

            let mut latest: BTreeMap<String, MessageStartEventSubscription> = BTreeMap::new();
            // Ascending definition keys: per message name the latest version
            // wins, the same choice a publish makes.
            this.start_events
                .visit_subscriptions_of_process(txn, bpmn_process_id, |subscription| {
                    latest.insert(subscription.message_name.clone(), subscription.clone());
                    ControlFlow::Continue(())
                })?;

            let correlations = this.correlations;
            for start_event in latest.into_values() {
                let view: &Transaction<'_> = txn;
                let next = this.first_buffered_message(
                    view,
                    &start_event.message_name,
                    &correlation_key,
                    |message| {
                        correlations.exist_start_correlation(
                            view,
                            message.key,
                            &start_event.bpmn_process_id,
                        )
                    },
                )?;
                if let Some(message) = next {
                    if this.try_start_instance(txn, &start_event, &message)? {
                        break;
                    }
                }
            }
            Ok(())
        })
    }

    /// Start at most one instance per bpmn process id, using the most
    /// recently deployed definition listening for the message.
    fn correlate_to_start_events(
        &mut self,
        txn: &mut Transaction<'_>,
        message: &Message,
    ) -> StorageResult<()> {
        let mut latest: BTreeMap<String, MessageStartEventSubscription> = BTreeMap::new();
        // Ascending definition keys, so later versions overwrite earlier ones.
        self.start_events
            .visit_subscriptions_by_message_name(txn, &message.name, |subscription| {
                latest.insert(subscription.bpmn_process_id.clone(), subscription.clone());
                ControlFlow::Continue(())
            })?;

        for start_event in latest.into_values() {
            self.try_start_instance(txn, &start_event, message)?;
        }
        Ok(())
    }

    fn try_start_instance(
        &mut self,
        txn: &mut Transaction<'_>,
        start_event: &MessageStartEventSubscription,
        message: &Message,
    ) -> StorageResult<bool> {
        let bpmn_process_id = &start_event.bpmn_process_id;
        if self
            .correlations
            .exist_start_correlation(txn, message.key, bpmn_process_id)?
        {
            return Ok(false);
        }
        let has_correlation_key = !message.correlation_key.is_empty();
        if has_correlation_key
            && self.messages.exist_active_process_instance(
                txn,
                bpmn_process_id,
                &message.correlation_key,
            )?
        {
            debug!(%bpmn_process_id, correlation_key = %message.correlation_key, "instance already active for correlation key, message stays buffered");
            return Ok(false);
        }

        let process_instance_key = self.keys.next_key(txn)?;
        self.correlations
            .put_start_correlation(txn, message.key, bpmn_process_id);
        self.messages
            .put_message_correlation(txn, message.key, process_instance_key);
        if has_correlation_key {
            self.messages.put_active_process_instance(
                txn,
                bpmn_process_id,
                &message.correlation_key,
                process_instance_key,
            );
            self.messages.put_process_instance_correlation_key(
                txn,
                process_instance_key,
                &message.correlation_key,
            );
        }

        debug!(process_instance_key, %bpmn_process_id, message_key = message.key, "starting process instance from message");
        let correlated = start_event.correlated(&message.variables);
        self.outbox
            .push(SideEffect::StartInstance(StartInstanceRequest {
                process_instance_key,
                process_definition_key: correlated.process_definition_key,
                bpmn_process_id: correlated.bpmn_process_id,
                start_event_id: correlated.start_event_id,
                message_key: message.key,
                message_name: message.name.clone(),
                correlation_key: message.correlation_key.clone(),
                variables: correlated.variables,
            }));
        Ok(true)
    }

    /// Correlate the message to every waiting subscription whose process
    /// instance has not received it yet, at most once per process instance.
    fn correlate_to_subscriptions(
        &mut self,
        txn: &mut Transaction<'_>,
        message: &Message,
    ) -> StorageResult<()> {
        let mut waiting = Vec::new();
        self.subscriptions.visit_subscriptions(
            txn,
            &message.name,
            &message.correlation_key,
            |subscription| {
                if !subscription.correlating {
                    waiting.push(subscription.clone());
                }
                ControlFlow::Continue(())
            },
        )?;

        for subscription in waiting {
            if self.messages.exist_message_correlation(
                txn,
                message.key,
                subscription.process_instance_key,
            )? {
                continue;
            }
            self.correlate(txn, &subscription, message)?;
        }
        Ok(())
    }

    /// Correlate the oldest unexpired buffered message this subscription's
    /// process instance has not received yet.
    fn correlate_buffered_message(
        &mut self,
        txn: &mut Transaction<'_>,
        subscription: &MessageSubscription,
    ) -> StorageResult<()> {
        let messages = self.messages;
        let view: &Transaction<'_> = txn;
        let next = self.first_buffered_message(
            view,
            &subscription.message_name,
            &subscription.correlation_key,
            |message| {
                messages.exist_message_correlation(
                    view,
                    message.key,
                    subscription.process_instance_key,
                )
            },
        )?;
        match next {
            Some(message) => self.correlate(txn, subscription, &message),
            None => Ok(()),
        }
    }

    fn first_buffered_message(
        &self,
        txn: &Transaction<'_>,
        name: &str,
        correlation_key: &str,
        mut already_correlated: impl FnMut(&Message) -> StorageResult<bool>,
    ) -> StorageResult<Option<Message>> {
        let now = self.now();
        let mut found = None;
        let mut failure = None;
        self.messages
            .visit_messages(txn, name, correlation_key, |message| {
                if message.deadline <= now {
                    return ControlFlow::Continue(());
                }
                match already_correlated(message) {
                    Ok(true) => ControlFlow::Continue(()),
                    Ok(false) => {
                        found = Some(message.clone());
                        ControlFlow::Break(())
                    }
                    Err(e) => {
                        failure = Some(e);
                        ControlFlow::Break(())
                    }
                }
            })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(found),
        }
    }

    fn correlate(
        &mut self,
        txn: &mut Transaction<'_>,
        subscription: &MessageSubscription,
        message: &Message,
    ) -> StorageResult<()> {
        let now = self.now();
        self.subscriptions.update_to_correlating_state(
            txn,
            subscription,
            &message.variables,
            now,
            message.key,
        )?;
        self.messages
            .put_message_correlation(txn, message.key, subscription.process_instance_key);

        debug!(
            element_instance_key = subscription.element_instance_key,
            message_key = message.key,
            "correlating message to subscription"
        );
        self.send(
            decode_partition_id(subscription.process_instance_key),
            SubscriptionCommand::CorrelateProcessSubscription {
                process_instance_key: subscription.process_instance_key,
                element_instance_key: subscription.element_instance_key,
                message_name: subscription.message_name.clone(),
                correlation_key: subscription.correlation_key.clone(),
                message_key: message.key,
                variables: message.variables.clone(),
                subscription_partition_id: self.partition_id,
            },
        );
        Ok(())
    }

    fn opened_command(
        &self,
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: &str,
    ) -> SubscriptionCommand {
        SubscriptionCommand::ProcessSubscriptionOpened {
            process_instance_key,
            element_instance_key,
            message_name: message_name.to_string(),
            subscription_partition_id: self.partition_id,
        }
    }
}

fn check_key_len(field: &'static str, value: &str) -> Result<(), PublishError> {
    if value.len() > MAX_KEY_STRING_LEN {
        return Err(PublishError::KeyTooLong {
            field,
            max: MAX_KEY_STRING_LEN,
        });
    }
    Ok(())
}
