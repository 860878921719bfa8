use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::engine::bridge::{Collaborators, StartInstanceRequest, TriggerElementRequest};
use crate::engine::command::{EngineCommand, SubscriptionCommand};
use crate::engine::config::{CorrelationConfig, PartitionConfig, ProcessorConfig};
use crate::engine::partition::KeyGenerator;
use crate::error::{StorageError, StorageResult};
use crate::state::{
    MessageCorrelationTracker, MessageStartEventRegistry, MessageStore,
    MessageSubscriptionRegistry, ProcessSubscriptionCoordinator,
};
use crate::storage::keys::MAX_KEY_STRING_LEN;
use crate::storage::{Storage, Transaction};

mod message_handlers;
mod process_handlers;
mod recovery;
mod sweeps;

/// A call to a collaborator, held back until the producing command commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SideEffect {
    Send {
        partition_id: u32,
        command: SubscriptionCommand,
    },
    StartInstance(StartInstanceRequest),
    TriggerElement(TriggerElementRequest),
}

/// Single-threaded partition processor. Owns the correlation state of one
/// partition and handles commands from the engine handle one at a time,
/// each inside its own transaction.
pub struct Processor {
    storage: Arc<dyn Storage>,
    inbound: Receiver<EngineCommand>,
    idle_timeout: Duration,
    running: bool,
    partition_id: u32,
    partition_count: u32,
    correlation: CorrelationConfig,
    collaborators: Collaborators,
    keys: KeyGenerator,
    messages: MessageStore,
    correlations: MessageCorrelationTracker,
    subscriptions: MessageSubscriptionRegistry,
    process_subscriptions: ProcessSubscriptionCoordinator,
    start_events: MessageStartEventRegistry,
    /// Side effects of the command in progress.
    outbox: Vec<SideEffect>,
    last_ttl_check: i64,
    last_subscription_check: i64,
}

impl Processor {
    pub fn new(
        storage: Arc<dyn Storage>,
        inbound: Receiver<EngineCommand>,
        partition: &PartitionConfig,
        config: &ProcessorConfig,
        correlation: &CorrelationConfig,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            storage,
            inbound,
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            running: true,
            partition_id: partition.partition_id,
            partition_count: partition.partition_count,
            correlation: correlation.clone(),
            collaborators,
            keys: KeyGenerator::new(partition.partition_id),
            messages: MessageStore::default(),
            correlations: MessageCorrelationTracker,
            subscriptions: MessageSubscriptionRegistry,
            process_subscriptions: ProcessSubscriptionCoordinator::new(),
            start_events: MessageStartEventRegistry,
            outbox: Vec::new(),
            last_ttl_check: 0,
            last_subscription_check: 0,
        }
    }

    /// Run the processor loop. Blocks the current thread until a `Shutdown`
    /// command is received, the inbound channel is disconnected or a
    /// storage failure halts processing.
    pub fn run(&mut self) {
        info!(partition_id = self.partition_id, "partition processor started");
        self.recover();

        while self.running {
            // Phase 1: Drain all buffered commands (non-blocking)
            let mut drained = 0;
            while let Ok(cmd) = self.inbound.try_recv() {
                self.handle_command(cmd);
                drained += 1;
                if !self.running {
                    break;
                }
            }

            if !self.running {
                break;
            }

            // Phase 2: Expire messages and resend unacknowledged commands.
            self.run_due_sweeps();

            // Phase 3: Park until next command or timeout
            if drained == 0 && self.running {
                match self.inbound.recv_timeout(self.idle_timeout) {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                        info!("inbound channel disconnected, shutting down");
                        self.running = false;
                    }
                }
            }
        }

        // Flush the WAL to ensure all writes are durable before exit
        if let Err(e) = self.storage.flush() {
            warn!(error = %e, "failed to flush WAL during shutdown");
        }

        info!(partition_id = self.partition_id, "partition processor stopped");
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        if let Some(field) = cmd.oversized_key_field() {
            warn!(field, max = MAX_KEY_STRING_LEN, "key field too long, command ignored");
            return;
        }

        match cmd {
            EngineCommand::PublishMessage { message, reply } => {
                debug!(name = %message.name, correlation_key = %message.correlation_key, "publish message command received");
                let result = self.handle_publish(message);
                if let Err(crate::error::PublishError::Storage(e)) = &result {
                    self.halt(e);
                }
                let _ = reply.send(result);
            }
            EngineCommand::Subscription(command) => {
                debug!(kind = command.kind(), "subscription command received");
                let result = self.handle_subscription_command(command);
                self.check(result);
            }
            EngineCommand::DeployStartEventSubscription { subscription } => {
                debug!(
                    process_definition_key = subscription.process_definition_key,
                    message_name = %subscription.message_name,
                    "deploy start event subscription"
                );
                let result = self.handle_deploy_start_event(subscription);
                self.check(result);
            }
            EngineCommand::RemoveProcessDefinition {
                process_definition_key,
            } => {
                debug!(process_definition_key, "remove process definition");
                let result = self.handle_remove_process_definition(process_definition_key);
                self.check(result);
            }
            EngineCommand::ProcessInstanceCompleted {
                process_instance_key,
                bpmn_process_id,
                process_definition_key,
            } => {
                debug!(process_instance_key, %bpmn_process_id, process_definition_key, "process instance completed");
                let result =
                    self.handle_process_instance_completed(process_instance_key, &bpmn_process_id);
                self.check(result);
            }
            EngineCommand::OpenProcessSubscription { subscription } => {
                debug!(
                    element_instance_key = subscription.element_instance_key,
                    message_name = %subscription.message_name,
                    "open process subscription"
                );
                let result = self.handle_open_process_subscription(subscription);
                self.check(result);
            }
            EngineCommand::CloseProcessSubscription {
                element_instance_key,
                message_name,
            } => {
                debug!(element_instance_key, %message_name, "close process subscription");
                let result = self.handle_close_process_subscription(element_instance_key, &message_name);
                self.check(result);
            }
            EngineCommand::CloseElementSubscriptions {
                element_instance_key,
            } => {
                debug!(element_instance_key, "close element subscriptions");
                let result = self.handle_close_element_subscriptions(element_instance_key);
                self.check(result);
            }
            EngineCommand::Shutdown => {
                info!("shutdown command received");
                self.running = false;
            }
        }
    }

    fn handle_subscription_command(&mut self, command: SubscriptionCommand) -> StorageResult<()> {
        match command {
            SubscriptionCommand::OpenMessageSubscription {
                process_instance_key,
                element_instance_key,
                message_name,
                correlation_key,
                interrupting,
            } => self.handle_open_message_subscription(
                process_instance_key,
                element_instance_key,
                message_name,
                correlation_key,
                interrupting,
            ),
            SubscriptionCommand::AcknowledgeCorrelation {
                process_instance_key,
                element_instance_key,
                message_name,
                message_key,
            } => self.handle_acknowledge_correlation(
                process_instance_key,
                element_instance_key,
                &message_name,
                message_key,
            ),
            SubscriptionCommand::RejectCorrelation {
                process_instance_key,
                element_instance_key,
                message_name,
                correlation_key,
                message_key,
            } => self.handle_reject_correlation(
                process_instance_key,
                element_instance_key,
                &message_name,
                &correlation_key,
                message_key,
            ),
            SubscriptionCommand::CloseMessageSubscription {
                process_instance_key,
                element_instance_key,
                message_name,
            } => self.handle_close_message_subscription(
                process_instance_key,
                element_instance_key,
                message_name,
            ),
            SubscriptionCommand::ProcessSubscriptionOpened {
                process_instance_key,
                element_instance_key,
                message_name,
                subscription_partition_id,
            } => self.handle_process_subscription_opened(
                process_instance_key,
                element_instance_key,
                &message_name,
                subscription_partition_id,
            ),
            SubscriptionCommand::CorrelateProcessSubscription {
                process_instance_key,
                element_instance_key,
                message_name,
                correlation_key,
                message_key,
                variables,
                subscription_partition_id,
            } => self.handle_correlate_process_subscription(
                process_instance_key,
                element_instance_key,
                message_name,
                correlation_key,
                message_key,
                variables,
                subscription_partition_id,
            ),
            SubscriptionCommand::ProcessSubscriptionClosed {
                process_instance_key,
                element_instance_key,
                message_name,
            } => self.handle_process_subscription_closed(
                process_instance_key,
                element_instance_key,
                &message_name,
            ),
        }
    }

    /// Run `handler` in a fresh transaction. On success the transaction is
    /// committed and the buffered side effects are dispatched; on error
    /// both are discarded.
    fn in_transaction<T, E>(
        &mut self,
        handler: impl FnOnce(&mut Self, &mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let storage = Arc::clone(&self.storage);
        let mut txn = Transaction::begin(storage.as_ref());
        self.outbox.clear();

        let value = match handler(self, &mut txn) {
            Ok(value) => value,
            Err(e) => {
                self.outbox.clear();
                return Err(e);
            }
        };
        if let Err(e) = txn.commit() {
            self.outbox.clear();
            return Err(e.into());
        }
        self.dispatch_outbox();
        Ok(value)
    }

    fn dispatch_outbox(&mut self) {
        for effect in std::mem::take(&mut self.outbox) {
            match effect {
                SideEffect::Send {
                    partition_id,
                    command,
                } => self.collaborators.transport.send(partition_id, command),
                SideEffect::StartInstance(request) => {
                    self.collaborators.bridge.start_instance(request)
                }
                SideEffect::TriggerElement(request) => {
                    self.collaborators.bridge.trigger_element(request)
                }
            }
        }
    }

    fn send(&mut self, partition_id: u32, command: SubscriptionCommand) {
        self.outbox.push(SideEffect::Send {
            partition_id,
            command,
        });
    }

    fn now(&self) -> i64 {
        self.collaborators.clock.now_ms()
    }

    fn check(&mut self, result: StorageResult<()>) {
        if let Err(e) = result {
            self.halt(&e);
        }
    }

    /// A failed transaction may have left the correlation invariants
    /// unverifiable, so processing stops instead of retrying.
    fn halt(&mut self, e: &StorageError) {
        error!(error = %e, partition_id = self.partition_id, "storage failure, halting partition processor");
        self.running = false;
    }

    /// Access the storage layer (used by tests).
    #[cfg(test)]
    pub(crate) fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }
}

#[cfg(test)]
mod tests;
