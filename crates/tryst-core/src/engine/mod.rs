pub mod bridge;
pub mod command;
pub mod config;
pub mod partition;
mod processor;

use std::sync::Arc;
use std::thread;

use tracing::info;

use crate::error::{EngineError, EngineResult, PublishError};
use crate::storage::Storage;

pub use bridge::{
    Clock, Collaborators, ProcessInstanceBridge, StartInstanceRequest, SubscriptionTransport,
    SystemClock, TriggerElementRequest,
};
pub use command::{EngineCommand, OpenSubscriptionRequest, PublishRequest, SubscriptionCommand};
pub use config::EngineConfig;
pub use partition::{decode_partition_id, subscription_partition_id, KeyGenerator};

use processor::Processor;

/// The engine owns one partition's processor thread and its inbound
/// command channel. Callers and the subscription transport send commands
/// through the handle; the processor applies them one at a time.
pub struct Engine {
    command_tx: crossbeam_channel::Sender<EngineCommand>,
    processor_thread: Option<thread::JoinHandle<()>>,
}

impl Engine {
    /// Create a new engine, spawning the partition processor on a dedicated
    /// OS thread.
    #[tracing::instrument(skip_all, fields(partition_id = config.partition.partition_id))]
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn Storage>,
        collaborators: Collaborators,
    ) -> EngineResult<Self> {
        let (tx, rx) =
            crossbeam_channel::bounded::<EngineCommand>(config.processor.command_channel_capacity);

        let handle = thread::Builder::new()
            .name(format!("tryst-partition-{}", config.partition.partition_id))
            .spawn(move || {
                let mut processor = Processor::new(
                    storage,
                    rx,
                    &config.partition,
                    &config.processor,
                    &config.correlation,
                    collaborators,
                );
                processor.run();
            })
            .map_err(|e| EngineError::ProcessorSpawn(e.to_string()))?;

        info!("engine started");

        Ok(Self {
            command_tx: tx,
            processor_thread: Some(handle),
        })
    }

    /// Send a command to the processor. Returns an error if the channel is
    /// full or disconnected.
    #[tracing::instrument(skip_all)]
    pub fn send_command(&self, cmd: EngineCommand) -> EngineResult<()> {
        self.command_tx.try_send(cmd).map_err(|e| match e {
            crossbeam_channel::TrySendError::Full(_) => EngineError::ChannelFull,
            crossbeam_channel::TrySendError::Disconnected(_) => EngineError::ChannelDisconnected,
        })
    }

    /// Publish a message. The receiver resolves to the message key once the
    /// publish has been committed.
    #[tracing::instrument(skip_all, fields(name = %message.name))]
    pub fn publish(
        &self,
        message: PublishRequest,
    ) -> EngineResult<tokio::sync::oneshot::Receiver<Result<u64, PublishError>>> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send_command(EngineCommand::PublishMessage { message, reply })?;
        Ok(rx)
    }

    /// Hand a command received from another partition to the processor.
    #[tracing::instrument(skip_all, fields(kind = command.kind()))]
    pub fn deliver(&self, command: SubscriptionCommand) -> EngineResult<()> {
        self.send_command(command.into())
    }

    /// Initiate graceful shutdown: send the shutdown command and wait for the
    /// processor thread to finish.
    #[tracing::instrument(skip_all)]
    pub fn shutdown(mut self) -> EngineResult<()> {
        info!("initiating engine shutdown");

        // Send shutdown command (ignore error if channel already closed)
        let _ = self.command_tx.send(EngineCommand::Shutdown);

        if let Some(handle) = self.processor_thread.take() {
            handle.join().map_err(|_| EngineError::ProcessorPanicked)?;
        }

        info!("engine shutdown complete");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // If shutdown wasn't called explicitly, attempt to stop the processor
        if self.processor_thread.is_some() {
            let _ = self.command_tx.send(EngineCommand::Shutdown);
            if let Some(handle) = self.processor_thread.take() {
                let _ = handle.join();
            }
        }
    }
}
