//! Interfaces to the parts of the workflow engine that live outside the
//! correlation subsystem. The processor calls them only after the command
//! that produced the call has been committed.

use std::sync::Arc;

use super::command::SubscriptionCommand;

/// Ask the process-instance state machine to create an instance from a
/// message start event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartInstanceRequest {
    pub process_instance_key: u64,
    pub process_definition_key: u64,
    pub bpmn_process_id: String,
    pub start_event_id: String,
    pub message_key: u64,
    pub message_name: String,
    pub correlation_key: String,
    pub variables: Vec<u8>,
}

/// Ask the process-instance state machine to complete a waiting catch
/// element with the variables of a correlated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerElementRequest {
    pub process_instance_key: u64,
    pub element_instance_key: u64,
    pub element_id: String,
    pub message_name: String,
    pub message_key: u64,
    pub variables: Vec<u8>,
    pub interrupting: bool,
}

/// Cross-partition delivery of subscription commands. Delivery may be lost
/// or duplicated; the processor resends until acknowledged.
pub trait SubscriptionTransport: Send + Sync {
    fn send(&self, partition_id: u32, command: SubscriptionCommand);
}

pub trait ProcessInstanceBridge: Send + Sync {
    fn start_instance(&self, request: StartInstanceRequest);

    fn trigger_element(&self, request: TriggerElementRequest);
}

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Everything the processor talks to besides storage.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn SubscriptionTransport>,
    pub bridge: Arc<dyn ProcessInstanceBridge>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(
        transport: Arc<dyn SubscriptionTransport>,
        bridge: Arc<dyn ProcessInstanceBridge>,
    ) -> Self {
        Self {
            transport,
            bridge,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
