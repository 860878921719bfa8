use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use super::*;

pub(super) const PARTITION_ID: u32 = 1;
pub(super) const START_TIME: i64 = 1_000_000;
pub(super) const RETRY_TIMEOUT_MS: i64 = 10_000;

/// Clock that only moves when a test moves it.
pub(super) struct ManualClock(AtomicI64);

impl ManualClock {
    pub(super) fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(super) struct RecordingTransport {
    sent: Mutex<Vec<(u32, SubscriptionCommand)>>,
}

impl RecordingTransport {
    /// Commands sent since the last call.
    pub(super) fn take(&self) -> Vec<(u32, SubscriptionCommand)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SubscriptionTransport for RecordingTransport {
    fn send(&self, partition_id: u32, command: SubscriptionCommand) {
        self.sent.lock().unwrap().push((partition_id, command));
    }
}

#[derive(Default)]
pub(super) struct RecordingBridge {
    started: Mutex<Vec<StartInstanceRequest>>,
    triggered: Mutex<Vec<TriggerElementRequest>>,
}

impl RecordingBridge {
    pub(super) fn take_started(&self) -> Vec<StartInstanceRequest> {
        std::mem::take(&mut *self.started.lock().unwrap())
    }

    pub(super) fn take_triggered(&self) -> Vec<TriggerElementRequest> {
        std::mem::take(&mut *self.triggered.lock().unwrap())
    }
}

impl ProcessInstanceBridge for RecordingBridge {
    fn start_instance(&self, request: StartInstanceRequest) {
        self.started.lock().unwrap().push(request);
    }

    fn trigger_element(&self, request: TriggerElementRequest) {
        self.triggered.lock().unwrap().push(request);
    }
}

/// Per-test collaborators, shared with the processor under test.
pub(super) struct Harness {
    pub(super) transport: Arc<RecordingTransport>,
    pub(super) bridge: Arc<RecordingBridge>,
    pub(super) clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self {
            transport: Arc::new(RecordingTransport::default()),
            bridge: Arc::new(RecordingBridge::default()),
            clock: Arc::new(ManualClock(AtomicI64::new(START_TIME))),
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators::new(self.transport.clone(), self.bridge.clone())
            .with_clock(self.clock.clone())
    }

    pub(super) fn now(&self) -> i64 {
        self.clock.now_ms()
    }
}

pub(super) fn test_setup() -> (
    crossbeam_channel::Sender<EngineCommand>,
    Processor,
    Harness,
    tempfile::TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
    let (tx, processor, harness) = test_setup_with_storage(storage);
    (tx, processor, harness, dir)
}

/// Helper: create a processor sharing an existing storage (for restart tests).
pub(super) fn test_setup_with_storage(
    storage: Arc<dyn Storage>,
) -> (crossbeam_channel::Sender<EngineCommand>, Processor, Harness) {
    let partition = PartitionConfig {
        partition_id: PARTITION_ID,
        partition_count: 1,
    };
    let config = ProcessorConfig {
        command_channel_capacity: 256,
        idle_timeout_ms: 10,
    };
    let correlation = CorrelationConfig {
        message_ttl_check_interval_ms: 60_000,
        message_expiry_batch_limit: 100,
        subscription_retry_timeout_ms: RETRY_TIMEOUT_MS as u64,
        subscription_check_interval_ms: 5_000,
    };
    let harness = Harness::new();
    let (tx, rx) = crossbeam_channel::bounded(config.command_channel_capacity);
    let processor = Processor::new(
        storage,
        rx,
        &partition,
        &config,
        &correlation,
        harness.collaborators(),
    );
    (tx, processor, harness)
}

/// Key of the n-th entity created on this test partition.
pub(super) fn key(n: u64) -> u64 {
    ((PARTITION_ID as u64) << 51) | n
}

pub(super) fn publish_request(name: &str, correlation_key: &str, ttl_ms: i64) -> PublishRequest {
    PublishRequest {
        name: name.to_string(),
        correlation_key: correlation_key.to_string(),
        variables: format!("{{\"name\":\"{name}\"}}").into_bytes(),
        message_id: None,
        time_to_live_ms: ttl_ms,
    }
}

/// Helper: publish a message and return its key.
pub(super) fn publish(processor: &mut Processor, request: PublishRequest) -> u64 {
    let (reply_tx, mut reply_rx) = tokio::sync::oneshot::channel();
    processor.handle_command(EngineCommand::PublishMessage {
        message: request,
        reply: reply_tx,
    });
    reply_rx.try_recv().unwrap().unwrap()
}

pub(super) fn open_request(
    process_instance_key: u64,
    element_instance_key: u64,
    message_name: &str,
    correlation_key: &str,
    interrupting: bool,
) -> OpenSubscriptionRequest {
    OpenSubscriptionRequest {
        process_instance_key,
        element_instance_key,
        bpmn_process_id: "order-process".to_string(),
        element_id: format!("catch-{message_name}"),
        message_name: message_name.to_string(),
        correlation_key: correlation_key.to_string(),
        interrupting,
    }
}

/// Helper: open a subscription on the message side directly, as if the
/// process partition had sent it.
pub(super) fn open_message_subscription(
    processor: &mut Processor,
    process_instance_key: u64,
    element_instance_key: u64,
    message_name: &str,
    correlation_key: &str,
    interrupting: bool,
) {
    processor.handle_command(
        SubscriptionCommand::OpenMessageSubscription {
            process_instance_key,
            element_instance_key,
            message_name: message_name.to_string(),
            correlation_key: correlation_key.to_string(),
            interrupting,
        }
        .into(),
    );
}

pub(super) fn start_event(
    process_definition_key: u64,
    bpmn_process_id: &str,
    message_name: &str,
) -> MessageStartEventSubscription {
    MessageStartEventSubscription {
        process_definition_key,
        bpmn_process_id: bpmn_process_id.to_string(),
        start_event_id: "start".to_string(),
        message_name: message_name.to_string(),
        variables: Vec::new(),
    }
}

/// Commands of the given kind, in send order.
pub(super) fn of_kind(
    sent: &[(u32, SubscriptionCommand)],
    kind: &str,
) -> Vec<(u32, SubscriptionCommand)> {
    sent.iter()
        .filter(|(_, command)| command.kind() == kind)
        .cloned()
        .collect()
}

/// Snapshot read of the processor's committed state.
pub(super) fn read<T>(processor: &Processor, f: impl FnOnce(&Transaction<'_>) -> T) -> T {
    let txn = Transaction::begin(processor.storage());
    f(&txn)
}

impl Processor {
    /// Drain all buffered commands without running sweeps.
    pub(super) fn handle_all_pending(&mut self) {
        while let Ok(cmd) = self.inbound.try_recv() {
            self.handle_command(cmd);
        }
    }

    /// Feed every command sent so far back into this processor, until no
    /// new commands are produced. Single-partition loopback.
    pub(super) fn deliver_loopback(&mut self, transport: &RecordingTransport) -> Vec<SubscriptionCommand> {
        let mut delivered = Vec::new();
        loop {
            let sent = transport.take();
            if sent.is_empty() {
                return delivered;
            }
            for (partition_id, command) in sent {
                assert_eq!(partition_id, PARTITION_ID);
                delivered.push(command.clone());
                self.handle_command(command.into());
            }
        }
    }

    pub(super) fn is_running(&self) -> bool {
        self.running
    }
}
