use crate::error::PublishError;
use crate::state::MessageStartEventSubscription;
use crate::storage::keys::MAX_KEY_STRING_LEN;

/// A message to publish on its message partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub name: String,
    pub correlation_key: String,
    pub variables: Vec<u8>,
    /// Optional idempotence token; an empty id is treated as absent.
    pub message_id: Option<String>,
    pub time_to_live_ms: i64,
}

/// A catch element that starts waiting for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSubscriptionRequest {
    pub process_instance_key: u64,
    pub element_instance_key: u64,
    pub bpmn_process_id: String,
    pub element_id: String,
    pub message_name: String,
    pub correlation_key: String,
    pub interrupting: bool,
}

/// Commands exchanged between the process partition of a subscription and
/// the message partition owning its correlation key. Delivery is
/// at-least-once; every receiver is idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCommand {
    /// Process side asks the message partition to open a subscription.
    OpenMessageSubscription {
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
        correlation_key: String,
        interrupting: bool,
    },
    /// Process side confirms a correlation was applied.
    AcknowledgeCorrelation {
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
        message_key: u64,
    },
    /// Process side refuses a correlation (subscription gone or closing).
    RejectCorrelation {
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
        correlation_key: String,
        message_key: u64,
    },
    /// Process side asks the message partition to drop a subscription.
    CloseMessageSubscription {
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
    },
    /// Message side confirms the subscription is open.
    ProcessSubscriptionOpened {
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
        subscription_partition_id: u32,
    },
    /// Message side delivers a matched message.
    CorrelateProcessSubscription {
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
        correlation_key: String,
        message_key: u64,
        variables: Vec<u8>,
        subscription_partition_id: u32,
    },
    /// Message side confirms the subscription is closed.
    ProcessSubscriptionClosed {
        process_instance_key: u64,
        element_instance_key: u64,
        message_name: String,
    },
}

impl SubscriptionCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            SubscriptionCommand::OpenMessageSubscription { .. } => "open_message_subscription",
            SubscriptionCommand::AcknowledgeCorrelation { .. } => "acknowledge_correlation",
            SubscriptionCommand::RejectCorrelation { .. } => "reject_correlation",
            SubscriptionCommand::CloseMessageSubscription { .. } => "close_message_subscription",
            SubscriptionCommand::ProcessSubscriptionOpened { .. } => "process_subscription_opened",
            SubscriptionCommand::CorrelateProcessSubscription { .. } => {
                "correlate_process_subscription"
            }
            SubscriptionCommand::ProcessSubscriptionClosed { .. } => "process_subscription_closed",
        }
    }

    fn key_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            SubscriptionCommand::OpenMessageSubscription {
                message_name,
                correlation_key,
                ..
            }
            | SubscriptionCommand::RejectCorrelation {
                message_name,
                correlation_key,
                ..
            }
            | SubscriptionCommand::CorrelateProcessSubscription {
                message_name,
                correlation_key,
                ..
            } => vec![
                ("message name", message_name.as_str()),
                ("correlation key", correlation_key.as_str()),
            ],
            SubscriptionCommand::AcknowledgeCorrelation { message_name, .. }
            | SubscriptionCommand::CloseMessageSubscription { message_name, .. }
            | SubscriptionCommand::ProcessSubscriptionOpened { message_name, .. }
            | SubscriptionCommand::ProcessSubscriptionClosed { message_name, .. } => {
                vec![("message name", message_name.as_str())]
            }
        }
    }
}

/// Commands sent to the single-threaded partition processor.
///
/// Each variant that expects a response includes a `tokio::sync::oneshot::Sender`
/// for the reply. Fire-and-forget commands omit the reply channel.
pub enum EngineCommand {
    PublishMessage {
        message: PublishRequest,
        reply: tokio::sync::oneshot::Sender<Result<u64, PublishError>>,
    },
    /// A command received from another partition (or this one).
    Subscription(SubscriptionCommand),
    DeployStartEventSubscription {
        subscription: MessageStartEventSubscription,
    },
    RemoveProcessDefinition {
        process_definition_key: u64,
    },
    ProcessInstanceCompleted {
        process_instance_key: u64,
        bpmn_process_id: String,
        process_definition_key: u64,
    },
    OpenProcessSubscription {
        subscription: OpenSubscriptionRequest,
    },
    CloseProcessSubscription {
        element_instance_key: u64,
        message_name: String,
    },
    /// Close every subscription of a terminated element instance.
    CloseElementSubscriptions {
        element_instance_key: u64,
    },
    Shutdown,
}

impl EngineCommand {
    /// The first string field too long to be part of a storage key.
    /// Publish requests are checked by the publish handler, which replies
    /// with an error instead.
    pub(crate) fn oversized_key_field(&self) -> Option<&'static str> {
        let fields = match self {
            EngineCommand::Subscription(command) => command.key_fields(),
            EngineCommand::DeployStartEventSubscription { subscription } => vec![
                ("message name", subscription.message_name.as_str()),
                ("start event id", subscription.start_event_id.as_str()),
                ("bpmn process id", subscription.bpmn_process_id.as_str()),
            ],
            EngineCommand::ProcessInstanceCompleted {
                bpmn_process_id, ..
            } => vec![("bpmn process id", bpmn_process_id.as_str())],
            EngineCommand::OpenProcessSubscription { subscription } => vec![
                ("message name", subscription.message_name.as_str()),
                ("correlation key", subscription.correlation_key.as_str()),
            ],
            EngineCommand::CloseProcessSubscription { message_name, .. } => {
                vec![("message name", message_name.as_str())]
            }
            EngineCommand::PublishMessage { .. }
            | EngineCommand::RemoveProcessDefinition { .. }
            | EngineCommand::CloseElementSubscriptions { .. }
            | EngineCommand::Shutdown => Vec::new(),
        };
        fields
            .into_iter()
            .find(|(_, value)| value.len() > MAX_KEY_STRING_LEN)
            .map(|(field, _)| field)
    }
}

impl From<SubscriptionCommand> for EngineCommand {
    fn from(command: SubscriptionCommand) -> Self {
        EngineCommand::Subscription(command)
    }
}
