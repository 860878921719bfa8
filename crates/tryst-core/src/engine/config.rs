use std::path::Path;

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

/// Top-level engine configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub partition: PartitionConfig,
    pub processor: ProcessorConfig,
    pub correlation: CorrelationConfig,
}

impl EngineConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }
}

/// Identity of the partition this engine processes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// 1-based partition id, also the high bits of every generated key.
    pub partition_id: u32,
    /// Number of partitions messages are distributed over.
    pub partition_count: u32,
}

/// Processor loop configuration (channel capacity, idle timeout).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub command_channel_capacity: usize,
    pub idle_timeout_ms: u64,
}

/// Message expiry and subscription retry timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub message_ttl_check_interval_ms: u64,
    /// Most messages removed by one TTL sweep.
    pub message_expiry_batch_limit: usize,
    /// How long a sent command may stay unacknowledged before it is resent.
    pub subscription_retry_timeout_ms: u64,
    pub subscription_check_interval_ms: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partition_id: 1,
            partition_count: 1,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            command_channel_capacity: 10_000,
            idle_timeout_ms: 100,
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            message_ttl_check_interval_ms: 60_000,
            message_expiry_batch_limit: 10_000,
            subscription_retry_timeout_ms: 10_000,
            subscription_check_interval_ms: 5_000,
        }
    }
}
