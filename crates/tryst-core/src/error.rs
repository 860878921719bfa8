/// Low-level storage errors (RocksDB, serialization, key decoding).
/// This is the only failure the state components can report: absence is
/// never an error, so every `StorageError` is fatal for the command that
/// hit it.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt key in column family {0}")]
    CorruptKey(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::RocksDb(err.into_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Reasons a publish request is refused.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(
        "message with id '{message_id}' already published for name '{name}' and correlation key '{correlation_key}'"
    )]
    DuplicateMessageId {
        name: String,
        correlation_key: String,
        message_id: String,
    },

    #[error("{field} exceeds {max} bytes")]
    KeyTooLong { field: &'static str, max: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors of the engine handle (processor thread and command channel).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn partition processor: {0}")]
    ProcessorSpawn(String),

    #[error("command channel full")]
    ChannelFull,

    #[error("command channel disconnected")]
    ChannelDisconnected,

    #[error("partition processor panicked")]
    ProcessorPanicked,

    #[error("failed to load config: {0}")]
    Config(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type EngineResult<T> = std::result::Result<T, EngineError>;
