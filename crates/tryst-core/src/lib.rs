pub mod engine;
pub mod error;
pub mod state;
pub mod storage;

pub use engine::{Collaborators, Engine, EngineCommand, EngineConfig, SubscriptionCommand};
pub use error::{EngineError, EngineResult, PublishError, StorageError, StorageResult};
pub use storage::{RocksDbStorage, Storage, Transaction, WriteBatchOp};
