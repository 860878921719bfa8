pub mod keys;
mod rocksdb;
mod traits;
mod transaction;

pub use self::rocksdb::RocksDbStorage;
pub use traits::{ColumnFamily, RawVisitor, Storage, WriteBatchOp};
pub use transaction::Transaction;

#[cfg(test)]
pub(crate) use self::rocksdb::all_keys;
