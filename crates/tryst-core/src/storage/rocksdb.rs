use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{ColumnFamily, RawVisitor, Storage, WriteBatchOp};

type DB = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed storage implementation.
pub struct RocksDbStorage {
    db: DB,
}

impl RocksDbStorage {
    /// Open or create a RocksDB database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamily::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name(), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self { db })
    }

    fn handle(&self, cf: ColumnFamily) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
        self.db.cf_handle(cf.name()).ok_or_else(|| {
            StorageError::RocksDb(format!("column family not found: {}", cf.name()))
        })
    }
}

impl Storage for RocksDbStorage {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let handle = self.handle(cf)?;
        Ok(self.db.get_cf(&handle, key)?)
    }

    fn scan(
        &self,
        cf: ColumnFamily,
        from: &[u8],
        visitor: &mut RawVisitor<'_>,
    ) -> StorageResult<()> {
        let handle = self.handle(cf)?;
        let iter = self
            .db
            .iterator_cf(&handle, IteratorMode::From(from, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if visitor(&key, &value)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    fn write_batch(&self, ops: Vec<WriteBatchOp>) -> StorageResult<()> {
        let mut batch = WriteBatch::default();

        for op in ops {
            match op {
                WriteBatchOp::Put { cf, key, value } => {
                    let handle = self.handle(cf)?;
                    batch.put_cf(&handle, &key, &value);
                }
                WriteBatchOp::Delete { cf, key } => {
                    let handle = self.handle(cf)?;
                    batch.delete_cf(&handle, &key);
                }
            }
        }

        self.db.write(batch)?;
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush_wal(true)?;
        Ok(())
    }
}

/// Collect every key of a column family (used by tests to assert that no
/// index entry was left behind).
#[cfg(test)]
pub(crate) fn all_keys(storage: &dyn Storage, cf: ColumnFamily) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    storage
        .scan(cf, &[], &mut |key, _| {
            keys.push(key.to_vec());
            Ok(std::ops::ControlFlow::Continue(()))
        })
        .unwrap();
    keys
}
