use std::collections::BTreeMap;
use std::ops::ControlFlow;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageResult;
use crate::storage::traits::{ColumnFamily, Storage, WriteBatchOp};

type CommitHook<'a> = Box<dyn FnOnce() + 'a>;

/// Write transaction scoped to the processing of one command.
///
/// Writes are buffered in an ordered overlay and become visible to reads
/// on the same transaction immediately. `commit` applies the overlay as a
/// single atomic batch and then runs the registered commit hooks. Dropping
/// the transaction without committing discards everything.
pub struct Transaction<'a> {
    storage: &'a dyn Storage,
    /// `None` marks a delete.
    overlay: BTreeMap<(ColumnFamily, Vec<u8>), Option<Vec<u8>>>,
    on_commit: Vec<CommitHook<'a>>,
}

impl<'a> Transaction<'a> {
    pub fn begin(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            overlay: BTreeMap::new(),
            on_commit: Vec::new(),
        }
    }

    pub fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        match self.overlay.get(&(cf, key.to_vec())) {
            Some(buffered) => Ok(buffered.clone()),
            None => self.storage.get(cf, key),
        }
    }

    pub fn exists(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    pub fn put(&mut self, cf: ColumnFamily, key: Vec<u8>, value: Vec<u8>) {
        self.overlay.insert((cf, key), Some(value));
    }

    pub fn delete(&mut self, cf: ColumnFamily, key: Vec<u8>) {
        self.overlay.insert((cf, key), None);
    }

    /// Read and deserialize a JSON value.
    pub fn get_value<T: DeserializeOwned>(
        &self,
        cf: ColumnFamily,
        key: &[u8],
    ) -> StorageResult<Option<T>> {
        match self.get(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize a value to JSON and buffer it. The stored bytes are a
    /// snapshot: later changes to `value` are not observed.
    pub fn put_value<T: Serialize>(
        &mut self,
        cf: ColumnFamily,
        key: Vec<u8>,
        value: &T,
    ) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(cf, key, bytes);
        Ok(())
    }

    /// Visit entries with `key >= start` in ascending order, merging buffered
    /// writes over committed storage. Buffered deletes hide committed entries.
    pub fn scan_from(
        &self,
        cf: ColumnFamily,
        start: &[u8],
        mut visitor: impl FnMut(&[u8], &[u8]) -> StorageResult<ControlFlow<()>>,
    ) -> StorageResult<()> {
        let mut buffered = self
            .overlay
            .range((cf, start.to_vec())..)
            .take_while(|((entry_cf, _), _)| *entry_cf == cf)
            .map(|((_, key), value)| (key.as_slice(), value.as_deref()))
            .peekable();
        let mut stopped = false;

        self.storage.scan(cf, start, &mut |key, value| {
            // Buffered entries sorting before the committed key come first.
            while let Some((buffered_key, buffered_value)) = buffered.peek().copied() {
                if buffered_key >= key {
                    break;
                }
                buffered.next();
                if let Some(buffered_value) = buffered_value {
                    if visitor(buffered_key, buffered_value)?.is_break() {
                        stopped = true;
                        return Ok(ControlFlow::Break(()));
                    }
                }
            }

            let flow = match buffered.peek().copied() {
                Some((buffered_key, buffered_value)) if buffered_key == key => {
                    buffered.next();
                    match buffered_value {
                        Some(buffered_value) => visitor(key, buffered_value)?,
                        None => ControlFlow::Continue(()),
                    }
                }
                _ => visitor(key, value)?,
            };
            if flow.is_break() {
                stopped = true;
            }
            Ok(flow)
        })?;

        if stopped {
            return Ok(());
        }
        for (key, value) in buffered {
            if let Some(value) = value {
                if visitor(key, value)?.is_break() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Visit entries whose key starts with `prefix`, in ascending order.
    pub fn scan_prefix(
        &self,
        cf: ColumnFamily,
        prefix: &[u8],
        mut visitor: impl FnMut(&[u8], &[u8]) -> StorageResult<ControlFlow<()>>,
    ) -> StorageResult<()> {
        self.scan_from(cf, prefix, |key, value| {
            if !key.starts_with(prefix) {
                return Ok(ControlFlow::Break(()));
            }
            visitor(key, value)
        })
    }

    /// Keys of all entries under `prefix`, in ascending order.
    pub fn keys_with_prefix(&self, cf: ColumnFamily, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        self.scan_prefix(cf, prefix, |key, _| {
            keys.push(key.to_vec());
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(keys)
    }

    /// Register a hook that runs once this transaction has been committed.
    /// Hooks of a rolled-back transaction never run.
    pub fn on_commit(&mut self, hook: impl FnOnce() + 'a) {
        self.on_commit.push(Box::new(hook));
    }

    /// Whether the transaction has buffered any write.
    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Apply all buffered writes atomically, then run commit hooks in
    /// registration order.
    pub fn commit(self) -> StorageResult<()> {
        let Transaction {
            storage,
            overlay,
            on_commit,
        } = self;

        if !overlay.is_empty() {
            let ops = overlay
                .into_iter()
                .map(|((cf, key), value)| match value {
                    Some(value) => WriteBatchOp::Put { cf, key, value },
                    None => WriteBatchOp::Delete { cf, key },
                })
                .collect();
            storage.write_batch(ops)?;
        }

        for hook in on_commit {
            hook();
        }
        Ok(())
    }
}
