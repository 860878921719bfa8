use crate::error::StorageResult;
use crate::storage::keys::KEY_GENERATOR_STATE_KEY;
use crate::storage::{ColumnFamily, Transaction};

/// Bits below the partition id in a generated key.
const PARTITION_BITS: u32 = 51;
const COUNTER_MASK: u64 = (1 << PARTITION_BITS) - 1;

/// Partition that generated `key`.
pub fn decode_partition_id(key: u64) -> u32 {
    (key >> PARTITION_BITS) as u32
}

/// Message partition owning `correlation_key`, in `1..=partition_count`.
///
/// The hash only looks at the first and last byte and the length. An empty
/// key hashes to 0.
pub fn subscription_partition_id(correlation_key: &str, partition_count: u32) -> u32 {
    let hash = correlation_key_hash(correlation_key.as_bytes());
    let count = partition_count.max(1) as i32;
    (hash % count).unsigned_abs() + 1
}

fn correlation_key_hash(bytes: &[u8]) -> i32 {
    let (Some(&first), Some(&last)) = (bytes.first(), bytes.last()) else {
        return 0;
    };
    let mut hash: i32 = 0;
    hash = hash.wrapping_mul(31).wrapping_add(first as i8 as i32);
    hash = hash.wrapping_mul(31).wrapping_add(last as i8 as i32);
    hash.wrapping_mul(31).wrapping_add(bytes.len() as i32)
}

/// Generates `(partition_id << 51) | counter` keys. The counter is stored
/// in the `state` column family through the caller's transaction, so a
/// rolled back command does not consume keys.
#[derive(Debug, Clone, Copy)]
pub struct KeyGenerator {
    partition_id: u32,
}

impl KeyGenerator {
    pub fn new(partition_id: u32) -> Self {
        Self { partition_id }
    }

    pub fn next_key(&self, txn: &mut Transaction<'_>) -> StorageResult<u64> {
        let current = match txn.get(ColumnFamily::State, KEY_GENERATOR_STATE_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    crate::error::StorageError::Serialization(
                        "key generator counter is not 8 bytes".to_string(),
                    )
                })?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = (current + 1) & COUNTER_MASK;
        txn.put(
            ColumnFamily::State,
            KEY_GENERATOR_STATE_KEY.to_vec(),
            next.to_be_bytes().to_vec(),
        );
        Ok(((self.partition_id as u64) << PARTITION_BITS) | next)
    }
}
