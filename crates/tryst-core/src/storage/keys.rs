//! Key encoding for RocksDB column families.
//!
//! All numeric values use big-endian encoding for correct lexicographic ordering.
//! Signed values (deadlines, sent times) have their sign bit flipped first so
//! negative values sort before positive ones.
//! Composite keys use `:` (0x3A) as separator.
//! Variable-length strings are length-prefixed with a big-endian u16.

const SEPARATOR: u8 = b':';

/// Longest string a key component may hold.
pub const MAX_KEY_STRING_LEN: usize = u16::MAX as usize;

/// Key of the persisted key-generator counter in the `state` CF.
pub const KEY_GENERATOR_STATE_KEY: &[u8] = b"key_generator";

/// Encode a u64 as 8 big-endian bytes.
fn encode_u64(val: u64) -> [u8; 8] {
    val.to_be_bytes()
}

/// Encode an i64 as 8 order-preserving bytes.
fn encode_i64(val: i64) -> [u8; 8] {
    ((val as u64) ^ (1 << 63)).to_be_bytes()
}

/// Encode a variable-length string with a 2-byte big-endian length prefix.
///
/// Callers reject longer strings at the engine boundary.
fn encode_string(s: &str) -> Vec<u8> {
    let len = u16::try_from(s.len()).expect("key string exceeds 64 KiB");
    let mut buf = Vec::with_capacity(2 + s.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf
}

/// Incremental builder so every key layout below reads as a field list.
struct KeyBuilder {
    buf: Vec<u8>,
}

impl KeyBuilder {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(48),
        }
    }

    fn u64(self, val: u64) -> Self {
        self.field(&encode_u64(val))
    }

    fn i64(self, val: i64) -> Self {
        self.field(&encode_i64(val))
    }

    fn string(self, s: &str) -> Self {
        self.field(&encode_string(s))
    }

    fn field(mut self, bytes: &[u8]) -> Self {
        if !self.buf.is_empty() {
            self.buf.push(SEPARATOR);
        }
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Finish a prefix: trailing separator so the next field must follow.
    fn prefix(mut self) -> Vec<u8> {
        self.buf.push(SEPARATOR);
        self.buf
    }

    fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor for decoding composite keys.
pub struct KeyReader<'a> {
    rest: &'a [u8],
}

impl<'a> KeyReader<'a> {
    pub fn new(key: &'a [u8]) -> Self {
        Self { rest: key }
    }

    fn separator(&mut self) -> Option<()> {
        let (first, rest) = self.rest.split_first()?;
        if *first != SEPARATOR {
            return None;
        }
        self.rest = rest;
        Some(())
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.rest.len() < n {
            return None;
        }
        let (head, rest) = self.rest.split_at(n);
        self.rest = rest;
        Some(head)
    }

    pub fn u64(&mut self) -> Option<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    pub fn i64(&mut self) -> Option<i64> {
        self.u64().map(|raw| (raw ^ (1 << 63)) as i64)
    }

    pub fn string(&mut self) -> Option<String> {
        let len_bytes: [u8; 2] = self.take(2)?.try_into().ok()?;
        let len = u16::from_be_bytes(len_bytes) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    /// Consume a field separator, then read the next field with `f`.
    pub fn then<T>(&mut self, f: impl FnOnce(&mut Self) -> Option<T>) -> Option<T> {
        self.separator()?;
        f(self)
    }

    pub fn is_empty(&self) -> bool {
        self.rest.is_empty()
    }
}

// --- Messages ---

/// Primary message key: `{message_key}`.
pub fn message_key(key: u64) -> Vec<u8> {
    KeyBuilder::new().u64(key).build()
}

/// Name index key: `{name}:{correlation_key}:{message_key}`.
pub fn message_name_key(name: &str, correlation_key: &str, key: u64) -> Vec<u8> {
    KeyBuilder::new()
        .string(name)
        .string(correlation_key)
        .u64(key)
        .build()
}

/// Prefix of all name index entries with exactly this name and correlation key.
pub fn message_name_prefix(name: &str, correlation_key: &str) -> Vec<u8> {
    KeyBuilder::new()
        .string(name)
        .string(correlation_key)
        .prefix()
}

/// Deadline index key: `{deadline}:{message_key}`.
///
/// Deadline-first layout enables "scan from earliest deadline" iteration.
pub fn message_deadline_key(deadline: i64, key: u64) -> Vec<u8> {
    KeyBuilder::new().i64(deadline).u64(key).build()
}

/// Decode a deadline index key into `(deadline, message_key)`.
pub fn parse_message_deadline_key(key: &[u8]) -> Option<(i64, u64)> {
    let mut reader = KeyReader::new(key);
    let deadline = reader.i64()?;
    let message_key = reader.then(KeyReader::u64)?;
    reader.is_empty().then_some((deadline, message_key))
}

/// Message id index key: `{name}:{correlation_key}:{message_id}`.
pub fn message_id_key(name: &str, correlation_key: &str, message_id: &str) -> Vec<u8> {
    KeyBuilder::new()
        .string(name)
        .string(correlation_key)
        .string(message_id)
        .build()
}

/// Correlation ledger key: `{message_key}:{process_instance_key}`.
pub fn message_correlation_key(message_key: u64, process_instance_key: u64) -> Vec<u8> {
    KeyBuilder::new()
        .u64(message_key)
        .u64(process_instance_key)
        .build()
}

/// Start-event correlation ledger key: `{message_key}:{bpmn_process_id}`.
pub fn message_start_correlation_key(message_key: u64, bpmn_process_id: &str) -> Vec<u8> {
    KeyBuilder::new()
        .u64(message_key)
        .string(bpmn_process_id)
        .build()
}

/// Prefix shared by every ledger row of one message (both ledgers).
pub fn message_correlation_prefix(message_key: u64) -> Vec<u8> {
    KeyBuilder::new().u64(message_key).prefix()
}

/// Active process instance key: `{bpmn_process_id}:{correlation_key}`.
pub fn active_process_instance_key(bpmn_process_id: &str, correlation_key: &str) -> Vec<u8> {
    KeyBuilder::new()
        .string(bpmn_process_id)
        .string(correlation_key)
        .build()
}

/// Instance → correlation key mapping key: `{process_instance_key}`.
pub fn instance_correlation_key(process_instance_key: u64) -> Vec<u8> {
    KeyBuilder::new().u64(process_instance_key).build()
}

// --- Subscriptions ---

/// Subscription identity key: `{element_instance_key}:{message_name}`.
///
/// Shared by the message-side and process-side subscription tables.
pub fn subscription_key(element_instance_key: u64, message_name: &str) -> Vec<u8> {
    KeyBuilder::new()
        .u64(element_instance_key)
        .string(message_name)
        .build()
}

/// Prefix of all subscriptions owned by one element instance.
pub fn subscription_prefix(element_instance_key: u64) -> Vec<u8> {
    KeyBuilder::new().u64(element_instance_key).prefix()
}

/// Correlation index key: `{message_name}:{correlation_key}:{element_instance_key}`.
pub fn subscription_name_key(
    message_name: &str,
    correlation_key: &str,
    element_instance_key: u64,
) -> Vec<u8> {
    KeyBuilder::new()
        .string(message_name)
        .string(correlation_key)
        .u64(element_instance_key)
        .build()
}

/// Prefix of all correlation index entries for an exact name and correlation key.
pub fn subscription_name_prefix(message_name: &str, correlation_key: &str) -> Vec<u8> {
    KeyBuilder::new()
        .string(message_name)
        .string(correlation_key)
        .prefix()
}

/// Extract the trailing key of a name index entry (message key or element
/// instance key). It is stored as the last 8 bytes (big-endian u64).
pub fn parse_trailing_u64(key: &[u8]) -> Option<u64> {
    if key.len() < 8 {
        return None;
    }
    let bytes: [u8; 8] = key[key.len() - 8..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Retry index key: `{sent_time}:{element_instance_key}:{message_name}`.
pub fn subscription_sent_time_key(
    sent_time: i64,
    element_instance_key: u64,
    message_name: &str,
) -> Vec<u8> {
    KeyBuilder::new()
        .i64(sent_time)
        .u64(element_instance_key)
        .string(message_name)
        .build()
}

/// Decode a retry index key into `(sent_time, element_instance_key, message_name)`.
pub fn parse_subscription_sent_time_key(key: &[u8]) -> Option<(i64, u64, String)> {
    let mut reader = KeyReader::new(key);
    let sent_time = reader.i64()?;
    let element_instance_key = reader.then(KeyReader::u64)?;
    let message_name = reader.then(KeyReader::string)?;
    reader
        .is_empty()
        .then_some((sent_time, element_instance_key, message_name))
}

// --- Message start events ---

/// Start event subscription key: `{process_definition_key}:{start_event_id}`.
pub fn start_event_key(process_definition_key: u64, start_event_id: &str) -> Vec<u8> {
    KeyBuilder::new()
        .u64(process_definition_key)
        .string(start_event_id)
        .build()
}

/// Prefix of all start event subscriptions of one process definition.
pub fn start_event_prefix(process_definition_key: u64) -> Vec<u8> {
    KeyBuilder::new().u64(process_definition_key).prefix()
}

/// Start event name index key:
/// `{message_name}:{process_definition_key}:{start_event_id}`.
pub fn start_event_name_key(
    message_name: &str,
    process_definition_key: u64,
    start_event_id: &str,
) -> Vec<u8> {
    KeyBuilder::new()
        .string(message_name)
        .u64(process_definition_key)
        .string(start_event_id)
        .build()
}

/// Prefix of all start event name index entries for one message name.
pub fn start_event_name_prefix(message_name: &str) -> Vec<u8> {
    KeyBuilder::new().string(message_name).prefix()
}


/// Start event process index key:
/// `{bpmn_process_id}:{process_definition_key}:{start_event_id}`.
pub fn start_event_process_key(
    bpmn_process_id: &str,
    process_definition_key: u64,
    start_event_id: &str,
) -> Vec<u8> {
    KeyBuilder::new()
        .string(bpmn_process_id)
        .u64(process_definition_key)
        .string(start_event_id)
        .build()
}

/// Prefix of all start event process index entries for one bpmn process id.
pub fn start_event_process_prefix(bpmn_process_id: &str) -> Vec<u8> {
    KeyBuilder::new().string(bpmn_process_id).prefix()
}

/// Decode a start event name or process index key into
/// `(lookup, process_definition_key, start_event_id)`. Both indexes share
/// the layout; `lookup` is the message name or the bpmn process id.
pub fn parse_start_event_index_key(key: &[u8]) -> Option<(String, u64, String)> {
    let mut reader = KeyReader::new(key);
    let lookup = reader.string()?;
    let process_definition_key = reader.then(KeyReader::u64)?;
    let start_event_id = reader.then(KeyReader::string)?;
    reader
        .is_empty()
        .then_some((lookup, process_definition_key, start_event_id))
}
