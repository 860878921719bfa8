use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::ops::ControlFlow;

use super::SubscriptionId;

/// A scheduled retry for a process message subscription.
///
/// Two entries are equal when they name the same subscription, whatever
/// their sent times. Scheduling order is a separate comparator,
/// [`cmp_by_sent_time`](Self::cmp_by_sent_time), so the type has no `Ord`.
#[derive(Debug, Clone)]
pub struct TransientSubscriptionEntry {
    pub element_instance_key: u64,
    pub message_name: String,
    pub command_sent_time: i64,
}

impl TransientSubscriptionEntry {
    pub fn new(element_instance_key: u64, message_name: impl Into<String>, command_sent_time: i64) -> Self {
        Self {
            element_instance_key,
            message_name: message_name.into(),
            command_sent_time,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        SubscriptionId::new(self.element_instance_key, self.message_name.clone())
    }

    /// Order by sent time, then by identity.
    pub fn cmp_by_sent_time(&self, other: &Self) -> Ordering {
        self.command_sent_time
            .cmp(&other.command_sent_time)
            .then_with(|| self.element_instance_key.cmp(&other.element_instance_key))
            .then_with(|| self.message_name.cmp(&other.message_name))
    }
}

impl PartialEq for TransientSubscriptionEntry {
    fn eq(&self, other: &Self) -> bool {
        self.element_instance_key == other.element_instance_key
            && self.message_name == other.message_name
    }
}

impl Eq for TransientSubscriptionEntry {}

impl Hash for TransientSubscriptionEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.element_instance_key.hash(state);
        self.message_name.hash(state);
    }
}

/// In-memory retry schedule. Each subscription holds at most one slot;
/// scheduling an already scheduled subscription moves its slot.
#[derive(Debug, Default)]
pub struct TransientSubscriptionIndex {
    schedule: BTreeSet<(i64, SubscriptionId)>,
    sent_times: HashMap<SubscriptionId, i64>,
}

impl TransientSubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the entry, replacing any slot the same subscription held.
    pub fn add(&mut self, entry: &TransientSubscriptionEntry) {
        let id = entry.id();
        if let Some(previous) = self.sent_times.insert(id.clone(), entry.command_sent_time) {
            self.schedule.remove(&(previous, id.clone()));
        }
        self.schedule.insert((entry.command_sent_time, id));
    }

    /// Move an existing slot. Returns false when the subscription is not
    /// scheduled, in which case nothing changes.
    pub fn update(&mut self, entry: &TransientSubscriptionEntry) -> bool {
        let id = entry.id();
        let Some(sent_time) = self.sent_times.get_mut(&id) else {
            return false;
        };
        let previous = std::mem::replace(sent_time, entry.command_sent_time);
        self.schedule.remove(&(previous, id.clone()));
        self.schedule.insert((entry.command_sent_time, id));
        true
    }

    pub fn remove(&mut self, id: &SubscriptionId) -> bool {
        match self.sent_times.remove(id) {
            Some(sent_time) => {
                self.schedule.remove(&(sent_time, id.clone()));
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.sent_times.contains_key(id)
    }

    pub fn sent_time(&self, id: &SubscriptionId) -> Option<i64> {
        self.sent_times.get(id).copied()
    }

    /// Visit entries with `command_sent_time < deadline`, earliest first.
    pub fn visit_before(
        &self,
        deadline: i64,
        mut visitor: impl FnMut(&TransientSubscriptionEntry) -> ControlFlow<()>,
    ) {
        for (sent_time, id) in &self.schedule {
            if *sent_time >= deadline {
                break;
            }
            let entry =
                TransientSubscriptionEntry::new(id.element_instance_key, id.message_name.clone(), *sent_time);
            if visitor(&entry).is_break() {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sent_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent_times.is_empty()
    }
}
