use bincode::{Decode, Encode};
use eddy_types::{Data, Key};
use std::time::{Duration, SystemTime};

/// The persisted unit of state for a single key. A record only exists while
/// the tracking function has left state present for its key.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct StateRecord<K: Key, S: Data> {
    pub key: K,
    pub state: S,
    pub last_update: SystemTime,
}

impl<K: Key, S: Data> StateRecord<K, S> {
    pub fn new(key: K, state: S, last_update: SystemTime) -> Self {
        Self {
            key,
            state,
            last_update,
        }
    }

    /// Whether the record has gone at least `timeout` without input as of
    /// `batch_time`.
    pub fn is_idle(&self, batch_time: SystemTime, timeout: Duration) -> bool {
        match self.last_update.checked_add(timeout) {
            Some(deadline) => deadline <= batch_time,
            None => false,
        }
    }
}

/// The change one invocation makes to the next table generation.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange<K: Key, S: Data> {
    Put(StateRecord<K, S>),
    Drop(K),
}

impl<K: Key, S: Data> RecordChange<K, S> {
    pub fn key(&self) -> &K {
        match self {
            RecordChange::Put(record) => &record.key,
            RecordChange::Drop(key) => key,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use eddy_types::from_millis;

    #[test]
    fn test_idle_boundary() {
        let record = StateRecord::new("a".to_string(), 1i64, from_millis(0));
        let timeout = Duration::from_secs(10);

        assert!(!record.is_idle(from_millis(5_000), timeout));
        assert!(!record.is_idle(from_millis(9_999), timeout));
        assert!(record.is_idle(from_millis(10_000), timeout));
        assert!(record.is_idle(from_millis(12_000), timeout));
    }

    #[test]
    fn test_idle_overflow_never_expires() {
        let record = StateRecord::new(1u64, 1i64, from_millis(1_000));
        assert!(!record.is_idle(from_millis(2_000), Duration::MAX));
    }
}
