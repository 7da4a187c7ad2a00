use bincode::{Decode, Encode};
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

pub fn from_millis(ts: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ts)
}

/// Renders a batch time as milliseconds since the epoch, for log lines.
pub fn print_time(time: SystemTime) -> String {
    format!("{}ms", to_millis(time))
}

/// Identity of a state key. Keys must be totally ordered so that a partition's
/// records, and anything encoded from them, come out in the same order on
/// every execution.
pub trait Key:
    Debug + Clone + Encode + Decode + Hash + Ord + PartialEq + Eq + Send + Sync + 'static
{
}
impl<T: Debug + Clone + Encode + Decode + Hash + Ord + PartialEq + Eq + Send + Sync + 'static> Key
    for T
{
}

pub trait Data: Debug + Clone + Encode + Decode + Send + Sync + PartialEq + 'static {}
impl<T: Debug + Clone + Encode + Decode + Send + Sync + PartialEq + 'static> Data for T {}

/// A value emitted by the tracking function for one key in one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<K: Key, T: Data> {
    pub timestamp: SystemTime,
    pub key: K,
    pub value: T,
}

/// Identifies an operator instance in logs and metric labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorInfo {
    pub operator_id: String,
    pub operator_name: String,
}

impl OperatorInfo {
    pub fn for_test(operator_id: &str) -> Self {
        Self {
            operator_id: operator_id.to_string(),
            operator_name: "op".to_string(),
        }
    }
}

/// Maps a hash to one of `n` contiguous, equally sized ranges of the hash
/// space.
pub fn server_for_hash(x: u64, n: usize) -> usize {
    if n == 1 {
        0
    } else {
        let range_size = (u64::MAX / (n as u64)) + 1;
        (x / range_size) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_for_hash_bounds() {
        assert_eq!(server_for_hash(0, 1), 0);
        assert_eq!(server_for_hash(u64::MAX, 1), 0);

        for n in [2, 3, 6, 7] {
            assert_eq!(server_for_hash(0, n), 0);
            assert_eq!(server_for_hash(u64::MAX, n), n - 1);
        }
    }

    #[test]
    fn test_server_for_hash_is_monotonic() {
        let n = 5;
        let mut last = 0;
        for step in 0..=1000u64 {
            let x = (u64::MAX / 1000) * step;
            let server = server_for_hash(x, n);
            assert!(server >= last, "hash {} went back to server {}", x, server);
            assert!(server < n);
            last = server;
        }
        assert_eq!(last, n - 1);
    }

    #[test]
    fn test_print_time() {
        assert_eq!(print_time(from_millis(12_000)), "12000ms");
    }
}
