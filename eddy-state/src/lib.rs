use bincode::config::Configuration;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

pub mod metrics;
pub mod partitioner;
pub mod record;
pub mod table;

pub use partitioner::{HashPartitioner, KeyRangePartitioner, Partitioner, PartitionerDescriptor};
pub use record::{RecordChange, StateRecord};
pub use table::{StatePartition, StateTable, TableBuilder};

pub const BINCODE_CONFIG: Configuration = bincode::config::standard();

pub fn hash_key<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("a partitioner must have at least one partition")]
    NoPartitions,

    #[error("partitioner mismatch: table was built with {found}, operator uses {expected}")]
    PartitionerMismatch {
        expected: PartitionerDescriptor,
        found: PartitionerDescriptor,
    },

    #[error("expected {expected} partitions but got {found}")]
    PartitionCount { expected: usize, found: usize },

    #[error("partitioner routed key {key} to partition {partition}, but there are only {partitions}")]
    PartitionOutOfRange {
        key: String,
        partition: usize,
        partitions: usize,
    },

    #[error("record for key {key} is stored in partition {found} but belongs to {expected}")]
    MisplacedKey {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("failed to encode state table: {0}")]
    Encode(String),

    #[error("failed to decode state table: {0}")]
    Decode(String),

    #[error("state table image has {0} trailing bytes")]
    TrailingBytes(usize),
}
