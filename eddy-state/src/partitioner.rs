use crate::{hash_key, StateError};
use bincode::{Decode, Encode};
use eddy_types::{server_for_hash, Key};
use std::fmt::{Debug, Display, Formatter};

/// Identifies how a table was sharded, so that a table and the input it is
/// merged with can be checked for co-partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Encode, Decode)]
pub struct PartitionerDescriptor {
    pub kind: String,
    pub partitions: usize,
}

impl Display for PartitionerDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.partitions)
    }
}

/// Maps a key to a shard index in `0..partitions()`. Must be a pure function
/// of the key; it is applied identically to stored state and incoming data.
pub trait Partitioner<K: Key>: Debug + Send + Sync + 'static {
    fn partitions(&self) -> usize;

    fn partition(&self, key: &K) -> usize;

    fn descriptor(&self) -> PartitionerDescriptor;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashPartitioner {
    partitions: usize,
}

impl HashPartitioner {
    pub fn new(partitions: usize) -> Result<Self, StateError> {
        if partitions == 0 {
            return Err(StateError::NoPartitions);
        }
        Ok(Self { partitions })
    }
}

impl<K: Key> Partitioner<K> for HashPartitioner {
    fn partitions(&self) -> usize {
        self.partitions
    }

    fn partition(&self, key: &K) -> usize {
        (hash_key(key) % self.partitions as u64) as usize
    }

    fn descriptor(&self) -> PartitionerDescriptor {
        PartitionerDescriptor {
            kind: "hash".to_string(),
            partitions: self.partitions,
        }
    }
}

/// Splits the hash space into contiguous ranges, one per partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRangePartitioner {
    partitions: usize,
}

impl KeyRangePartitioner {
    pub fn new(partitions: usize) -> Result<Self, StateError> {
        if partitions == 0 {
            return Err(StateError::NoPartitions);
        }
        Ok(Self { partitions })
    }
}

impl<K: Key> Partitioner<K> for KeyRangePartitioner {
    fn partitions(&self) -> usize {
        self.partitions
    }

    fn partition(&self, key: &K) -> usize {
        server_for_hash(hash_key(key), self.partitions)
    }

    fn descriptor(&self) -> PartitionerDescriptor {
        PartitionerDescriptor {
            kind: "key-range".to_string(),
            partitions: self.partitions,
        }
    }
}
