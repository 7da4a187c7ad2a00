use crate::partitioner::{Partitioner, PartitionerDescriptor};
use crate::record::{RecordChange, StateRecord};
use crate::{StateError, BINCODE_CONFIG};
use bincode::{Decode, Encode};
use eddy_types::{Data, Key};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// One shard of a table generation. Records are kept in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePartition<K: Key, S: Data> {
    index: usize,
    records: BTreeMap<K, StateRecord<K, S>>,
}

impl<K: Key, S: Data> StatePartition<K, S> {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            records: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&StateRecord<K, S>> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &StateRecord<K, S>> {
        self.records.values()
    }

    fn insert(&mut self, record: StateRecord<K, S>) -> Option<StateRecord<K, S>> {
        self.records.insert(record.key.clone(), record)
    }

    /// Builds the next generation of this partition. The receiver is left
    /// untouched.
    pub fn apply(&self, changes: impl IntoIterator<Item = RecordChange<K, S>>) -> Self {
        let mut next = self.clone();
        for change in changes {
            match change {
                RecordChange::Put(record) => {
                    next.insert(record);
                }
                RecordChange::Drop(key) => {
                    next.records.remove(&key);
                }
            }
        }
        next
    }
}

/// An immutable generation of the partitioned state table. Cloning is cheap;
/// partitions are shared between clones and between generations that did not
/// change them.
#[derive(Clone)]
pub struct StateTable<K: Key, S: Data> {
    partitioner: Arc<dyn Partitioner<K>>,
    partitions: Vec<Arc<StatePartition<K, S>>>,
    generation: u64,
    batch_time: SystemTime,
}

impl<K: Key, S: Data> Debug for StateTable<K, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTable")
            .field("partitioner", &self.partitioner.descriptor())
            .field("generation", &self.generation)
            .field("batch_time", &self.batch_time)
            .field("len", &self.len())
            .finish()
    }
}

#[derive(Encode, Decode)]
struct TableImage<K: Key, S: Data> {
    descriptor: PartitionerDescriptor,
    generation: u64,
    batch_time: SystemTime,
    partitions: Vec<Vec<StateRecord<K, S>>>,
}

impl<K: Key, S: Data> StateTable<K, S> {
    pub fn empty(partitioner: Arc<dyn Partitioner<K>>, batch_time: SystemTime) -> Self {
        TableBuilder::new(partitioner, 0, batch_time).build()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn batch_time(&self) -> SystemTime {
        self.batch_time
    }

    pub fn partitioner(&self) -> &Arc<dyn Partitioner<K>> {
        &self.partitioner
    }

    pub fn descriptor(&self) -> PartitionerDescriptor {
        self.partitioner.descriptor()
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn partitions(&self) -> &[Arc<StatePartition<K, S>>] {
        &self.partitions
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|p| p.is_empty())
    }

    pub fn get(&self, key: &K) -> Option<&StateRecord<K, S>> {
        self.partitions
            .get(self.partitioner.partition(key))?
            .get(key)
    }

    /// All records, ordered by partition and then by key.
    pub fn snapshot(&self) -> impl Iterator<Item = &StateRecord<K, S>> {
        self.partitions.iter().flat_map(|p| p.records())
    }

    pub fn check_partitioner(&self, partitioner: &dyn Partitioner<K>) -> Result<(), StateError> {
        let expected = partitioner.descriptor();
        let found = self.descriptor();
        if expected != found {
            return Err(StateError::PartitionerMismatch { expected, found });
        }
        Ok(())
    }

    /// Publishes the generation that follows this one. `partitions` must hold
    /// one entry per partition, in partition order.
    pub fn next_generation(
        &self,
        batch_time: SystemTime,
        partitions: Vec<Arc<StatePartition<K, S>>>,
    ) -> Result<Self, StateError> {
        if partitions.len() != self.partitions.len() {
            return Err(StateError::PartitionCount {
                expected: self.partitions.len(),
                found: partitions.len(),
            });
        }
        if let Some((i, p)) = partitions
            .iter()
            .enumerate()
            .find(|(i, p)| p.index() != *i)
        {
            return Err(StateError::PartitionCount {
                expected: i,
                found: p.index(),
            });
        }

        Ok(Self {
            partitioner: self.partitioner.clone(),
            partitions,
            generation: self.generation + 1,
            batch_time,
        })
    }

    /// Encodes this generation into a deterministic byte image: equal tables
    /// always produce equal bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        let image = TableImage {
            descriptor: self.descriptor(),
            generation: self.generation,
            batch_time: self.batch_time,
            partitions: self
                .partitions
                .iter()
                .map(|p| p.records().cloned().collect())
                .collect(),
        };
        bincode::encode_to_vec(image, BINCODE_CONFIG).map_err(|e| StateError::Encode(e.to_string()))
    }

    pub fn from_bytes(
        bytes: &[u8],
        partitioner: Arc<dyn Partitioner<K>>,
    ) -> Result<Self, StateError> {
        let (image, len): (TableImage<K, S>, usize) =
            bincode::decode_from_slice(bytes, BINCODE_CONFIG)
                .map_err(|e| StateError::Decode(e.to_string()))?;

        if len != bytes.len() {
            return Err(StateError::TrailingBytes(bytes.len() - len));
        }

        let expected = partitioner.descriptor();
        if image.descriptor != expected {
            return Err(StateError::PartitionerMismatch {
                expected,
                found: image.descriptor,
            });
        }
        if image.partitions.len() != partitioner.partitions() {
            return Err(StateError::PartitionCount {
                expected: partitioner.partitions(),
                found: image.partitions.len(),
            });
        }

        let mut builder = TableBuilder::new(partitioner, image.generation, image.batch_time);
        for (index, records) in image.partitions.into_iter().enumerate() {
            for record in records {
                let expected = builder.partitioner.partition(&record.key);
                if expected != index {
                    return Err(StateError::MisplacedKey {
                        key: format!("{:?}", record.key),
                        expected,
                        found: index,
                    });
                }
                builder.insert(record)?;
            }
        }

        let table = builder.build();
        debug!(
            "restored table generation {} with {} keys from {} bytes",
            table.generation,
            table.len(),
            bytes.len()
        );
        Ok(table)
    }
}

/// Assembles a table generation record by record, routing each record to its
/// partition.
pub struct TableBuilder<K: Key, S: Data> {
    partitioner: Arc<dyn Partitioner<K>>,
    partitions: Vec<StatePartition<K, S>>,
    generation: u64,
    batch_time: SystemTime,
}

impl<K: Key, S: Data> TableBuilder<K, S> {
    pub fn new(
        partitioner: Arc<dyn Partitioner<K>>,
        generation: u64,
        batch_time: SystemTime,
    ) -> Self {
        let partitions = (0..partitioner.partitions())
            .map(StatePartition::new)
            .collect();
        Self {
            partitioner,
            partitions,
            generation,
            batch_time,
        }
    }

    /// Inserts a record, returning the one it replaced if the key was already
    /// present.
    pub fn insert(
        &mut self,
        record: StateRecord<K, S>,
    ) -> Result<Option<StateRecord<K, S>>, StateError> {
        let index = self.partitioner.partition(&record.key);
        let partitions = self.partitions.len();
        let Some(partition) = self.partitions.get_mut(index) else {
            return Err(StateError::PartitionOutOfRange {
                key: format!("{:?}", record.key),
                partition: index,
                partitions,
            });
        };
        Ok(partition.insert(record))
    }

    pub fn build(self) -> StateTable<K, S> {
        StateTable {
            partitioner: self.partitioner,
            partitions: self.partitions.into_iter().map(Arc::new).collect(),
            generation: self.generation,
            batch_time: self.batch_time,
        }
    }
}
