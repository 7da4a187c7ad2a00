use crate::driver::BatchStats;
use crate::error::TrackingError;
use crate::invoke::{invoke, Invoked, Visit};
use crate::tracking::{TrackingFunction, ValueCollapse};
use eddy_state::{Partitioner, RecordChange, StatePartition};
use eddy_types::{Data, Key, Record};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Splits a batch's input by the operator's partitioner, collapsing repeated
/// keys according to `duplicates`. The result holds one map per partition, in
/// partition order.
pub fn co_partition<K: Key, V: Data>(
    partitioner: &dyn Partitioner<K>,
    incoming: impl IntoIterator<Item = (K, V)>,
    duplicates: &ValueCollapse<V>,
) -> Result<Vec<BTreeMap<K, V>>, TrackingError> {
    let mut partitions: Vec<BTreeMap<K, V>> = (0..partitioner.partitions())
        .map(|_| BTreeMap::new())
        .collect();

    for (key, value) in incoming {
        let index = partitioner.partition(&key);
        let partition = partitions.get_mut(index).ok_or_else(|| {
            TrackingError::config(format!(
                "partitioner {} routed key {:?} to nonexistent partition {}",
                partitioner.descriptor(),
                key,
                index
            ))
        })?;

        let Some(existing) = partition.get_mut(&key) else {
            partition.insert(key, value);
            continue;
        };

        match duplicates {
            ValueCollapse::Reject => {
                return Err(TrackingError::DuplicateValue {
                    key: format!("{:?}", key),
                });
            }
            ValueCollapse::KeepFirst => {}
            ValueCollapse::KeepLast => *existing = value,
            ValueCollapse::Combine(combine) => *existing = combine(existing.clone(), value),
        }
    }

    Ok(partitions)
}

/// What one partition produced for a batch, accumulated across the merge step
/// and the timeout scan.
#[derive(Debug)]
pub(crate) struct PartitionDelta<K: Key, S: Data, E: Data> {
    pub visited: BTreeSet<K>,
    pub changes: Vec<RecordChange<K, S>>,
    pub emitted: Vec<Record<K, E>>,
    pub stats: BatchStats,
}

pub(crate) struct PartitionOutput<K: Key, S: Data, E: Data> {
    pub partition: Arc<StatePartition<K, S>>,
    pub emitted: Vec<Record<K, E>>,
    pub stats: BatchStats,
}

impl<K: Key, S: Data, E: Data> PartitionDelta<K, S, E> {
    pub fn new() -> Self {
        Self {
            visited: BTreeSet::new(),
            changes: vec![],
            emitted: vec![],
            stats: BatchStats::default(),
        }
    }

    pub fn record(&mut self, batch_time: SystemTime, key: K, invoked: Invoked<K, S, E>) {
        match &invoked.change {
            Some(RecordChange::Put(_)) => self.stats.updated += 1,
            Some(RecordChange::Drop(_)) => self.stats.removed += 1,
            None => {}
        }
        self.changes.extend(invoked.change);

        if let Some(value) = invoked.emitted {
            self.stats.emitted += 1;
            self.emitted.push(Record {
                timestamp: batch_time,
                key,
                value,
            });
        }
    }

    /// Applies the accumulated changes to `previous`. A partition with no
    /// changes is shared with the previous generation as is.
    pub fn finish(self, previous: &Arc<StatePartition<K, S>>) -> PartitionOutput<K, S, E> {
        let partition = if self.changes.is_empty() {
            previous.clone()
        } else {
            Arc::new(previous.apply(self.changes))
        };

        PartitionOutput {
            partition,
            emitted: self.emitted,
            stats: self.stats,
        }
    }
}

/// Invokes the tracking function once for every key with input in this
/// partition. Keys that only have stored state are left to the timeout scan;
/// an idle key that receives input is visited for its input, not as timing
/// out.
pub(crate) fn merge_partition<K, V, S, E, F>(
    function: &F,
    batch_time: SystemTime,
    timeout: Option<Duration>,
    previous: &StatePartition<K, S>,
    incoming: BTreeMap<K, V>,
    delta: &mut PartitionDelta<K, S, E>,
) -> Result<(), TrackingError>
where
    K: Key,
    V: Data,
    S: Data,
    E: Data,
    F: TrackingFunction<K, V, S, E> + ?Sized,
{
    for (key, value) in incoming {
        let prior = previous.get(&key);
        let idle = prior
            .zip(timeout)
            .is_some_and(|(record, timeout)| record.is_idle(batch_time, timeout));

        let Some(visit) = Visit::classify(Some(value), idle) else {
            continue;
        };

        let invoked = invoke(function, batch_time, &key, visit, prior)?;
        delta.stats.invoked += 1;
        delta.visited.insert(key.clone());
        delta.record(batch_time, key, invoked);
    }

    Ok(())
}
