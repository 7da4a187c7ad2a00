use crate::error::TrackingError;
use crate::merge::{co_partition, merge_partition, PartitionDelta, PartitionOutput};
use crate::metrics;
use crate::timeout::scan_partition;
use crate::tracking::{TrackingConfig, TrackingFunction};
use eddy_state::metrics::record_table_size;
use eddy_state::{StatePartition, StateRecord, StateTable, TableBuilder};
use eddy_types::{print_time, Data, Key, OperatorInfo, Record};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Uninitialized,
    /// The operator has published (or resumed from) table generation
    /// `generation`, produced for `batch_time`.
    Active {
        generation: u64,
        batch_time: SystemTime,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Keys invoked because they received input
    pub invoked: usize,
    /// Keys invoked because they were idle past the timeout
    pub timed_out: usize,
    pub updated: usize,
    pub removed: usize,
    pub emitted: usize,
}

impl BatchStats {
    fn add(&mut self, other: &BatchStats) {
        self.invoked += other.invoked;
        self.timed_out += other.timed_out;
        self.updated += other.updated;
        self.removed += other.removed;
        self.emitted += other.emitted;
    }
}

/// Everything a batch hands back to the surrounding system.
#[derive(Debug)]
pub struct BatchOutput<K: Key, S: Data, E: Data> {
    /// The new table generation; the input state for the next batch
    pub table: StateTable<K, S>,
    /// Emitted records, ordered by partition, then merge visits by key, then
    /// timeout visits by key
    pub emitted: Vec<Record<K, E>>,
    pub stats: BatchStats,
}

pub struct KeyedStateOperator<K: Key, V: Data, S: Data, E: Data> {
    info: OperatorInfo,
    config: TrackingConfig<K, V, S, E>,
    state: OperatorState,
}

impl<K: Key, V: Data, S: Data, E: Data> KeyedStateOperator<K, V, S, E> {
    pub fn new(info: OperatorInfo, config: TrackingConfig<K, V, S, E>) -> Self {
        Self {
            info,
            config,
            state: OperatorState::Uninitialized,
        }
    }

    pub fn info(&self) -> &OperatorInfo {
        &self.info
    }

    pub fn config(&self) -> &TrackingConfig<K, V, S, E> {
        &self.config
    }

    pub fn state(&self) -> OperatorState {
        self.state
    }

    /// Builds the first table generation from the configured initial state,
    /// stamping every entry with `start_time`. The tracking function is not
    /// invoked and nothing is emitted. If the initial state repeats a key, the
    /// last entry wins.
    pub fn seed(&mut self, start_time: SystemTime) -> Result<StateTable<K, S>, TrackingError> {
        if let OperatorState::Active { generation, .. } = self.state {
            return Err(TrackingError::config(format!(
                "operator {} is already active at generation {}",
                self.info.operator_id, generation
            )));
        }

        let mut builder = TableBuilder::new(self.config.partitioner().clone(), 0, start_time);
        let mut replaced = 0;
        for (key, state) in self.config.initial_state().unwrap_or_default() {
            if builder
                .insert(StateRecord::new(key.clone(), state.clone(), start_time))
                .map_err(|e| TrackingError::Configuration(e.to_string()))?
                .is_some()
            {
                replaced += 1;
            }
        }

        if replaced > 0 {
            warn!(
                "initial state for operator {} repeated {} keys; kept the last value for each",
                self.info.operator_id, replaced
            );
        }

        let table = builder.build();
        self.state = OperatorState::Active {
            generation: table.generation(),
            batch_time: start_time,
        };
        record_table_size(&self.info, &table);

        info!(
            "seeded operator {} ({}) with {} keys across {} partitions at {}",
            self.info.operator_id,
            self.info.operator_name,
            table.len(),
            table.num_partitions(),
            print_time(start_time)
        );

        Ok(table)
    }

    /// Activates the operator from a previously published generation, e.g.
    /// one restored with [`StateTable::from_bytes`], instead of seeding.
    pub fn resume(&mut self, table: &StateTable<K, S>) -> Result<(), TrackingError> {
        self.check_partitioner(table)?;
        self.state = OperatorState::Active {
            generation: table.generation(),
            batch_time: table.batch_time(),
        };
        record_table_size(&self.info, table);

        info!(
            "resumed operator {} at generation {} ({} keys)",
            self.info.operator_id,
            table.generation(),
            table.len()
        );
        Ok(())
    }

    fn check_partitioner(&self, table: &StateTable<K, S>) -> Result<(), TrackingError> {
        table
            .check_partitioner(self.config.partitioner().as_ref())
            .map_err(|e| TrackingError::Configuration(e.to_string()))
    }

    /// Runs one batch against `previous`: the merge step for every key with
    /// input, then the timeout scan. Partitions are processed concurrently.
    ///
    /// Either the whole batch succeeds and a new generation is returned, or an
    /// error is returned and `previous` remains the table to retry against.
    pub async fn process_batch(
        &mut self,
        batch_time: SystemTime,
        previous: &StateTable<K, S>,
        incoming: impl IntoIterator<Item = (K, V)>,
    ) -> Result<BatchOutput<K, S, E>, TrackingError> {
        let OperatorState::Active {
            generation: committed,
            batch_time: committed_time,
        } = self.state
        else {
            return Err(TrackingError::config(format!(
                "operator {} must be seeded or resumed before processing batches",
                self.info.operator_id
            )));
        };

        self.check_partitioner(previous)?;

        if batch_time < previous.batch_time() {
            return Err(TrackingError::OutOfOrderBatch {
                batch: batch_time,
                previous: previous.batch_time(),
            });
        }

        if previous.generation() < committed {
            warn!(
                "operator {} is replaying batch {} against generation {}; latest is {}",
                self.info.operator_id,
                print_time(batch_time),
                previous.generation(),
                committed
            );
        }

        let incoming = co_partition(
            self.config.partitioner().as_ref(),
            incoming,
            self.config.duplicates(),
        )?;

        let timeout = self.config.idle_timeout();
        let tasks = previous
            .partitions()
            .iter()
            .cloned()
            .zip(incoming)
            .map(|(partition, incoming)| {
                let function = self.config.function().clone();
                tokio::task::spawn_blocking(move || {
                    run_partition(function.as_ref(), batch_time, timeout, partition, incoming)
                })
            });

        let results = try_join_all(tasks)
            .await
            .map_err(|e| TrackingError::TaskFailed(e.to_string()))?;

        let mut partitions = Vec::with_capacity(results.len());
        let mut emitted = vec![];
        let mut stats = BatchStats::default();
        for result in results {
            let output = result?;
            partitions.push(output.partition);
            emitted.extend(output.emitted);
            stats.add(&output.stats);
        }

        let table = previous.next_generation(batch_time, partitions)?;

        self.state = OperatorState::Active {
            generation: committed.max(table.generation()),
            batch_time: committed_time.max(batch_time),
        };
        record_table_size(&self.info, &table);
        metrics::record_batch(&self.info, &stats);

        info!(
            "operator {} committed generation {} for batch {}: {} keys, {} invoked, {} timed out, {} updated, {} removed, {} emitted",
            self.info.operator_id,
            table.generation(),
            print_time(batch_time),
            table.len(),
            stats.invoked,
            stats.timed_out,
            stats.updated,
            stats.removed,
            stats.emitted
        );

        Ok(BatchOutput {
            table,
            emitted,
            stats,
        })
    }
}

fn run_partition<K, V, S, E>(
    function: &dyn TrackingFunction<K, V, S, E>,
    batch_time: SystemTime,
    timeout: Option<Duration>,
    previous: Arc<StatePartition<K, S>>,
    incoming: BTreeMap<K, V>,
) -> Result<PartitionOutput<K, S, E>, TrackingError>
where
    K: Key,
    V: Data,
    S: Data,
    E: Data,
{
    let mut delta = PartitionDelta::new();

    merge_partition(function, batch_time, timeout, &previous, incoming, &mut delta)?;

    if let Some(timeout) = timeout {
        scan_partition(function, batch_time, timeout, &previous, &mut delta)?;
    }

    debug!(
        "partition {}: {} invoked, {} timed out, {} changes",
        previous.index(),
        delta.stats.invoked,
        delta.stats.timed_out,
        delta.changes.len()
    );

    Ok(delta.finish(&previous))
}
