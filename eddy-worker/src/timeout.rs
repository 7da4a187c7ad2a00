use crate::error::TrackingError;
use crate::invoke::{invoke, Visit};
use crate::merge::PartitionDelta;
use crate::tracking::TrackingFunction;
use eddy_state::StatePartition;
use eddy_types::{Data, Key};
use std::time::{Duration, SystemTime};

/// Visits every record in the partition that the merge step did not touch and
/// that has been idle for at least `timeout`. There is no time index; the scan
/// is linear in the partition's size.
pub(crate) fn scan_partition<K, V, S, E, F>(
    function: &F,
    batch_time: SystemTime,
    timeout: Duration,
    previous: &StatePartition<K, S>,
    delta: &mut PartitionDelta<K, S, E>,
) -> Result<(), TrackingError>
where
    K: Key,
    V: Data,
    S: Data,
    E: Data,
    F: TrackingFunction<K, V, S, E> + ?Sized,
{
    for record in previous.records() {
        if delta.visited.contains(&record.key) {
            continue;
        }

        let Some(visit) = Visit::classify(None, record.is_idle(batch_time, timeout)) else {
            continue;
        };

        let invoked = invoke(function, batch_time, &record.key, visit, Some(record))?;
        delta.stats.timed_out += 1;
        delta.record(batch_time, record.key.clone(), invoked);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state_handle::StateHandle;
    use eddy_state::{HashPartitioner, RecordChange, StateRecord, TableBuilder};
    use eddy_types::from_millis;
    use std::sync::Arc;

    fn partition() -> Arc<StatePartition<String, i64>> {
        let mut builder = TableBuilder::<String, i64>::new(
            Arc::new(HashPartitioner::new(1).unwrap()),
            0,
            from_millis(0),
        );
        for (key, state, at) in [("old", 1, 0), ("fresh", 2, 8_000), ("touched", 3, 0)] {
            builder
                .insert(StateRecord::new(key.to_string(), state, from_millis(at)))
                .unwrap();
        }
        builder.build().partitions()[0].clone()
    }

    #[test]
    fn test_scan_visits_only_idle_unvisited_keys() {
        let f = |_t: SystemTime,
                 k: &String,
                 v: Option<i64>,
                 s: &mut StateHandle<i64>|
         -> anyhow::Result<Option<(String, bool, Option<i64>, i64)>> {
            Ok(Some((k.clone(), s.is_timing_out(), v, *s.get()?)))
        };

        let previous = partition();
        let mut delta = PartitionDelta::new();
        delta.visited.insert("touched".to_string());

        scan_partition(
            &f,
            from_millis(12_000),
            Duration::from_secs(10),
            &previous,
            &mut delta,
        )
        .unwrap();

        assert_eq!(delta.stats.timed_out, 1);
        assert_eq!(delta.stats.removed, 1);
        assert_eq!(delta.changes, vec![RecordChange::Drop("old".to_string())]);

        let output = delta.finish(&previous);
        assert_eq!(
            output.emitted.iter().map(|r| r.value.clone()).collect::<Vec<_>>(),
            vec![("old".to_string(), true, None, 1)]
        );
        assert!(output.partition.get(&"old".to_string()).is_none());
        assert!(output.partition.get(&"fresh".to_string()).is_some());
        assert!(output.partition.get(&"touched".to_string()).is_some());
    }

    #[test]
    fn test_scan_honors_update() {
        let f = |_t: SystemTime,
                 _k: &String,
                 _v: Option<i64>,
                 s: &mut StateHandle<i64>|
         -> anyhow::Result<Option<i64>> {
            let last = *s.get()?;
            s.update(last * 100);
            Ok(None)
        };

        let previous = partition();
        let mut delta = PartitionDelta::new();
        scan_partition(
            &f,
            from_millis(10_000),
            Duration::from_secs(10),
            &previous,
            &mut delta,
        )
        .unwrap();

        let output = delta.finish(&previous);
        assert!(output.emitted.is_empty());
        let old = output.partition.get(&"old".to_string()).unwrap();
        assert_eq!(old.state, 100);
        assert_eq!(old.last_update, from_millis(0));
        assert_eq!(output.partition.get(&"fresh".to_string()).unwrap().state, 2);
    }
}
