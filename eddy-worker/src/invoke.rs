//! Runs the tracking function for a single key and turns the state handle it
//! left behind into a change to the next table generation.

use crate::error::{StateAccessError, TrackingError};
use crate::state_handle::{PendingMutation, StateHandle};
use crate::tracking::TrackingFunction;
use eddy_state::{RecordChange, StateRecord};
use eddy_types::{Data, Key};
use std::time::SystemTime;

/// Why a key is being visited in this batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Visit<V: Data> {
    /// The key received a value this batch.
    Input(V),
    /// The key received nothing and has been idle for at least the timeout.
    Timeout,
}

impl<V: Data> Visit<V> {
    /// Decides whether a key is visited, given its value for the batch (if
    /// any) and whether it is past its idle timeout. A key with input is never
    /// timing out; a key with neither is left alone.
    pub fn classify(value: Option<V>, idle: bool) -> Option<Visit<V>> {
        match (value, idle) {
            (Some(value), false) => Some(Visit::Input(value)),
            (Some(value), true) => Some(Visit::Input(value)),
            (None, true) => Some(Visit::Timeout),
            (None, false) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Visit::Timeout)
    }
}

/// The result of one invocation: the change to the key's record, if any, and
/// the function's emission.
#[derive(Debug, PartialEq)]
pub struct Invoked<K: Key, S: Data, E: Data> {
    pub change: Option<RecordChange<K, S>>,
    pub emitted: Option<E>,
}

pub fn invoke<K, V, S, E, F>(
    function: &F,
    batch_time: SystemTime,
    key: &K,
    visit: Visit<V>,
    prior: Option<&StateRecord<K, S>>,
) -> Result<Invoked<K, S, E>, TrackingError>
where
    K: Key,
    V: Data,
    S: Data,
    E: Data,
    F: TrackingFunction<K, V, S, E> + ?Sized,
{
    let timing_out = visit.is_timeout();
    let mut handle = StateHandle::new(prior.map(|r| r.state.clone()), timing_out);

    let value = match visit {
        Visit::Input(value) => Some(value),
        Visit::Timeout => None,
    };

    let emitted = function
        .track(batch_time, key, value, &mut handle)
        .map_err(|source| {
            if source.downcast_ref::<StateAccessError>().is_some() {
                TrackingError::StateConsistency {
                    key: format!("{:?}", key),
                }
            } else {
                TrackingError::Invocation {
                    key: format!("{:?}", key),
                    source: source.into(),
                }
            }
        })?;

    Ok(Invoked {
        change: reconcile(key, prior, handle, timing_out, batch_time),
        emitted,
    })
}

/// Folds the handle's final pending mutation into the key's next record.
///
/// Input visits refresh the record's last update time; timeout visits keep the
/// old one. A timeout visit that does not update the state evicts the key.
fn reconcile<K: Key, S: Data>(
    key: &K,
    prior: Option<&StateRecord<K, S>>,
    handle: StateHandle<S>,
    timing_out: bool,
    batch_time: SystemTime,
) -> Option<RecordChange<K, S>> {
    let last_update = match (timing_out, prior) {
        (true, Some(prior)) => prior.last_update,
        _ => batch_time,
    };

    let (prior_state, pending) = handle.into_parts();
    match pending {
        PendingMutation::Update(state) => Some(RecordChange::Put(StateRecord::new(
            key.clone(),
            state,
            last_update,
        ))),
        PendingMutation::Remove => prior.map(|_| RecordChange::Drop(key.clone())),
        PendingMutation::Unchanged if timing_out => prior.map(|_| RecordChange::Drop(key.clone())),
        PendingMutation::Unchanged => prior_state
            .map(|state| RecordChange::Put(StateRecord::new(key.clone(), state, last_update))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::bail;
    use eddy_types::from_millis;
    use test_case::test_case;

    #[derive(Debug, Clone, Copy)]
    enum Action {
        Nothing,
        Update(i64),
        Remove,
    }

    fn run(
        action: Action,
        visit: Visit<i64>,
        prior: Option<i64>,
    ) -> Invoked<String, i64, (bool, Option<i64>)> {
        let f = move |_t: SystemTime,
                      _k: &String,
                      value: Option<i64>,
                      state: &mut StateHandle<i64>|
              -> anyhow::Result<Option<(bool, Option<i64>)>> {
            match action {
                Action::Nothing => {}
                Action::Update(v) => state.update(v),
                Action::Remove => state.remove(),
            }
            Ok(Some((state.is_timing_out(), value)))
        };
        let prior = prior.map(|s| StateRecord::new("k".to_string(), s, from_millis(1_000)));
        invoke(&f, from_millis(5_000), &"k".to_string(), visit, prior.as_ref()).unwrap()
    }

    #[test_case(Some(1), false, Some(Visit::Input(1)); "value, not idle")]
    #[test_case(Some(1), true, Some(Visit::Input(1)); "value, idle")]
    #[test_case(None, true, Some(Visit::Timeout); "no value, idle")]
    #[test_case(None, false, None; "no value, not idle")]
    fn test_classify(value: Option<i64>, idle: bool, expected: Option<Visit<i64>>) {
        assert_eq!(Visit::classify(value, idle), expected);
    }

    #[test]
    fn test_function_sees_value_and_flag() {
        let out = run(Action::Nothing, Visit::Input(7), None);
        assert_eq!(out.emitted, Some((false, Some(7))));

        let out = run(Action::Nothing, Visit::Timeout, Some(1));
        assert_eq!(out.emitted, Some((true, None)));
    }

    #[test_case(Action::Nothing, None, None; "no state, nothing")]
    #[test_case(Action::Update(5), None, Some(5); "no state, update")]
    #[test_case(Action::Remove, None, None; "no state, remove")]
    #[test_case(Action::Nothing, Some(1), Some(1); "state, nothing")]
    #[test_case(Action::Update(5), Some(1), Some(5); "state, update")]
    fn test_input_visit(action: Action, prior: Option<i64>, expected: Option<i64>) {
        let out = run(action, Visit::Input(3), prior);
        match expected {
            Some(state) => assert_eq!(
                out.change,
                Some(RecordChange::Put(StateRecord::new(
                    "k".to_string(),
                    state,
                    from_millis(5_000)
                )))
            ),
            None => assert_eq!(out.change, None),
        }
    }

    #[test]
    fn test_input_visit_remove() {
        let out = run(Action::Remove, Visit::Input(3), Some(1));
        assert_eq!(out.change, Some(RecordChange::Drop("k".to_string())));
    }

    #[test]
    fn test_timeout_visit_evicts_by_default() {
        let out = run(Action::Nothing, Visit::Timeout, Some(1));
        assert_eq!(out.change, Some(RecordChange::Drop("k".to_string())));

        let out = run(Action::Remove, Visit::Timeout, Some(1));
        assert_eq!(out.change, Some(RecordChange::Drop("k".to_string())));
    }

    #[test]
    fn test_timeout_visit_update_keeps_last_update() {
        let out = run(Action::Update(9), Visit::Timeout, Some(1));
        assert_eq!(
            out.change,
            Some(RecordChange::Put(StateRecord::new(
                "k".to_string(),
                9,
                from_millis(1_000)
            )))
        );
    }

    #[test]
    fn test_errors() {
        let failing = |_t: SystemTime,
                       _k: &String,
                       _v: Option<i64>,
                       _s: &mut StateHandle<i64>|
         -> anyhow::Result<Option<i64>> { bail!("boom") };
        let err = invoke::<String, i64, i64, i64, _>(
            &failing,
            from_millis(0),
            &"k".to_string(),
            Visit::Input(1),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TrackingError::Invocation { .. }));
        assert!(err.to_string().contains("boom"));

        let reads_absent = |_t: SystemTime,
                            _k: &String,
                            _v: Option<i64>,
                            s: &mut StateHandle<i64>|
         -> anyhow::Result<Option<i64>> { Ok(Some(*s.get()?)) };
        let err = invoke::<String, i64, i64, i64, _>(
            &reads_absent,
            from_millis(0),
            &"k".to_string(),
            Visit::Input(1),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TrackingError::StateConsistency { .. }));
    }
}
