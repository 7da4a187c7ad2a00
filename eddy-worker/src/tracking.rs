use crate::config::{DuplicateValues, OperatorConfig};
use crate::error::TrackingError;
use crate::state_handle::StateHandle;
use eddy_state::{HashPartitioner, Partitioner};
use eddy_types::{Data, Key};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// The user function invoked once per visited key per batch. It receives the
/// batch time, the key, the key's value for this batch (absent for timeout
/// visits) and a handle to the key's state, and returns an optional record to
/// emit downstream.
///
/// Implementations must be deterministic functions of their inputs for batch
/// replays to be idempotent.
pub trait TrackingFunction<K: Key, V: Data, S: Data, E: Data>: Send + Sync + 'static {
    fn track(
        &self,
        batch_time: SystemTime,
        key: &K,
        value: Option<V>,
        state: &mut StateHandle<S>,
    ) -> anyhow::Result<Option<E>>;
}

impl<K, V, S, E, F> TrackingFunction<K, V, S, E> for F
where
    K: Key,
    V: Data,
    S: Data,
    E: Data,
    F: Fn(SystemTime, &K, Option<V>, &mut StateHandle<S>) -> anyhow::Result<Option<E>>
        + Send
        + Sync
        + 'static,
{
    fn track(
        &self,
        batch_time: SystemTime,
        key: &K,
        value: Option<V>,
        state: &mut StateHandle<S>,
    ) -> anyhow::Result<Option<E>> {
        (self)(batch_time, key, value, state)
    }
}

pub type Combiner<V> = Arc<dyn Fn(V, V) -> V + Send + Sync>;

/// How several values for one key in one batch are collapsed into the single
/// optional value the tracking function sees.
#[derive(Clone)]
pub enum ValueCollapse<V> {
    Reject,
    KeepFirst,
    KeepLast,
    /// Folds values left to right, in arrival order
    Combine(Combiner<V>),
}

impl<V> Debug for ValueCollapse<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueCollapse::Reject => write!(f, "Reject"),
            ValueCollapse::KeepFirst => write!(f, "KeepFirst"),
            ValueCollapse::KeepLast => write!(f, "KeepLast"),
            ValueCollapse::Combine(_) => write!(f, "Combine"),
        }
    }
}

impl<V> From<DuplicateValues> for ValueCollapse<V> {
    fn from(value: DuplicateValues) -> Self {
        match value {
            DuplicateValues::Reject => ValueCollapse::Reject,
            DuplicateValues::KeepFirst => ValueCollapse::KeepFirst,
            DuplicateValues::KeepLast => ValueCollapse::KeepLast,
        }
    }
}

/// Resolved configuration for a keyed state operator.
pub struct TrackingConfig<K: Key, V: Data, S: Data, E: Data> {
    function: Arc<dyn TrackingFunction<K, V, S, E>>,
    partitioner: Arc<dyn Partitioner<K>>,
    initial_state: Option<Vec<(K, S)>>,
    idle_timeout: Option<Duration>,
    duplicates: ValueCollapse<V>,
}

impl<K: Key, V: Data, S: Data, E: Data> TrackingConfig<K, V, S, E> {
    pub fn builder() -> TrackingConfigBuilder<K, V, S, E> {
        TrackingConfigBuilder::default()
    }

    pub fn function(&self) -> &Arc<dyn TrackingFunction<K, V, S, E>> {
        &self.function
    }

    pub fn partitioner(&self) -> &Arc<dyn Partitioner<K>> {
        &self.partitioner
    }

    pub fn initial_state(&self) -> Option<&[(K, S)]> {
        self.initial_state.as_deref()
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn duplicates(&self) -> &ValueCollapse<V> {
        &self.duplicates
    }
}

impl<K: Key, V: Data, S: Data, E: Data> Debug for TrackingConfig<K, V, S, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingConfig")
            .field("partitioner", &self.partitioner.descriptor())
            .field(
                "initial_state",
                &self.initial_state.as_ref().map(|s| s.len()),
            )
            .field("idle_timeout", &self.idle_timeout)
            .field("duplicates", &self.duplicates)
            .finish()
    }
}

pub struct TrackingConfigBuilder<K: Key, V: Data, S: Data, E: Data> {
    function: Option<Arc<dyn TrackingFunction<K, V, S, E>>>,
    partitioner: Option<Arc<dyn Partitioner<K>>>,
    initial_state: Option<Vec<(K, S)>>,
    idle_timeout: Option<Duration>,
    duplicates: ValueCollapse<V>,
}

impl<K: Key, V: Data, S: Data, E: Data> Default for TrackingConfigBuilder<K, V, S, E> {
    fn default() -> Self {
        Self {
            function: None,
            partitioner: None,
            initial_state: None,
            idle_timeout: None,
            duplicates: ValueCollapse::Reject,
        }
    }
}

impl<K: Key, V: Data, S: Data, E: Data> TrackingConfigBuilder<K, V, S, E> {
    /// Starts from loaded settings: a hash partitioner with the configured
    /// partition count, the idle timeout and the duplicate-value policy.
    pub fn from_config(config: &OperatorConfig) -> Result<Self, TrackingError> {
        let partitioner = HashPartitioner::new(config.partitions).map_err(|_| {
            TrackingError::config("operator must be configured with at least one partition")
        })?;

        Ok(Self {
            partitioner: Some(Arc::new(partitioner)),
            idle_timeout: config.idle_timeout.as_deref().copied(),
            duplicates: config.duplicate_values.into(),
            ..Default::default()
        })
    }

    pub fn function<F>(mut self, function: F) -> Self
    where
        F: Fn(SystemTime, &K, Option<V>, &mut StateHandle<S>) -> anyhow::Result<Option<E>>
            + Send
            + Sync
            + 'static,
    {
        self.function = Some(Arc::new(function));
        self
    }

    pub fn tracker(mut self, function: Arc<dyn TrackingFunction<K, V, S, E>>) -> Self {
        self.function = Some(function);
        self
    }

    pub fn partitioner(mut self, partitioner: impl Partitioner<K>) -> Self {
        self.partitioner = Some(Arc::new(partitioner));
        self
    }

    pub fn initial_state(mut self, state: impl IntoIterator<Item = (K, S)>) -> Self {
        self.initial_state = Some(state.into_iter().collect());
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn duplicates(mut self, duplicates: ValueCollapse<V>) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn combine_with(self, f: impl Fn(V, V) -> V + Send + Sync + 'static) -> Self {
        self.duplicates(ValueCollapse::Combine(Arc::new(f)))
    }

    pub fn build(self) -> Result<TrackingConfig<K, V, S, E>, TrackingError> {
        let function = self
            .function
            .ok_or_else(|| TrackingError::config("a tracking function is required"))?;

        let partitioner = self
            .partitioner
            .ok_or_else(|| TrackingError::config("a partitioner is required"))?;

        if partitioner.partitions() == 0 {
            return Err(TrackingError::config(format!(
                "partitioner {} has no partitions",
                partitioner.descriptor()
            )));
        }

        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(TrackingError::config("idle timeout must be positive"));
        }

        Ok(TrackingConfig {
            function,
            partitioner,
            initial_state: self.initial_state,
            idle_timeout: self.idle_timeout,
            duplicates: self.duplicates,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::HumanReadableDuration;

    fn counter() -> TrackingConfigBuilder<String, i64, i64, i64> {
        TrackingConfig::builder().function(
            |_t: SystemTime, _k: &String, v: Option<i64>, state: &mut StateHandle<i64>| {
                let sum = state.get_option().copied().unwrap_or(0) + v.unwrap_or(0);
                state.update(sum);
                Ok(Some(sum))
            },
        )
    }

    #[test]
    fn test_missing_function() {
        let err = TrackingConfig::<String, i64, i64, i64>::builder()
            .partitioner(HashPartitioner::new(2).unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, TrackingError::Configuration(_)));
    }

    #[test]
    fn test_missing_partitioner() {
        let err = counter().build().unwrap_err();
        assert!(matches!(err, TrackingError::Configuration(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = counter()
            .partitioner(HashPartitioner::new(2).unwrap())
            .idle_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, TrackingError::Configuration(_)));
    }

    #[test]
    fn test_from_operator_config() {
        let operator_config = OperatorConfig {
            operator_name: "sessions".to_string(),
            partitions: 3,
            idle_timeout: Some(HumanReadableDuration::from(Duration::from_secs(30))),
            duplicate_values: DuplicateValues::KeepLast,
        };

        let config = TrackingConfigBuilder::from_config(&operator_config)
            .unwrap()
            .function(
                |_t: SystemTime, _k: &String, _v: Option<i64>, _s: &mut StateHandle<i64>| {
                    Ok(None::<i64>)
                },
            )
            .build()
            .unwrap();

        assert_eq!(config.partitioner().partitions(), 3);
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(30)));
        assert!(matches!(config.duplicates(), ValueCollapse::KeepLast));
        assert!(config.initial_state().is_none());
    }

    #[test]
    fn test_from_operator_config_without_partitions() {
        let operator_config = OperatorConfig {
            operator_name: "sessions".to_string(),
            partitions: 0,
            idle_timeout: None,
            duplicate_values: DuplicateValues::Reject,
        };
        let result = TrackingConfigBuilder::<String, i64, i64, i64>::from_config(&operator_config);
        assert!(matches!(result, Err(TrackingError::Configuration(_))));
    }
}
