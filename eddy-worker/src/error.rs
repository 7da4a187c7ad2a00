use eddy_state::StateError;
use std::time::SystemTime;
use thiserror::Error;

/// Returned by [`crate::StateHandle::get`] when no state is present. Tracking
/// functions propagate it with `?`; the operator reports it as
/// [`TrackingError::StateConsistency`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("state does not exist; check exists() before calling get()")]
pub struct StateAccessError;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("tracking function failed for key {key}: {source}")]
    Invocation {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("tracking function read absent state for key {key}")]
    StateConsistency { key: String },

    #[error("key {key} received more than one value in a single batch")]
    DuplicateValue { key: String },

    #[error("batch time {batch:?} precedes the input table's batch time {previous:?}")]
    OutOfOrderBatch {
        batch: SystemTime,
        previous: SystemTime,
    },

    #[error("partition task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl TrackingError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        TrackingError::Configuration(message.into())
    }
}
