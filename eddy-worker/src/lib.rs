//! A keyed state-tracking operator for micro-batched streams.
//!
//! Each batch, every key with input is merged with its stored state through a
//! user-supplied tracking function, and keys idle for longer than the
//! configured timeout are visited one last time before eviction. Every batch
//! produces a fresh, immutable [`eddy_state::StateTable`] generation; the
//! previous generation stays valid, so a failed batch can be retried against
//! it.

pub mod config;
pub mod driver;
pub mod error;
pub mod invoke;
pub mod merge;
pub mod metrics;
pub mod state_handle;
mod timeout;
pub mod tracking;

pub use config::{DuplicateValues, HumanReadableDuration, OperatorConfig};
pub use driver::{BatchOutput, BatchStats, KeyedStateOperator, OperatorState};
pub use error::{StateAccessError, TrackingError};
pub use state_handle::StateHandle;
pub use tracking::{TrackingConfig, TrackingConfigBuilder, TrackingFunction, ValueCollapse};
