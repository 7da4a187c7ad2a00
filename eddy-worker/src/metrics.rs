use crate::driver::BatchStats;
use eddy_types::OperatorInfo;
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, IntCounterVec};

lazy_static! {
    pub static ref INVOCATIONS_COUNTER: IntCounterVec = register_int_counter_vec!(
        "eddy_tracking_invocations",
        "Number of tracking function invocations, by trigger",
        &["operator_id", "trigger"]
    )
    .unwrap();
    pub static ref EMITTED_COUNTER: IntCounterVec = register_int_counter_vec!(
        "eddy_tracking_emitted",
        "Number of records emitted by the tracking function",
        &["operator_id"]
    )
    .unwrap();
    pub static ref REMOVED_COUNTER: IntCounterVec = register_int_counter_vec!(
        "eddy_tracking_removed",
        "Number of keys removed from the state table, explicitly or by timeout",
        &["operator_id"]
    )
    .unwrap();
}

pub fn record_batch(info: &OperatorInfo, stats: &BatchStats) {
    let id = info.operator_id.as_str();
    INVOCATIONS_COUNTER
        .with_label_values(&[id, "input"])
        .inc_by(stats.invoked as u64);
    INVOCATIONS_COUNTER
        .with_label_values(&[id, "timeout"])
        .inc_by(stats.timed_out as u64);
    EMITTED_COUNTER
        .with_label_values(&[id])
        .inc_by(stats.emitted as u64);
    REMOVED_COUNTER
        .with_label_values(&[id])
        .inc_by(stats.removed as u64);
}
