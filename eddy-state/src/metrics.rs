use crate::table::StateTable;
use eddy_types::{Data, Key, OperatorInfo};
use lazy_static::lazy_static;
use prometheus::{register_int_gauge_vec, IntGaugeVec};

lazy_static! {
    pub static ref TABLE_LABELS_NAMES: Vec<&'static str> = vec!["operator_id", "partition"];
    pub static ref TABLE_SIZE_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        "eddy_state_table_size_keys",
        "Number of keys in the state table",
        &TABLE_LABELS_NAMES
    )
    .unwrap();
}

pub fn record_table_size<K: Key, S: Data>(info: &OperatorInfo, table: &StateTable<K, S>) {
    for partition in table.partitions() {
        let index = partition.index().to_string();
        TABLE_SIZE_GAUGE
            .with_label_values(&[info.operator_id.as_str(), index.as_str()])
            .set(partition.len() as i64);
    }
}
