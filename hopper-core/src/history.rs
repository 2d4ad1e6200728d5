//! Delivery-history (`x-death`) decoding.
//!
//! RabbitMQ appends an `x-death` record, with an incrementing `count`, each
//! time a message is dead-lettered out of a queue. The cumulative retry count
//! of a message is the sum of those counts. The broker owns this metadata;
//! corrupt records are never an error here, they just contribute zero.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The header key RabbitMQ stores delivery history under.
pub const DEATH_HEADER: &str = "x-death";

/// One decoded `x-death` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    #[serde(default)]
    pub queue: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub count: u64,
}

/// Sum of failure counts across all records.
pub fn total_retry_count(records: &[DeliveryRecord]) -> u64 {
    records.iter().map(|r| r.count).sum()
}

/// Decode `x-death` out of a management-API headers object.
///
/// Absent key, non-array value, or malformed entries all degrade to zero
/// contributions rather than errors.
pub fn records_from_json(headers: &Value) -> Vec<DeliveryRecord> {
    let Some(deaths) = headers.get(DEATH_HEADER).and_then(Value::as_array) else {
        return Vec::new();
    };

    deaths
        .iter()
        .map(|entry| {
            serde_json::from_value::<DeliveryRecord>(entry.clone()).unwrap_or_default()
        })
        .collect()
}

/// Convenience: cumulative retry count straight from a headers object.
pub fn retry_count_from_json(headers: &Value) -> u64 {
    total_retry_count(&records_from_json(headers))
}
