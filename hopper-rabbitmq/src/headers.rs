//! `x-death` decoding and header surgery on lapin types.
//!
//! Mirror of `hopper_core::history` for messages fetched over AMQP instead of
//! the management API. Malformed entries never fail the caller; they decode
//! to a zero count.

use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::BasicProperties;

use hopper_core::history::{total_retry_count, DeliveryRecord, DEATH_HEADER};

/// Decode the delivery history out of an AMQP header table.
pub fn records_from_table(headers: &FieldTable) -> Vec<DeliveryRecord> {
    let Some(AMQPValue::FieldArray(deaths)) = headers.inner().get(&ShortString::from(DEATH_HEADER)) else {
        return Vec::new();
    };

    deaths
        .as_slice()
        .iter()
        .map(|entry| match entry {
            AMQPValue::FieldTable(record) => DeliveryRecord {
                queue: table_str(record, "queue"),
                exchange: table_str(record, "exchange"),
                reason: table_str(record, "reason"),
                count: table_count(record, "count"),
            },
            _ => DeliveryRecord::default(),
        })
        .collect()
}

/// Cumulative failure count for a delivered message; 0 when the message
/// carries no headers or no history.
pub fn retry_count(properties: &BasicProperties) -> u64 {
    properties
        .headers()
        .as_ref()
        .map(|headers| total_retry_count(&records_from_table(headers)))
        .unwrap_or(0)
}

/// Copy a header table with the delivery-history key removed.
///
/// Dropping `x-death` is what resets a message's retry budget on
/// reprocessing; every other header survives untouched.
pub fn strip_delivery_history(headers: &FieldTable) -> FieldTable {
    let mut stripped = FieldTable::default();
    for (key, value) in headers.inner() {
        if key.as_str() != DEATH_HEADER {
            stripped.insert(key.clone(), value.clone());
        }
    }
    stripped
}

fn table_str(record: &FieldTable, key: &str) -> String {
    match record.inner().get(&ShortString::from(key)) {
        Some(AMQPValue::LongString(s)) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        Some(AMQPValue::ShortString(s)) => s.as_str().to_string(),
        _ => String::new(),
    }
}

fn table_count(record: &FieldTable, key: &str) -> u64 {
    let value = match record.inner().get(&ShortString::from(key)) {
        Some(AMQPValue::LongLongInt(n)) => *n,
        Some(AMQPValue::LongInt(n)) => i64::from(*n),
        Some(AMQPValue::ShortInt(n)) => i64::from(*n),
        Some(AMQPValue::LongUInt(n)) => i64::from(*n),
        _ => 0,
    };
    value.try_into().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::FieldArray;

    fn death_entry(queue: &str, reason: &str, count: i64) -> AMQPValue {
        let mut record = FieldTable::default();
        record.insert("queue".into(), AMQPValue::LongString(queue.into()));
        record.insert("reason".into(), AMQPValue::LongString(reason.into()));
        record.insert("count".into(), AMQPValue::LongLongInt(count));
        AMQPValue::FieldTable(record)
    }

    fn headers_with_deaths(entries: Vec<AMQPValue>) -> FieldTable {
        let mut deaths = FieldArray::default();
        for entry in entries {
            deaths.push(entry);
        }
        let mut headers = FieldTable::default();
        headers.insert(ShortString::from(DEATH_HEADER), AMQPValue::FieldArray(deaths));
        headers
    }

    #[test]
    fn sums_counts_from_field_table() {
        let headers = headers_with_deaths(vec![
            death_entry("orders", "rejected", 2),
            death_entry("orders.wait", "expired", 1),
        ]);
        let records = records_from_table(&headers);
        assert_eq!(total_retry_count(&records), 3);
        assert_eq!(records[1].reason, "expired");
    }

    #[test]
    fn missing_headers_decode_to_zero() {
        assert_eq!(retry_count(&BasicProperties::default()), 0);

        let empty = BasicProperties::default().with_headers(FieldTable::default());
        assert_eq!(retry_count(&empty), 0);
    }

    #[test]
    fn malformed_entries_count_zero() {
        let headers = headers_with_deaths(vec![
            death_entry("orders", "rejected", 2),
            AMQPValue::LongString("garbage".into()),
            death_entry("orders", "rejected", -4),
        ]);
        let props = BasicProperties::default().with_headers(headers);
        assert_eq!(retry_count(&props), 2);
    }

    #[test]
    fn strip_removes_only_the_history_key() {
        let mut headers = headers_with_deaths(vec![death_entry("orders", "rejected", 1)]);
        headers.insert("trace-id".into(), AMQPValue::LongString("abc-123".into()));

        let stripped = strip_delivery_history(&headers);
        assert!(stripped.inner().get(&ShortString::from(DEATH_HEADER)).is_none());
        assert!(stripped.inner().get(&ShortString::from("trace-id")).is_some());
        // Source table is untouched.
        assert!(headers.inner().get(&ShortString::from(DEATH_HEADER)).is_some());
    }
}
