//! Typed records for management-API responses and queue grouping.
//!
//! Deserialization happens once at the HTTP boundary; everything past this
//! module works on these structs, never on raw JSON maps.

use serde::Deserialize;
use serde_json::Value;

use crate::history;
use crate::naming::{self, QueueRole};

/// One queue as reported by `GET /api/queues/{vhost}`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStat {
    pub name: String,
    #[serde(default)]
    pub messages: u64,
    #[serde(default)]
    pub messages_ready: u64,
    #[serde(default, rename = "messages_unacknowledged")]
    pub messages_unacked: u64,
    #[serde(default)]
    pub consumers: u64,
    #[serde(default = "unknown_state")]
    pub state: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
}

fn unknown_state() -> String {
    "unknown".into()
}

impl QueueStat {
    /// Whether the queue was declared with a dead-letter-exchange argument.
    pub fn has_dead_letter_exchange(&self) -> bool {
        self.arguments.contains_key("x-dead-letter-exchange")
    }

    pub fn role(&self) -> QueueRole {
        naming::classify(&self.name)
    }
}

/// One message as returned by the management API's non-destructive peek.
#[derive(Debug, Clone, Deserialize)]
pub struct PeekedMessage {
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub payload_encoding: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub redelivered: bool,
    #[serde(default)]
    pub properties: MessageProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageProperties {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    /// Raw header bag; `Value::Null` when the message carries none.
    #[serde(default)]
    pub headers: Value,
}

impl PeekedMessage {
    /// Cumulative failure count decoded from the delivery history.
    pub fn retry_count(&self) -> u64 {
        history::retry_count_from_json(&self.properties.headers)
    }
}

/// Main/wait/DLQ stats grouped under one base queue name.
#[derive(Debug, Clone, Default)]
pub struct QueueGroup {
    pub base: String,
    pub main: Option<QueueStat>,
    pub wait: Option<QueueStat>,
    pub dlq: Option<QueueStat>,
}

impl QueueGroup {
    /// A group is configured once the wait queue, the DLQ, and a
    /// dead-letter-exchange argument on the main queue are all present.
    pub fn is_configured(&self) -> bool {
        self.wait.is_some()
            && self.dlq.is_some()
            && self
                .main
                .as_ref()
                .is_some_and(QueueStat::has_dead_letter_exchange)
    }

    pub fn total_messages(&self) -> u64 {
        [&self.main, &self.wait, &self.dlq]
            .into_iter()
            .flatten()
            .map(|q| q.messages)
            .sum()
    }
}

/// Group queue stats by base name, skipping broker-owned `amq.*` queues.
///
/// Groups come back sorted by base name so report output is stable.
pub fn group_queues(stats: &[QueueStat]) -> Vec<QueueGroup> {
    let mut groups: std::collections::BTreeMap<String, QueueGroup> = Default::default();

    for stat in stats {
        let role = stat.role();
        if role == QueueRole::System {
            continue;
        }
        let base = naming::base_name(&stat.name).to_string();
        let group = groups.entry(base.clone()).or_insert_with(|| QueueGroup {
            base,
            ..Default::default()
        });
        let slot = match role {
            QueueRole::Main => &mut group.main,
            QueueRole::Wait => &mut group.wait,
            QueueRole::Dlq => &mut group.dlq,
            QueueRole::System => unreachable!(),
        };
        *slot = Some(stat.clone());
    }

    groups.into_values().collect()
}

/// Bounded payload preview: pretty-printed when the payload is JSON, raw text
/// truncated to `limit` characters otherwise.
pub fn payload_preview(payload: &str, limit: usize) -> String {
    let rendered = match serde_json::from_str::<Value>(payload) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| payload.to_string()),
        Err(_) => payload.to_string(),
    };
    rendered.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stat(name: &str, messages: u64, args: Value) -> QueueStat {
        serde_json::from_value(json!({
            "name": name,
            "messages": messages,
            "arguments": args,
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_sparse_queue_json() {
        let q: QueueStat = serde_json::from_value(json!({"name": "orders"})).unwrap();
        assert_eq!(q.messages, 0);
        assert_eq!(q.state, "unknown");
        assert!(!q.has_dead_letter_exchange());
    }

    #[test]
    fn groups_by_base_name() {
        let stats = vec![
            stat("orders", 4, json!({"x-dead-letter-exchange": "orders.wait.exchange"})),
            stat("orders.wait", 1, json!({})),
            stat("orders.dlq", 2, json!({})),
            stat("billing", 0, json!({})),
            stat("amq.gen-x7Z", 9, json!({})),
        ];

        let groups = group_queues(&stats);
        assert_eq!(groups.len(), 2);

        let billing = &groups[0];
        assert_eq!(billing.base, "billing");
        assert!(!billing.is_configured());

        let orders = &groups[1];
        assert_eq!(orders.base, "orders");
        assert!(orders.is_configured());
        assert_eq!(orders.total_messages(), 7);
    }

    #[test]
    fn incomplete_without_dead_letter_argument() {
        let stats = vec![
            stat("orders", 0, json!({})),
            stat("orders.wait", 0, json!({})),
            stat("orders.dlq", 0, json!({})),
        ];
        assert!(!group_queues(&stats)[0].is_configured());
    }

    #[test]
    fn peeked_message_decodes_retry_count() {
        let msg: PeekedMessage = serde_json::from_value(json!({
            "payload": "{}",
            "routing_key": "orders",
            "properties": {"headers": {"x-death": [{"queue": "orders", "count": 3}]}},
        }))
        .unwrap();
        assert_eq!(msg.retry_count(), 3);
    }

    #[test]
    fn preview_pretty_prints_json_and_truncates() {
        let pretty = payload_preview(r#"{"a":1}"#, 200);
        assert!(pretty.contains("\"a\": 1"));

        let long = "x".repeat(500);
        assert_eq!(payload_preview(&long, 200).chars().count(), 200);
    }
}
