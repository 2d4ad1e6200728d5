//! Moving dead-lettered messages back into circulation.
//!
//! A message only ever leaves the DLQ after its replacement has been
//! confirmed onto the original queue; any publish failure leaves the source
//! message requeued in the DLQ.

use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, ConfirmSelectOptions,
    QueuePurgeOptions,
};
use lapin::{BasicProperties, Channel};
use tracing::{info, warn};

use hopper_core::{naming, HopperError, Result};

use crate::headers::strip_delivery_history;

/// End-of-run tally for one reprocessing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReprocessReport {
    /// Messages republished and removed from the DLQ (or, under dry run,
    /// messages that would have been).
    pub succeeded: u64,
    /// Messages whose republish failed; they remain in the DLQ.
    pub failed: u64,
}

pub struct Reprocessor<'a> {
    channel: &'a Channel,
}

/// Caps a drain at the backlog observed on the first fetch.
///
/// Messages nacked back into the DLQ (dry runs, failed republishes) are
/// fetchable again on the next `basic_get`, so "queue empty" alone never
/// terminates those passes. Each fetch spends one unit of the starting
/// backlog instead.
#[derive(Debug, Default)]
struct DrainBudget(Option<u64>);

impl DrainBudget {
    fn exhausted(&self) -> bool {
        self.0 == Some(0)
    }

    /// Record one fetch. `remaining_after_fetch` is the broker's count of
    /// messages still in the queue, from the same basic-get-ok.
    fn spend(&mut self, remaining_after_fetch: u32) {
        let left = self
            .0
            .get_or_insert(u64::from(remaining_after_fetch) + 1);
        *left = left.saturating_sub(1);
    }
}

impl<'a> Reprocessor<'a> {
    /// Wrap a channel, enabling publisher confirms on it so the
    /// republish-then-ack ordering is actually backed by the broker.
    pub async fn new(channel: &'a Channel) -> Result<Self> {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| HopperError::Connection(e.to_string()))?;
        Ok(Self { channel })
    }

    /// Drain the queue's DLQ back onto the queue, FIFO, one message at a time.
    ///
    /// Stops when the starting backlog has been walked once or `max_messages`
    /// have been moved. Under `dry_run` nothing is published; every peeked
    /// message is requeued and counted as "would reprocess". On ctrl-c the
    /// in-flight republish-then-ack completes before the pass stops.
    pub async fn reprocess(
        &self,
        queue: &str,
        max_messages: Option<u64>,
        dry_run: bool,
    ) -> Result<ReprocessReport> {
        let dlq = naming::dlq_queue(queue);
        let mut report = ReprocessReport::default();
        let mut budget = DrainBudget::default();

        loop {
            if max_messages.is_some_and(|max| report.succeeded >= max) || budget.exhausted() {
                break;
            }

            let fetched = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(dlq = %dlq, "interrupted, stopping reprocess");
                    break;
                }
                fetched = self.channel.basic_get(&dlq, BasicGetOptions { no_ack: false }) => {
                    fetched.map_err(|e| HopperError::Connection(e.to_string()))?
                }
            };
            let Some(message) = fetched else {
                break;
            };
            budget.spend(message.message_count);
            let delivery = message.delivery;

            if dry_run {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| HopperError::Connection(e.to_string()))?;
                report.succeeded += 1;
                info!(dlq = %dlq, n = report.succeeded, "would reprocess message");
                continue;
            }

            let properties = reset_properties(&delivery.properties);
            let published = publish_back(self.channel, queue, &delivery.data, properties).await;

            match published {
                Ok(()) => {
                    delivery
                        .ack(BasicAckOptions::default())
                        .await
                        .map_err(|e| HopperError::Connection(e.to_string()))?;
                    report.succeeded += 1;
                    info!(dlq = %dlq, queue, n = report.succeeded, "reprocessed message");
                }
                Err(err) => {
                    // Keep the source message; it must not be lost on a
                    // transient publish failure.
                    warn!(dlq = %dlq, queue, %err, "republish failed, message left in DLQ");
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await
                        .map_err(|e| HopperError::Connection(e.to_string()))?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Irreversibly delete every message in the queue's DLQ.
    ///
    /// Callers gate this behind an explicit operator confirmation; nothing
    /// here prompts.
    pub async fn purge(&self, queue: &str) -> Result<u64> {
        let dlq = naming::dlq_queue(queue);
        let purged = self
            .channel
            .queue_purge(&dlq, QueuePurgeOptions::default())
            .await
            .map_err(|e| HopperError::Connection(e.to_string()))?;
        info!(dlq = %dlq, purged, "purged DLQ");
        Ok(u64::from(purged))
    }
}

async fn publish_back(
    channel: &Channel,
    queue: &str,
    payload: &[u8],
    properties: BasicProperties,
) -> Result<()> {
    let confirm = channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            payload,
            properties,
        )
        .await
        .map_err(|e| HopperError::Publish(e.to_string()))?
        .await
        .map_err(|e| HopperError::Publish(e.to_string()))?;

    if confirm.is_nack() {
        return Err(HopperError::Publish("publisher confirm NACK".into()));
    }
    Ok(())
}

/// Rebuild a message's properties for republication: persistent delivery,
/// delivery history dropped, everything else carried over unchanged.
pub fn reset_properties(props: &BasicProperties) -> BasicProperties {
    let mut out = BasicProperties::default().with_delivery_mode(2);

    if let Some(v) = props.content_type() {
        out = out.with_content_type(v.clone());
    }
    if let Some(v) = props.content_encoding() {
        out = out.with_content_encoding(v.clone());
    }
    if let Some(v) = props.correlation_id() {
        out = out.with_correlation_id(v.clone());
    }
    if let Some(v) = props.reply_to() {
        out = out.with_reply_to(v.clone());
    }
    if let Some(v) = props.expiration() {
        out = out.with_expiration(v.clone());
    }
    if let Some(v) = props.message_id() {
        out = out.with_message_id(v.clone());
    }
    if let Some(v) = props.timestamp() {
        out = out.with_timestamp(*v);
    }
    if let Some(v) = props.kind() {
        out = out.with_kind(v.clone());
    }
    if let Some(v) = props.user_id() {
        out = out.with_user_id(v.clone());
    }
    if let Some(v) = props.app_id() {
        out = out.with_app_id(v.clone());
    }
    if let Some(v) = props.priority() {
        out = out.with_priority(*v);
    }
    if let Some(headers) = props.headers() {
        out = out.with_headers(strip_delivery_history(headers));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::history::DEATH_HEADER;
    use lapin::types::{AMQPValue, FieldArray, FieldTable, ShortString};

    fn dead_lettered_properties() -> BasicProperties {
        let mut record = FieldTable::default();
        record.insert("queue".into(), AMQPValue::LongString("orders".into()));
        record.insert("count".into(), AMQPValue::LongLongInt(3));
        let mut deaths = FieldArray::default();
        deaths.push(AMQPValue::FieldTable(record));

        let mut headers = FieldTable::default();
        headers.insert(DEATH_HEADER.into(), AMQPValue::FieldArray(deaths));
        headers.insert("trace-id".into(), AMQPValue::LongString("abc".into()));

        BasicProperties::default()
            .with_content_type("application/json".into())
            .with_correlation_id("corr-42".into())
            .with_app_id("orders-svc".into())
            .with_headers(headers)
    }

    #[test]
    fn reset_drops_history_and_keeps_the_rest() {
        let reset = reset_properties(&dead_lettered_properties());

        let headers = reset.headers().as_ref().unwrap();
        assert!(headers.inner().get(&ShortString::from(DEATH_HEADER)).is_none());
        assert!(headers.inner().get(&ShortString::from("trace-id")).is_some());

        assert_eq!(
            reset.content_type().as_ref().map(|s| s.as_str()),
            Some("application/json")
        );
        assert_eq!(
            reset.correlation_id().as_ref().map(|s| s.as_str()),
            Some("corr-42")
        );
        assert_eq!(
            reset.app_id().as_ref().map(|s| s.as_str()),
            Some("orders-svc")
        );
    }

    #[test]
    fn reset_forces_persistent_delivery() {
        let reset = reset_properties(&BasicProperties::default());
        assert_eq!(*reset.delivery_mode(), Some(2));
        assert!(reset.headers().is_none());
    }

    #[test]
    fn drain_stops_after_the_starting_backlog_even_when_messages_requeue() {
        // Three messages in the DLQ; requeued messages keep the broker's
        // remaining count at two on every subsequent fetch.
        let mut budget = DrainBudget::default();
        budget.spend(2);
        assert!(!budget.exhausted());
        budget.spend(2);
        assert!(!budget.exhausted());
        budget.spend(2);
        assert!(budget.exhausted());
    }

    #[test]
    fn drain_budget_starts_open_and_never_underflows() {
        let mut budget = DrainBudget::default();
        assert!(!budget.exhausted());
        budget.spend(0);
        assert!(budget.exhausted());
        budget.spend(0);
        assert!(budget.exhausted());
    }
}
