//! Retry-aware consumer loop.
//!
//! The broker topology alone cannot branch on retry count, so the gate lives
//! here: every failed delivery is decided against the retry budget before it
//! is rejected toward the wait stage (and, eventually, the DLQ).

use std::sync::Arc;

use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use tracing::{error, info, warn};

use hopper_core::policy::{decide, RetryDecision};
use hopper_core::{HopperError, MessageHandler, Result, RetryConfig};

use crate::headers;

/// Tally of one consume run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeReport {
    pub processed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

/// Consume `queue` until interrupted, applying the retry gate on failures.
///
/// The in-flight message is always settled (ack or reject) before the loop
/// exits on ctrl-c.
pub async fn consume(
    channel: &Channel,
    queue: &str,
    retry: &RetryConfig,
    handler: Arc<dyn MessageHandler>,
) -> Result<ConsumeReport> {
    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .map_err(|e| HopperError::Connection(e.to_string()))?;

    let mut consumer = channel
        .basic_consume(
            queue,
            &format!("hopper-{queue}"),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| HopperError::Connection(e.to_string()))?;

    info!(queue, max_retries = retry.max_retries, "consuming");
    let mut report = ConsumeReport::default();

    loop {
        let delivery = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(queue, "interrupt received, stopping consumer");
                break;
            }
            next = consumer.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(queue, error = %e, "delivery error");
                    break;
                }
                None => break,
            },
        };

        let routing_key = delivery.routing_key.to_string();
        match handler.handle(&routing_key, &delivery.data).await {
            Ok(()) => {
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(|e| HopperError::Connection(e.to_string()))?;
                report.processed += 1;
            }
            Err(err) => {
                let retry_count = headers::retry_count(&delivery.properties);
                match decide(retry_count, retry.max_retries) {
                    RetryDecision::Retry => {
                        warn!(
                            queue,
                            %routing_key,
                            retry_count,
                            max_retries = retry.max_retries,
                            error = %err,
                            "handler failed, retrying via wait stage"
                        );
                        report.retried += 1;
                    }
                    RetryDecision::DeadLetter => {
                        warn!(
                            queue,
                            %routing_key,
                            retry_count,
                            error = %err,
                            "retry budget exhausted, message heads to DLQ"
                        );
                        report.dead_lettered += 1;
                    }
                }
                // Both paths reject without requeue; the queue's
                // dead-letter-exchange argument decides where it lands.
                delivery
                    .reject(BasicRejectOptions { requeue: false })
                    .await
                    .map_err(|e| HopperError::Connection(e.to_string()))?;
            }
        }
    }

    Ok(report)
}
